use std::time::Duration;

use color_eyre::Result;
use pretty_assertions::assert_eq;
use schellenberg_bridge::{
    command::Command,
    device::{DeviceId, Enumerator},
};

mod common;

use common::start_bridge;

#[tokio::test]
async fn pairing_resolves_and_registers_the_device() -> Result<()> {
    let (mock, session) = start_bridge().await?;
    let remote: DeviceId = "ABCDEF".parse()?;
    let enumerator: Enumerator = "A5".parse()?;

    let announce = async {
        // Give the pairing broadcast a head start, then let the remote
        // answer on the paired channel.
        tokio::time::sleep(Duration::from_millis(100)).await;
        mock.inject_frame(remote, enumerator, Command::AllowPairing);
    };
    let (paired, ()) = tokio::join!(
        session.pair_device(remote, enumerator, Some("living room"), None),
        announce
    );

    let device = paired?.expect("Remote answered, pairing should resolve");
    assert_eq!(device.enumerator, enumerator);
    assert_eq!(device.name.as_deref(), Some("living room"));

    let self_sender = session.registry().require_self_sender().await?;
    assert_eq!(
        self_sender.device(enumerator).unwrap().name.as_deref(),
        Some("living room")
    );

    Ok(())
}

#[tokio::test]
async fn pairing_ignores_other_senders() -> Result<()> {
    let (mock, session) = start_bridge().await?;
    let expected: DeviceId = "ABCDEF".parse()?;
    let intruder: DeviceId = "123456".parse()?;
    let enumerator: Enumerator = "A5".parse()?;

    let announce = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        mock.inject_frame(intruder, enumerator, Command::AllowPairing);
    };
    let (paired, ()) = tokio::join!(
        session.pair_device(
            expected,
            enumerator,
            None,
            Some(Duration::from_millis(500))
        ),
        announce
    );

    assert_eq!(paired?, None);

    // The intruder was still seen and recorded, just not paired to us.
    let self_sender = session.registry().require_self_sender().await?;
    assert!(self_sender.device(enumerator).is_none());
    assert!(session.registry().sender(intruder).await.is_some());

    Ok(())
}

#[tokio::test]
async fn waiting_without_an_answer_times_out() -> Result<()> {
    let (_mock, session) = start_bridge().await?;
    let expected: DeviceId = "ABCDEF".parse()?;

    let answer = session
        .wait_for_pairing(expected, Some(Duration::from_millis(200)))
        .await;

    assert_eq!(answer, None);
    Ok(())
}
