use std::time::Duration;

use color_eyre::Result;
use pretty_assertions::assert_eq;
use schellenberg_bridge::{
    codec::OutgoingSchellenbergMessage,
    command::Command,
    events::Event,
    mock::MockBehavior,
    session::SendOutcome,
};
use tokio::sync::oneshot;
use tokio::time::timeout;

mod common;

use common::{start_bridge, start_bridge_with};

#[tokio::test]
async fn transmit_encodes_and_confirms() -> Result<()> {
    let (mock, session) = start_bridge().await?;

    let outcome = session
        .transmit("A5".parse()?, Command::Stop)
        .await?;

    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(mock.writes(), vec![b"ssA590000000".to_vec()]);

    Ok(())
}

#[tokio::test]
async fn commands_go_out_in_fifo_order() -> Result<()> {
    let (mock, session) = start_bridge().await?;

    let mut completions = Vec::new();
    for (enumerator, command) in [
        ("01", Command::Up),
        ("02", Command::Down),
        ("03", Command::Stop),
    ] {
        let (tx, rx) = oneshot::channel();
        session.send(OutgoingSchellenbergMessage {
            completion: Some(tx),
            ..OutgoingSchellenbergMessage::new(enumerator.parse()?, command)
        })?;
        completions.push(rx);
    }

    for rx in completions {
        assert_eq!(
            timeout(Duration::from_secs(2), rx).await??,
            SendOutcome::Sent
        );
    }

    assert_eq!(
        mock.writes(),
        vec![
            b"ss0190100000".to_vec(),
            b"ss0290200000".to_vec(),
            b"ss0390000000".to_vec(),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn silent_hardware_is_a_soft_anomaly() -> Result<()> {
    let (mock, session) = start_bridge_with(MockBehavior {
        ack_writes: false,
        ..MockBehavior::default()
    })
    .await?;
    let mut events = session.subscribe_events();

    let outcome = session.transmit("A5".parse()?, Command::Up).await?;

    // The frame went out, hardware just never answered.
    assert_eq!(outcome, SendOutcome::SentUnconfirmed);
    assert_eq!(mock.writes().len(), 1);

    loop {
        let event = timeout(Duration::from_secs(2), events.recv()).await??;
        if matches!(event.inner, Event::TransmissionUnconfirmed { .. }) {
            break;
        }
    }

    Ok(())
}

#[tokio::test]
async fn busy_transmitter_abandons_the_send() -> Result<()> {
    let (mock, session) = start_bridge().await?;

    // Hardware engages the transmitter on its own and stays busy.
    mock.inject_line(b"t1".to_vec());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = session.transmit("A5".parse()?, Command::Down).await?;
    assert_eq!(outcome, SendOutcome::Abandoned);
    assert!(mock.writes().is_empty());

    // Once hardware lets go, sending works again.
    mock.inject_line(b"t0".to_vec());
    let outcome = session.transmit("A5".parse()?, Command::Down).await?;
    assert_eq!(outcome, SendOutcome::Sent);

    Ok(())
}
