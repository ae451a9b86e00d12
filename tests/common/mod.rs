#![allow(dead_code)]

use std::time::Duration;

use color_eyre::Result;
use schellenberg_bridge::{
    codec::SchellenbergMessageReceived,
    config::Timing,
    device::DeviceId,
    mock::{MockBehavior, MockTransceiver},
    registry::Registry,
    session::Session,
};
use tokio::sync::broadcast;
use tokio::time::timeout;

/// The id the mock stick answers the handshake with.
pub const MOCK_ID: &str = "C0FFEE";

/// Hardware bounds shrunk so failure paths resolve quickly.
pub fn fast_timing() -> Timing {
    Timing {
        acquire_ms: 500,
        completion_ms: 500,
        pairing_ms: 2_000,
        settle_ms: 10,
        travel_ms: 100,
        handshake_ms: 1_000,
    }
}

pub async fn start_bridge() -> Result<(MockTransceiver, Session)> {
    start_bridge_with(MockBehavior::default()).await
}

pub async fn start_bridge_with(behavior: MockBehavior) -> Result<(MockTransceiver, Session)> {
    let id: DeviceId = MOCK_ID.parse()?;
    let (mock, transport) = MockTransceiver::spawn_with(id, behavior);

    let session = Session::start(transport, fast_timing(), Registry::new()).await?;
    Ok((mock, session))
}

pub async fn next_message(
    rx: &mut broadcast::Receiver<SchellenbergMessageReceived>,
) -> Result<SchellenbergMessageReceived> {
    Ok(timeout(Duration::from_secs(2), rx.recv()).await??)
}
