#![warn(missing_docs)]
//! Test support: recording collaborators and a loopback websocket server
//! that speaks the voxel protocol.

mod doubles;
mod server;

pub use doubles::{AssetGate, Recorded, Recorder};
pub use server::{ServerEvent, TestServer};

use std::time::Duration;
use voxlink_client::{Client, ClientError};

/// Delay between frames in [`run_frames_until`].
pub const FRAME_INTERVAL: Duration = Duration::from_millis(5);

/// Run client frames until `done` holds or `wait` elapses.
///
/// Returns whether the condition was met. Frame errors end the loop early.
pub async fn run_frames_until<F>(
    client: &mut Client,
    wait: Duration,
    mut done: F,
) -> Result<bool, ClientError>
where
    F: FnMut(&Client) -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        client.frame()?;
        if done(client) {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(FRAME_INTERVAL).await;
    }
}
