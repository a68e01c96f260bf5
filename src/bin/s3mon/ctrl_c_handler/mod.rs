// Ctrl+C signal handler.
//
// Uses tokio::select! to wait for either shutdown or Ctrl+C signal.

use s3mon_rs::ShutdownToken;
use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, warn};

pub fn spawn_ctrl_c_handler(shutdown_token: ShutdownToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = shutdown_token.cancelled() => {
                debug!("shutdown_token canceled.")
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received, stopping all runners.");
                shutdown_token.cancel();
            }
        }
    })
}
