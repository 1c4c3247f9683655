//! Background poll loop: picks up pending jobs nobody submitted directly,
//! including jobs left pending by a previous process.

use std::sync::Weak;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::PoolInner;

pub(super) async fn run(pool: Weak<PoolInner>, cancel: CancellationToken) {
    info!("Job poller starting");

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };

        let pause = match inner.poll_once().await {
            Ok(0) => inner.config.poll_interval,
            Ok(admitted) => {
                debug!(count = admitted, "Admitted pending jobs");
                inner.config.poll_interval
            }
            Err(e) => {
                error!(error = %e, "Failed to poll pending jobs");
                inner.config.poll_error_interval
            }
        };
        drop(inner);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!("Job poller stopped");
}
