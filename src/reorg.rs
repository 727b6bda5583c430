//! Passive tip-change logger.

use crate::chain::ChainIndex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Logs every tip change until stopped. Never feeds back into the chain.
pub struct ReorgNotifier {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<u64>>,
}

impl ReorgNotifier {
    pub fn spawn(mut rx: broadcast::Receiver<ChainIndex>) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut seen = 0u64;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    next = rx.recv() => match next {
                        Ok(tip) => {
                            seen += 1;
                            info!(tip = %tip, height = tip.height, "chain reorg");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "reorg logger fell behind");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!(seen, "reorg subscription cancelled");
            seen
        });
        Self {
            stop_tx,
            task: Some(task),
        }
    }

    /// Cancel the subscription and wait for the logger to exit. Returns the
    /// number of tips logged; 0 on repeated calls.
    pub async fn stop(&mut self) -> u64 {
        let Some(task) = self.task.take() else {
            return 0;
        };
        self.stop_tx.send_replace(true);
        task.await.unwrap_or_default()
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for ReorgNotifier {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
