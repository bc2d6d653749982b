//! Background Tasks
//!
//! Periodic jobs (catalog sync, reconciliation) run as independent tokio
//! tasks. A failing iteration is logged and the loop continues; every task
//! stops when shutdown is triggered.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Coordinator for graceful shutdown
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Tasks still listening
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `job` every `interval` until `shutdown` fires. The first run is
/// immediate.
pub fn spawn_periodic<F, Fut, E>(
    name: &'static str,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, interval_secs = interval.as_secs(), "Starting background task");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(task = name, "Background task stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match job().await {
                        Ok(()) => debug!(task = name, "Iteration finished"),
                        Err(e) => warn!(task = name, error = %e, "Iteration failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_failing_iterations_keep_running() {
        let shutdown = Shutdown::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let handle = spawn_periodic(
            "flaky",
            Duration::from_millis(10),
            shutdown.subscribe(),
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n % 2 == 0 { Err("boom") } else { Ok(()) }
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(shutdown.receiver_count(), 1);
        shutdown.trigger();
        handle.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 3);
        assert_eq!(shutdown.receiver_count(), 0);
    }
}
