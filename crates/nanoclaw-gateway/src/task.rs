//! Stoppable background tasks

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to a spawned loop that watches a shutdown channel
///
/// `stop` signals the loop and waits for it, so work the loop is in the middle
/// of finishes before `stop` returns.
pub struct BackgroundTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `body` with a receiver that flips to `true` on stop
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(body(rx));
        Self { name, shutdown, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(task = self.name, error = %e, "Background task ended abnormally");
        }
    }
}

/// Resolves once the shutdown flag is set or its sender is gone
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stop_signals_and_joins() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();

        let task = BackgroundTask::spawn("test", move |mut rx| async move {
            shutdown_requested(&mut rx).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!task.is_finished());
        task.stop().await;
        assert!(exited.load(Ordering::SeqCst));
    }
}
