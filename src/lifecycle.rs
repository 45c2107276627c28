//! Process lifecycle: one shutdown signal shared by every background task,
//! and an ordered drain of those tasks on exit.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "lifecycle";

/// Receiving half of the shutdown signal.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&mut self) {
        // An error means the lifecycle was dropped, which is also a shutdown.
        let _ = self.receiver.wait_for(|triggered| *triggered).await;
    }
}

pub struct Lifecycle {
    sender: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Spawn a background task that is awaited during shutdown.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        mutex_lock(&self.tasks, SOURCE, "spawn").push((name, handle));
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    /// Request shutdown and wait up to `grace` for every task to finish;
    /// stragglers are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.trigger();
        let tasks = std::mem::take(&mut *mutex_lock(&self.tasks, SOURCE, "shutdown"));
        let deadline = tokio::time::Instant::now() + grace;

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(task = name, "background task stopped"),
                Ok(Err(err)) => warn!(task = name, error = %err, "background task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "background task exceeded shutdown grace; aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
