use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Mailer, NotificationJob};

/// Per-message ceiling on the mail provider call.
pub const MAIL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub capacity: usize,
    pub workers: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            capacity: 100,
            workers: 5,
        }
    }
}

/// key: notification-dispatcher -> bounded queue + fixed worker pool
pub struct NotificationDispatcher {
    sender: mpsc::Sender<NotificationJob>,
    workers: Vec<JoinHandle<()>>,
}

/// key: notification-handle -> enqueue interface shared by producers
#[derive(Clone)]
pub struct NotificationHandle {
    sender: mpsc::Sender<NotificationJob>,
}

impl NotificationHandle {
    /// Waits for queue space when every slot is taken. Jobs are never dropped here; the only
    /// failure is a dispatcher that has already shut down, which is logged.
    pub async fn enqueue(&self, job: NotificationJob) {
        if let Err(err) = self.sender.send(job).await {
            let job = err.0;
            error!(
                template = %job.template,
                to = %job.recipient,
                "notification dispatcher closed; dropping job"
            );
        }
    }
}

/// Bounded job queue. The dispatcher drains the receiving side with its workers; a caller that
/// owns the receiver observes jobs directly.
pub fn channel(capacity: usize) -> (NotificationHandle, mpsc::Receiver<NotificationJob>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (NotificationHandle { sender }, receiver)
}

impl NotificationDispatcher {
    pub fn start(mailer: Arc<dyn Mailer>, settings: DispatcherSettings) -> Self {
        let (NotificationHandle { sender }, receiver) = channel(settings.capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let worker_count = settings.workers.max(1);
        let workers = (1..=worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&receiver),
                    Arc::clone(&mailer),
                ))
            })
            .collect();
        info!(
            workers = worker_count,
            capacity = settings.capacity,
            "notification dispatcher started"
        );
        Self { sender, workers }
    }

    pub fn handle(&self) -> NotificationHandle {
        NotificationHandle {
            sender: self.sender.clone(),
        }
    }

    /// Closes the queue and waits for workers to drain it. Completes once every outstanding
    /// handle has been dropped as well.
    pub async fn shutdown(self) {
        let Self { sender, workers } = self;
        drop(sender);
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(?err, "notification worker ended abnormally");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    mailer: Arc<dyn Mailer>,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let email = job.render();
        match tokio::time::timeout(MAIL_TIMEOUT, mailer.send(email)).await {
            Ok(Ok(())) => {
                info!(worker_id, template = %job.template, to = %job.recipient, "notification sent");
            }
            Ok(Err(err)) => {
                error!(
                    ?err,
                    worker_id,
                    template = %job.template,
                    to = %job.recipient,
                    "failed to send notification"
                );
            }
            Err(_) => {
                error!(
                    worker_id,
                    template = %job.template,
                    to = %job.recipient,
                    timeout_secs = MAIL_TIMEOUT.as_secs(),
                    "notification send timed out"
                );
            }
        }
    }
}
