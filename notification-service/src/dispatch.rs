use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{clients::email::EmailSender, error::DispatchError};

#[derive(Debug, Clone, PartialEq)]
pub enum EmailBody {
    Plain(String),
    Html(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailJob {
    pub to: String,
    pub subject: String,
    pub body: EmailBody,
}

impl EmailJob {
    pub fn plain(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: EmailBody::Plain(body.into()),
        }
    }

    pub fn html(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: EmailBody::Html(html.into()),
        }
    }
}

/// Fire-and-forget email delivery over a fixed pool of workers and a bounded queue.
pub struct EmailDispatcher {
    sender: Mutex<Option<mpsc::Sender<EmailJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
}

impl EmailDispatcher {
    pub fn start(email_sender: Arc<dyn EmailSender>, workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(AsyncMutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    Arc::clone(&rx),
                    Arc::clone(&email_sender),
                ))
            })
            .collect();

        info!(workers, capacity, "Email dispatcher started");

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            capacity,
        }
    }

    /// Queues `job` without waiting. Fails immediately when the queue is full.
    pub fn submit(&self, job: EmailJob) -> Result<(), DispatchError> {
        let sender = self.sender.lock().clone().ok_or(DispatchError::Closed)?;

        sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                error!(
                    to = %job.to,
                    capacity = self.capacity,
                    "Email dispatcher saturated, job rejected"
                );
                DispatchError::Rejected {
                    capacity: self.capacity,
                }
            }
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    /// Stops accepting jobs and waits up to `timeout` for queued ones to finish.
    pub async fn shutdown(&self, timeout: Duration) {
        self.sender.lock().take();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();

        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Email dispatcher did not drain before timeout"
            );
        } else {
            info!("Email dispatcher drained");
        }
    }
}

async fn run_worker(
    index: usize,
    queue: Arc<AsyncMutex<mpsc::Receiver<EmailJob>>>,
    email_sender: Arc<dyn EmailSender>,
) {
    loop {
        let job = queue.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        let result = match &job.body {
            EmailBody::Plain(body) => email_sender.send_plain(&job.to, &job.subject, body).await,
            EmailBody::Html(html) => email_sender.send_html(&job.to, &job.subject, html).await,
        };

        match result {
            Ok(()) => debug!(worker = index, to = %job.to, "Dispatched email sent"),
            Err(e) => error!(worker = index, to = %job.to, error = %e, "Dispatched email failed"),
        }
    }
}
