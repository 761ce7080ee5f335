//! Bounded background work queue
//!
//! Submissions go through an mpsc channel to a dispatcher task, which spawns
//! one task per item and caps how many run at once with a semaphore.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for a work queue
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Maximum concurrent items
    pub max_concurrent: usize,
    /// Queue capacity (pending items)
    pub queue_capacity: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 256,
        }
    }
}

/// The dispatcher is gone and nothing can be queued any more
#[derive(Debug, thiserror::Error)]
#[error("work queue '{0}' is closed")]
pub struct QueueClosed(pub String);

struct Queued<T> {
    id: Uuid,
    payload: T,
}

/// A bounded work queue that processes items with limited concurrency
pub struct WorkQueue<T> {
    sender: mpsc::Sender<Queued<T>>,
    semaphore: Arc<Semaphore>,
    config: JobQueueConfig,
    name: String,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Create a new work queue with a processor function.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<F, Fut>(name: &str, config: JobQueueConfig, processor: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<Queued<T>>(config.queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let queue_name = name.to_string();

        let sem = semaphore.clone();
        let processor = Arc::new(processor);

        tokio::spawn(async move {
            info!(queue = %queue_name, "Work queue started");

            while let Some(item) = receiver.recv().await {
                let sem = sem.clone();
                let processor = processor.clone();
                let name = queue_name.clone();

                tokio::spawn(async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return;
                    };
                    debug!(queue = %name, item_id = %item.id, "Processing item");
                    processor(item.payload).await;
                    debug!(queue = %name, item_id = %item.id, "Item completed");
                });
            }

            info!(queue = %queue_name, "Work queue stopped");
        });

        Self {
            sender,
            semaphore,
            config,
            name: name.to_string(),
        }
    }

    /// Submit an item to the queue, waiting for capacity if it is full
    pub async fn submit(&self, payload: T) -> Result<Uuid, QueueClosed> {
        let id = Uuid::new_v4();
        self.sender
            .send(Queued { id, payload })
            .await
            .map_err(|_| QueueClosed(self.name.clone()))?;
        debug!(queue = %self.name, item_id = %id, "Item submitted");
        Ok(id)
    }

    /// Get current queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            max_concurrent: self.config.max_concurrent,
            available_permits: self.semaphore.available_permits(),
            queue_capacity: self.config.queue_capacity,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub max_concurrent: usize,
    pub available_permits: usize,
    pub queue_capacity: usize,
}
