//! Serialized background writes of widget card stores.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::card::CardStore;
use crate::datastore::DataStore;

#[derive(Debug)]
enum WriteJob {
    Save {
        widget_id: u32,
        store: CardStore,
        done: oneshot::Sender<anyhow::Result<()>>,
    },
    Delete {
        widget_id: u32,
        done: oneshot::Sender<anyhow::Result<()>>,
    },
}

impl WriteJob {
    fn widget_id(&self) -> u32 {
        match self {
            Self::Save { widget_id, .. } | Self::Delete { widget_id, .. } => *widget_id,
        }
    }
}

/// Completion handle for a queued write. Dropping it does not cancel the
/// write.
#[derive(Debug)]
pub struct WriteTicket {
    widget_id: u32,
    rx: oneshot::Receiver<anyhow::Result<()>>,
}

impl WriteTicket {
    pub fn widget_id(&self) -> u32 {
        self.widget_id
    }

    pub async fn wait(self) -> anyhow::Result<()> {
        self.rx
            .await
            .map_err(|_| anyhow!("store writer stopped before widget {} was written", self.widget_id))?
    }
}

/// Handle to the single writer task. Jobs run one at a time in the order
/// they were queued, each on the blocking pool.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    sender: mpsc::UnboundedSender<WriteJob>,
}

impl StoreWriter {
    /// Spawns the writer on the current tokio runtime. The task ends once
    /// every `StoreWriter` clone is dropped and the queue is drained.
    pub fn spawn(store: Arc<DataStore>) -> (Self, JoinHandle<()>) {
        let (sender, mut rx) = mpsc::unbounded_channel::<WriteJob>();

        let handle = tokio::spawn(async move {
            debug!("store writer started");
            while let Some(job) = rx.recv().await {
                let widget_id = job.widget_id();
                let store = Arc::clone(&store);
                let joined = tokio::task::spawn_blocking(move || run_job(&store, job)).await;
                if let Err(err) = joined {
                    warn!(widget_id, error = %err, "store write task panicked");
                }
            }
            debug!("store writer stopped");
        });

        (Self { sender }, handle)
    }

    #[tracing::instrument(skip(self, store), fields(cards = store.len()))]
    pub fn enqueue_save(&self, widget_id: u32, store: CardStore) -> WriteTicket {
        let (done, rx) = oneshot::channel();
        self.send(WriteJob::Save {
            widget_id,
            store,
            done,
        });
        WriteTicket { widget_id, rx }
    }

    #[tracing::instrument(skip(self))]
    pub fn enqueue_delete(&self, widget_id: u32) -> WriteTicket {
        let (done, rx) = oneshot::channel();
        self.send(WriteJob::Delete { widget_id, done });
        WriteTicket { widget_id, rx }
    }

    fn send(&self, job: WriteJob) {
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            let widget_id = job.widget_id();
            warn!(widget_id, "store writer is gone, write dropped");
            let done = match job {
                WriteJob::Save { done, .. } | WriteJob::Delete { done, .. } => done,
            };
            let _ = done.send(Err(anyhow!("store writer is not running")));
        }
    }
}

fn run_job(store: &DataStore, job: WriteJob) {
    match job {
        WriteJob::Save {
            widget_id,
            store: cards,
            done,
        } => {
            let result = store.save(widget_id, &cards);
            match &result {
                Ok(()) => info!(widget_id, cards = cards.len(), "saved widget cards"),
                Err(err) => warn!(widget_id, error = %err, "failed to save widget cards"),
            }
            let _ = done.send(result);
        }
        WriteJob::Delete { widget_id, done } => {
            let result = store.delete(widget_id);
            if let Err(err) = &result {
                warn!(widget_id, error = %err, "failed to delete widget cards");
            }
            let _ = done.send(result);
        }
    }
}
