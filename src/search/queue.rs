use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{FloorDocument, SearchIndex};
use crate::db::models::{Floor, FloorId};

#[derive(Debug, Clone, PartialEq)]
pub enum IndexTask {
    Index(FloorDocument),
    Delete(FloorId),
    BulkIndex(Vec<FloorDocument>),
    BulkDelete(Vec<FloorId>),
}

/// Producer side of the outbound index queue.
///
/// Tasks are routed to one lane per worker by floor id, so every task for
/// a given floor runs in the order it was enqueued. Bulk tasks are split
/// across lanes the same way.
///
/// Enqueueing never blocks and never fails the caller: when no index is
/// configured, or the workers are gone, the task is dropped.
#[derive(Debug, Clone, Default)]
pub struct SearchQueue {
    lanes: Option<Arc<Vec<mpsc::UnboundedSender<IndexTask>>>>,
}

impl SearchQueue {
    /// A queue with `workers` lanes (at least one) and their receivers,
    /// to be handed to [`spawn_workers`].
    pub fn channel(workers: usize) -> (Self, Vec<mpsc::UnboundedReceiver<IndexTask>>) {
        let (senders, receivers) = (0..workers.max(1)).map(|_| mpsc::unbounded_channel()).unzip();
        (
            Self {
                lanes: Some(Arc::new(senders)),
            },
            receivers,
        )
    }

    pub fn disabled() -> Self {
        Self { lanes: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.lanes.is_some()
    }

    /// Sensitive and deleted floors are never sent.
    pub fn index_floor(&self, floor: &Floor) {
        if floor.sensitive || floor.deleted {
            return;
        }
        self.send(floor.id, IndexTask::Index(FloorDocument::from(floor)));
    }

    pub fn delete_floor(&self, id: FloorId) {
        self.send(id, IndexTask::Delete(id));
    }

    pub fn bulk_index(&self, floors: &[Floor]) {
        let Some(lanes) = &self.lanes else {
            return;
        };
        let mut parts: HashMap<usize, Vec<FloorDocument>> = HashMap::new();
        for floor in floors.iter().filter(|f| !f.sensitive && !f.deleted) {
            parts
                .entry(lane_of(floor.id, lanes.len()))
                .or_default()
                .push(FloorDocument::from(floor));
        }
        for (lane, docs) in parts {
            send_to(&lanes[lane], IndexTask::BulkIndex(docs));
        }
    }

    pub fn bulk_delete(&self, ids: Vec<FloorId>) {
        let Some(lanes) = &self.lanes else {
            return;
        };
        let mut parts: HashMap<usize, Vec<FloorId>> = HashMap::new();
        for id in ids {
            parts.entry(lane_of(id, lanes.len())).or_default().push(id);
        }
        for (lane, ids) in parts {
            send_to(&lanes[lane], IndexTask::BulkDelete(ids));
        }
    }

    fn send(&self, id: FloorId, task: IndexTask) {
        if let Some(lanes) = &self.lanes {
            send_to(&lanes[lane_of(id, lanes.len())], task);
        }
    }
}

fn lane_of(id: FloorId, lanes: usize) -> usize {
    id.rem_euclid(lanes as i64) as usize
}

fn send_to(tx: &mpsc::UnboundedSender<IndexTask>, task: IndexTask) {
    if tx.send(task).is_err() {
        tracing::warn!("search workers stopped, dropping index task");
    }
}

/// Start one worker per lane, each draining its receiver into `index`.
///
/// Each task is attempted once; failures are logged. The workers exit once
/// every [`SearchQueue`] clone has been dropped and their lane is empty.
pub fn spawn_workers(
    index: Arc<dyn SearchIndex>,
    receivers: Vec<mpsc::UnboundedReceiver<IndexTask>>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(worker, mut rx)| {
            let index = index.clone();
            tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    run_task(index.as_ref(), task).await;
                }
                tracing::debug!(worker, "search worker stopped");
            })
        })
        .collect()
}

async fn run_task(index: &dyn SearchIndex, task: IndexTask) {
    let result = match &task {
        IndexTask::Index(doc) => index.index(doc).await,
        IndexTask::Delete(id) => index.delete(*id).await,
        IndexTask::BulkIndex(docs) => index.bulk_index(docs).await,
        IndexTask::BulkDelete(ids) => index.bulk_delete(ids).await,
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, task = task_name(&task), "search index update failed");
    }
}

fn task_name(task: &IndexTask) -> &'static str {
    match task {
        IndexTask::Index(_) => "index",
        IndexTask::Delete(_) => "delete",
        IndexTask::BulkIndex(_) => "bulk_index",
        IndexTask::BulkDelete(_) => "bulk_delete",
    }
}
