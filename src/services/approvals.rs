//! Snapshot-bound approval manager.
//!
//! Approvals are valid only while the `(base commit, diff hash)` pair
//! they were granted against still matches. A separate request/response
//! bus lets a UI answer approval requests asynchronously; responses for
//! unknown tasks are ignored and duplicates dropped.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{Approval, ApprovalRequest, ApprovalResponse, ApprovedBy};

/// Capacity of the outbound approval-request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Manages approvals and the request/response bus.
pub struct ApprovalManager {
    entries: RwLock<HashMap<Uuid, Approval>>,
    request_tx: mpsc::Sender<ApprovalRequest>,
    request_rx: Mutex<Option<mpsc::Receiver<ApprovalRequest>>>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ApprovalResponse>>>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            request_tx,
            request_rx: Mutex::new(Some(request_rx)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record an approval for a task's current snapshot, replacing any
    /// prior entry.
    pub fn create(&self, task_id: Uuid, base_commit: &str, diff: &str, by: ApprovedBy) {
        let approval = Approval::new(task_id, base_commit, diff, by);
        self.entries
            .write()
            .expect("approval lock poisoned")
            .insert(task_id, approval);
    }

    /// Whether a valid approval exists for exactly this snapshot.
    pub fn is_valid(&self, task_id: Uuid, base_commit: &str, diff: &str) -> bool {
        self.entries
            .read()
            .expect("approval lock poisoned")
            .get(&task_id)
            .is_some_and(|approval| approval.covers(base_commit, diff))
    }

    /// Drop a task's approval.
    pub fn expire(&self, task_id: Uuid) {
        self.entries
            .write()
            .expect("approval lock poisoned")
            .remove(&task_id);
    }

    /// Look up the raw approval entry.
    pub fn get(&self, task_id: Uuid) -> Option<Approval> {
        self.entries
            .read()
            .expect("approval lock poisoned")
            .get(&task_id)
            .cloned()
    }

    /// Take the consumer side of the request bus. Yields `Some` once.
    pub fn take_request_receiver(&self) -> Option<mpsc::Receiver<ApprovalRequest>> {
        self.request_rx
            .lock()
            .expect("approval request receiver lock poisoned")
            .take()
    }

    /// Publish a request and await its response.
    ///
    /// Cancellation returns [`OrchestratorError::Canceled`]. On approval
    /// the snapshot is recorded before returning.
    pub async fn wait_for_approval(
        &self,
        token: &CancellationToken,
        request: ApprovalRequest,
    ) -> OrchestratorResult<ApprovalResponse> {
        let task_id = request.task_id;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("approval pending lock poisoned")
            .insert(task_id, tx);

        let snapshot = (request.base_commit.clone(), request.diff.clone());
        if self.request_tx.send(request).await.is_err() {
            self.pending
                .lock()
                .expect("approval pending lock poisoned")
                .remove(&task_id);
            return Err(OrchestratorError::ChannelClosed("approval requests"));
        }

        let response = tokio::select! {
            () = token.cancelled() => {
                self.pending
                    .lock()
                    .expect("approval pending lock poisoned")
                    .remove(&task_id);
                return Err(OrchestratorError::Canceled);
            }
            received = rx => received.map_err(|_| OrchestratorError::ChannelClosed("approval response"))?,
        };

        if response.approved {
            self.create(task_id, &snapshot.0, &snapshot.1, ApprovedBy::User);
        }
        Ok(response)
    }

    /// Deliver a response from the bus consumer.
    ///
    /// Responses for unknown task IDs are ignored; a duplicate response
    /// finds no pending waiter and is silently dropped.
    pub fn respond(&self, response: ApprovalResponse) {
        let waiter = self
            .pending
            .lock()
            .expect("approval pending lock poisoned")
            .remove(&response.task_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(task_id = %response.task_id, "approval response for unknown task ignored"),
        }
    }
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::new()
    }
}
