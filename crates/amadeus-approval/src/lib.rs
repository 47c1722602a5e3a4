#![deny(unsafe_code)]
#![warn(unreachable_pub)]
//! User approval gate for dangerous agent actions.
//!
//! Tools ask for permission per *action* (a stable string like
//! `"run command"`). Each action's disposition starts at "ask"; the first
//! session-wide answer moves it monotonically to allow-for-session or
//! reject, after which no further requests for that action reach the user.
//! A YOLO flag bypasses the gate entirely.
//!
//! The gate is split in two halves connected by a queue: tools call
//! [`Approval::request`] and await; the Soul drains [`Approval::fetch_request`],
//! forwards each request over the Wire, and completes it with
//! [`Approval::resolve_request`]. Many requests may be in flight at once
//! (parallel tool calls, subagents sharing the gate via [`Approval::share`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use amadeus_core::DisplayBlock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// The user's answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// Allow this one call.
    Approve,
    /// Allow this action for the rest of the session.
    ApproveForSession,
    /// Reject the action.
    Reject,
}

impl ApprovalKind {
    /// Whether this answer allows the call to proceed.
    #[must_use]
    pub fn is_approved(self) -> bool {
        !matches!(self, Self::Reject)
    }
}

/// Per-action disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    AllowForSession,
    Reject,
}

/// A pending approval request, as forwarded to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request id.
    pub id: String,
    /// The tool call that triggered the request.
    pub tool_call_id: String,
    /// The requesting tool's name.
    pub sender: String,
    /// The action key the disposition map is keyed by.
    pub action: String,
    /// Human-readable description of what will happen.
    pub description: String,
    /// Blocks rendered to the user alongside the request.
    #[serde(default)]
    pub display: Vec<DisplayBlock>,
}

struct ApprovalState {
    dispositions: HashMap<String, Disposition>,
    pending: HashMap<String, oneshot::Sender<ApprovalKind>>,
}

struct ApprovalInner {
    yolo: bool,
    state: Mutex<ApprovalState>,
    queue_tx: mpsc::UnboundedSender<ApprovalRequest>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ApprovalRequest>>,
}

/// The approval gate. Cheap to clone via [`Approval::share`].
pub struct Approval {
    inner: Arc<ApprovalInner>,
}

impl Approval {
    /// Create a new gate.
    #[must_use]
    pub fn new(yolo: bool) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ApprovalInner {
                yolo,
                state: Mutex::new(ApprovalState {
                    dispositions: HashMap::new(),
                    pending: HashMap::new(),
                }),
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
            }),
        }
    }

    /// Whether the gate is in YOLO mode.
    #[must_use]
    pub fn is_yolo(&self) -> bool {
        self.inner.yolo
    }

    /// A handle to the same underlying gate, for subagents.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Ask whether `action` may proceed. Returns `true` when approved.
    ///
    /// Short-circuits on YOLO and on terminal dispositions; otherwise the
    /// request is queued for the Soul to forward and the call suspends until
    /// the user answers. A dropped queue (soul gone) counts as rejection.
    pub async fn request(
        &self,
        sender: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
        display: Vec<DisplayBlock>,
        tool_call_id: impl Into<String>,
    ) -> bool {
        if self.inner.yolo {
            return true;
        }
        let action = action.into();

        let (id, response_rx) = {
            let mut state = self.inner.state.lock().expect("approval state poisoned");
            match state.dispositions.get(&action) {
                Some(Disposition::AllowForSession) => return true,
                Some(Disposition::Reject) => return false,
                None => {},
            }
            let id = Uuid::new_v4().to_string();
            let (response_tx, response_rx) = oneshot::channel();
            state.pending.insert(id.clone(), response_tx);
            (id, response_rx)
        };

        let request = ApprovalRequest {
            id: id.clone(),
            tool_call_id: tool_call_id.into(),
            sender: sender.into(),
            action: action.clone(),
            description: description.into(),
            display,
        };
        if self.inner.queue_tx.send(request).is_err() {
            warn!(%action, "Approval queue closed; treating as rejection");
            self.inner
                .state
                .lock()
                .expect("approval state poisoned")
                .pending
                .remove(&id);
            return false;
        }

        let response = response_rx.await.unwrap_or(ApprovalKind::Reject);
        debug!(%action, ?response, "Approval request resolved");

        let mut state = self.inner.state.lock().expect("approval state poisoned");
        match response {
            ApprovalKind::ApproveForSession => {
                state
                    .dispositions
                    .entry(action)
                    .or_insert(Disposition::AllowForSession);
            },
            ApprovalKind::Reject => {
                state.dispositions.entry(action).or_insert(Disposition::Reject);
            },
            ApprovalKind::Approve => {},
        }
        response.is_approved()
    }

    /// Take the next queued request. `None` when the gate is gone.
    ///
    /// Only one drainer should run at a time (the Soul's approval-piping
    /// task); concurrent callers serialize on an internal lock.
    pub async fn fetch_request(&self) -> Option<ApprovalRequest> {
        self.inner.queue_rx.lock().await.recv().await
    }

    /// Resolve a pending request. Duplicate resolutions are dropped.
    pub fn resolve_request(&self, id: &str, response: ApprovalKind) {
        let sender = self
            .inner
            .state
            .lock()
            .expect("approval state poisoned")
            .pending
            .remove(id);
        match sender {
            Some(sender) => {
                // The requester may have been cancelled; that is fine.
                let _ = sender.send(response);
            },
            None => {
                debug!(%id, "Dropping duplicate or unknown approval resolution");
            },
        }
    }
}

impl std::fmt::Debug for Approval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Approval")
            .field("yolo", &self.inner.yolo)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_request(approval: &Approval, action: &str) -> tokio::task::JoinHandle<bool> {
        let approval = approval.share();
        let action = action.to_string();
        tokio::spawn(async move {
            approval
                .request("Shell", action, "Run `echo ok`.", Vec::new(), "tc-1")
                .await
        })
    }

    #[tokio::test]
    async fn test_yolo_bypasses_everything() {
        let approval = Approval::new(true);
        assert!(
            approval
                .request("Shell", "run command", "desc", Vec::new(), "tc-1")
                .await
        );
    }

    #[tokio::test]
    async fn test_approve_once_asks_again() {
        let approval = Approval::new(false);

        for _ in 0..2 {
            let handle = spawn_request(&approval, "run command");
            let request = approval.fetch_request().await.unwrap();
            approval.resolve_request(&request.id, ApprovalKind::Approve);
            assert!(handle.await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_approve_for_session_short_circuits() {
        let approval = Approval::new(false);

        let handle = spawn_request(&approval, "run command");
        let request = approval.fetch_request().await.unwrap();
        approval.resolve_request(&request.id, ApprovalKind::ApproveForSession);
        assert!(handle.await.unwrap());

        // No second ApprovalRequest is emitted for the same action.
        assert!(
            approval
                .request("Shell", "run command", "desc", Vec::new(), "tc-2")
                .await
        );
    }

    #[tokio::test]
    async fn test_reject_is_sticky() {
        let approval = Approval::new(false);

        let handle = spawn_request(&approval, "write file");
        let request = approval.fetch_request().await.unwrap();
        approval.resolve_request(&request.id, ApprovalKind::Reject);
        assert!(!handle.await.unwrap());

        assert!(
            !approval
                .request("WriteFile", "write file", "desc", Vec::new(), "tc-2")
                .await
        );
    }

    #[tokio::test]
    async fn test_duplicate_resolution_dropped() {
        let approval = Approval::new(false);

        let handle = spawn_request(&approval, "run command");
        let request = approval.fetch_request().await.unwrap();
        approval.resolve_request(&request.id, ApprovalKind::Approve);
        // Second resolution with a different answer must be a no-op.
        approval.resolve_request(&request.id, ApprovalKind::Reject);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_requests_each_resolved() {
        let approval = Approval::new(false);

        let first = spawn_request(&approval, "action one");
        let second = spawn_request(&approval, "action two");

        let request_a = approval.fetch_request().await.unwrap();
        let request_b = approval.fetch_request().await.unwrap();
        assert_ne!(request_a.id, request_b.id);

        approval.resolve_request(&request_a.id, ApprovalKind::Approve);
        approval.resolve_request(&request_b.id, ApprovalKind::Reject);

        let (result_a, result_b) = (first.await.unwrap(), second.await.unwrap());
        assert!(result_a != result_b);
    }

    #[tokio::test]
    async fn test_share_sees_session_approvals() {
        let approval = Approval::new(false);
        let shared = approval.share();

        let handle = spawn_request(&approval, "run command");
        let request = approval.fetch_request().await.unwrap();
        approval.resolve_request(&request.id, ApprovalKind::ApproveForSession);
        handle.await.unwrap();

        assert!(
            shared
                .request("Shell", "run command", "desc", Vec::new(), "tc-9")
                .await
        );
    }
}
