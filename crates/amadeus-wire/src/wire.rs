//! The Wire itself: non-blocking fan-out to any number of subscribers.

use std::sync::{Arc, Mutex};

use amadeus_core::ContentPart;
use tokio::sync::mpsc;
use tracing::trace;

use crate::file::WireFile;
use crate::types::{WireEvent, WireMessage, WireRequest};

struct WireInner {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<WireMessage>>>,
    outstanding: Mutex<Vec<WireRequest>>,
    file: Option<WireFile>,
}

/// The soul-side producer handle. Cheap to clone.
///
/// Sends never suspend: each subscriber gets its own unbounded queue, and a
/// subscriber that went away is silently dropped on the next send.
#[derive(Clone)]
pub struct Wire {
    inner: Arc<WireInner>,
}

impl Wire {
    /// Create a wire with no file tee.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a wire that tees every message to `file`.
    #[must_use]
    pub fn with_file(file: WireFile) -> Self {
        Self::build(Some(file))
    }

    fn build(file: Option<WireFile>) -> Self {
        Self {
            inner: Arc::new(WireInner {
                subscribers: Mutex::new(Vec::new()),
                outstanding: Mutex::new(Vec::new()),
                file,
            }),
        }
    }

    /// Send a message to every live subscriber.
    pub fn send(&self, message: impl Into<WireMessage>) {
        let message = message.into();
        trace!(kind = %message.to_envelope().kind, "Wire send");

        if let Some(file) = &self.inner.file {
            file.record(&message);
        }
        if let WireMessage::Request(request) = &message {
            let mut outstanding = self.inner.outstanding.lock().expect("wire state poisoned");
            outstanding.retain(|pending| !pending.resolved());
            outstanding.push(request.clone());
        }

        let mut subscribers = self.inner.subscribers.lock().expect("wire state poisoned");
        subscribers.retain(|subscriber| subscriber.send(message.clone()).is_ok());
    }

    /// Attach a UI-side subscriber.
    ///
    /// `merge` collapses runs of adjacent `text`/`think` content parts that
    /// are already queued into single parts, which simplifies rendering.
    #[must_use]
    pub fn ui_side(&self, merge: bool) -> WireSubscriber {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .expect("wire state poisoned")
            .push(tx);
        WireSubscriber {
            rx,
            merge,
            stashed: None,
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("wire state poisoned").len()
    }

    /// Close the wire: drop all subscribers and resolve outstanding
    /// requests with the canned closed-wire outcome.
    pub fn close(&self) {
        self.inner
            .subscribers
            .lock()
            .expect("wire state poisoned")
            .clear();
        let outstanding = std::mem::take(
            &mut *self.inner.outstanding.lock().expect("wire state poisoned"),
        );
        for request in outstanding {
            if !request.resolved() {
                request.resolve_closed();
            }
        }
    }
}

impl Default for Wire {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("subscribers", &self.subscriber_count())
            .field("has_file", &self.inner.file.is_some())
            .finish()
    }
}

/// A UI-side consumer.
pub struct WireSubscriber {
    rx: mpsc::UnboundedReceiver<WireMessage>,
    merge: bool,
    stashed: Option<WireMessage>,
}

impl WireSubscriber {
    /// Receive the next queued message without waiting.
    ///
    /// Returns `None` when nothing is queued. No merging is applied.
    pub fn try_receive(&mut self) -> Option<WireMessage> {
        if let Some(message) = self.stashed.take() {
            return Some(message);
        }
        self.rx.try_recv().ok()
    }

    /// Receive the next message. `None` once the wire is closed and drained.
    pub async fn receive(&mut self) -> Option<WireMessage> {
        let message = match self.stashed.take() {
            Some(message) => message,
            None => self.rx.recv().await?,
        };
        if !self.merge {
            return Some(message);
        }

        let WireMessage::Event(WireEvent::ContentPart(first)) = message else {
            return Some(message);
        };
        let mut merged = first;
        // Greedily merge parts that are already queued; never wait for more.
        loop {
            match self.rx.try_recv() {
                Ok(WireMessage::Event(WireEvent::ContentPart(next))) => {
                    match merge_parts(merged, next) {
                        Ok(part) => merged = part,
                        Err((kept, unmerged)) => {
                            self.stashed =
                                Some(WireMessage::Event(WireEvent::ContentPart(unmerged)));
                            return Some(WireMessage::Event(WireEvent::ContentPart(kept)));
                        },
                    }
                },
                Ok(other) => {
                    self.stashed = Some(other);
                    break;
                },
                Err(_) => break,
            }
        }
        Some(WireMessage::Event(WireEvent::ContentPart(merged)))
    }
}

/// Merge `next` into `current` when both are the same textual kind.
fn merge_parts(
    current: ContentPart,
    next: ContentPart,
) -> Result<ContentPart, (ContentPart, ContentPart)> {
    match (current, next) {
        (ContentPart::Text { text: mut a }, ContentPart::Text { text: b }) => {
            a.push_str(&b);
            Ok(ContentPart::Text { text: a })
        },
        (ContentPart::Think { think: mut a }, ContentPart::Think { think: b }) => {
            a.push_str(&b);
            Ok(ContentPart::Think { think: a })
        },
        (current, next) => Err((current, next)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amadeus_approval::ApprovalKind;
    use amadeus_core::ToolCall;
    use crate::types::ToolCallRequest;

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let wire = Wire::new();
        let mut first = wire.ui_side(false);
        let mut second = wire.ui_side(false);

        wire.send(WireEvent::StepBegin { n: 1 });

        for subscriber in [&mut first, &mut second] {
            let message = subscriber.receive().await.unwrap();
            assert_eq!(message, WireMessage::Event(WireEvent::StepBegin { n: 1 }));
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let wire = Wire::new();
        let first = wire.ui_side(false);
        let _second = wire.ui_side(false);
        assert_eq!(wire.subscriber_count(), 2);

        drop(first);
        wire.send(WireEvent::StepBegin { n: 1 });
        assert_eq!(wire.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_adjacent_text_parts() {
        let wire = Wire::new();
        let mut subscriber = wire.ui_side(true);

        wire.send(WireEvent::ContentPart(ContentPart::text("Hello ")));
        wire.send(WireEvent::ContentPart(ContentPart::text("wire")));
        wire.send(WireEvent::StepBegin { n: 2 });

        let merged = subscriber.receive().await.unwrap();
        assert_eq!(
            merged,
            WireMessage::Event(WireEvent::ContentPart(ContentPart::text("Hello wire")))
        );
        let next = subscriber.receive().await.unwrap();
        assert_eq!(next, WireMessage::Event(WireEvent::StepBegin { n: 2 }));
    }

    #[tokio::test]
    async fn test_merge_does_not_cross_kinds() {
        let wire = Wire::new();
        let mut subscriber = wire.ui_side(true);

        wire.send(WireEvent::ContentPart(ContentPart::text("answer")));
        wire.send(WireEvent::ContentPart(ContentPart::Think {
            think: "trace".to_string(),
        }));

        let first = subscriber.receive().await.unwrap();
        assert_eq!(
            first,
            WireMessage::Event(WireEvent::ContentPart(ContentPart::text("answer")))
        );
        let second = subscriber.receive().await.unwrap();
        assert!(matches!(
            second,
            WireMessage::Event(WireEvent::ContentPart(ContentPart::Think { .. }))
        ));
    }

    #[tokio::test]
    async fn test_close_resolves_outstanding_requests() {
        let wire = Wire::new();
        let _subscriber = wire.ui_side(false);

        let call = ToolCall::new("tc-1", "browser", None);
        let request = ToolCallRequest::from_tool_call(&call);
        wire.send(WireMessage::Request(WireRequest::ToolCall(request.clone())));

        wire.close();
        let value = request.wait().await;
        assert!(value.is_error);
        assert_eq!(value.brief(), "Wire closed");
    }

    #[tokio::test]
    async fn test_send_never_blocks_without_subscribers() {
        let wire = Wire::new();
        // No subscribers at all; sending must be a no-op, not a hang.
        wire.send(WireEvent::ApprovalResponse {
            request_id: "r-1".to_string(),
            response: ApprovalKind::Approve,
        });
    }
}
