//! Shared fixtures: a Soul wired to the scripted provider in a temp share.

use std::collections::BTreeSet;
use std::sync::Arc;

use amadeus_config::{Config, LoopControl};
use amadeus_core::ModelCapability;
use amadeus_llm::{Llm, ScriptTurn, Scripted};
use amadeus_session::{Session, ShareDir};
use amadeus_soul::{Runtime, Soul, load_agent};
use amadeus_wire::{Wire, WireEvent, WireMessage, WireSubscriber};

pub struct TestSoul {
    pub soul: Soul,
    pub wire: Wire,
    /// Keeps the share/work directories alive for the test's duration.
    #[allow(dead_code)]
    pub dir: tempfile::TempDir,
}

pub async fn scripted_soul(
    turns: Vec<ScriptTurn>,
    yolo: bool,
    loop_control: LoopControl,
    max_context_size: u64,
) -> TestSoul {
    let dir = tempfile::tempdir().unwrap();
    let share = ShareDir::from_path(dir.path().join("share"));
    let work_dir = dir.path().join("work");
    tokio::fs::create_dir_all(&work_dir).await.unwrap();

    let session = Session::create(&share, &work_dir).await.unwrap();

    let llm = Llm {
        provider: Arc::new(Scripted::new(turns)),
        max_context_size,
        capabilities: BTreeSet::from([ModelCapability::Thinking]),
    };

    let config = Config {
        loop_control,
        ..Config::default()
    };

    let (runtime, context) = Runtime::create(Arc::new(config), Some(llm), session, yolo, None)
        .await
        .unwrap();
    let wire = Wire::new();
    let agent = load_agent(None, runtime, wire.clone()).await.unwrap();
    let soul = Soul::new(agent, context, wire.clone());

    TestSoul { soul, wire, dir }
}

/// Drain every event currently queued on the subscriber.
pub fn drain_events(subscriber: &mut WireSubscriber) -> Vec<WireEvent> {
    let mut events = Vec::new();
    while let Some(message) = subscriber.try_receive() {
        if let WireMessage::Event(event) = message {
            events.push(event);
        }
    }
    events
}

/// Index of the first event matching `predicate`, or panic.
#[allow(dead_code)]
pub fn position(events: &[WireEvent], what: &str, predicate: impl Fn(&WireEvent) -> bool) -> usize {
    events
        .iter()
        .position(predicate)
        .unwrap_or_else(|| panic!("no {what} event in {events:?}"))
}
