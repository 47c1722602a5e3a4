//! The ralph loop: one prompt repeated until the model says STOP, bounded
//! by `max_ralph_iterations`.

mod common;

use amadeus_config::LoopControl;
use amadeus_core::MessageContent;
use amadeus_llm::ScriptTurn;
use amadeus_soul::SoulError;
use amadeus_wire::WireEvent;
use common::{drain_events, scripted_soul};
use tokio_util::sync::CancellationToken;

fn text_turn(text: &str) -> ScriptTurn {
    ScriptTurn {
        text: Some(text.to_string()),
        ..ScriptTurn::default()
    }
}

fn ralph_control(iterations: i64) -> LoopControl {
    LoopControl {
        max_ralph_iterations: iterations,
        ..LoopControl::default()
    }
}

#[tokio::test]
async fn test_ralph_stops_on_stop_choice() {
    let fixture = scripted_soul(
        vec![
            text_turn("working on it"),
            text_turn("not sure yet <choice>CONTINUE</choice>"),
            text_turn("all finished <choice>STOP</choice>"),
        ],
        true,
        ralph_control(5),
        100_000,
    )
    .await;
    let mut subscriber = fixture.wire.ui_side(false);

    fixture
        .soul
        .run(
            MessageContent::Text("fix the flaky test".to_string()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = drain_events(&mut subscriber);
    let turns = events
        .iter()
        .filter(|event| matches!(event, WireEvent::TurnBegin { .. }))
        .count();
    // Task turn + two decision turns.
    assert_eq!(turns, 3);

    // The decision prompts carry the loop instructions and the branches.
    let decision_prompts: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            WireEvent::TurnBegin {
                user_input: MessageContent::Text(text),
            } if text.contains("automated loop") => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(decision_prompts.len(), 2);
    assert!(decision_prompts[0].contains("- CONTINUE"));
    assert!(decision_prompts[0].contains("- STOP"));
}

#[tokio::test]
async fn test_ralph_iteration_budget_is_hard() {
    // With a budget of 1 the flow may make two moves (task + decision);
    // an endless CONTINUE answer then trips the bound.
    let fixture = scripted_soul(
        vec![
            text_turn("working"),
            text_turn("<choice>CONTINUE</choice>"),
            text_turn("<choice>CONTINUE</choice>"),
        ],
        true,
        ralph_control(1),
        100_000,
    )
    .await;

    let error = fixture
        .soul
        .run(
            MessageContent::Text("never finish".to_string()),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, SoulError::MaxStepsReached(_)));
}

#[tokio::test]
async fn test_ralph_zero_budget_is_a_plain_turn() {
    let fixture = scripted_soul(
        vec![text_turn("just a normal answer")],
        true,
        ralph_control(0),
        100_000,
    )
    .await;
    let mut subscriber = fixture.wire.ui_side(false);

    fixture
        .soul
        .run(
            MessageContent::Text("hello".to_string()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = drain_events(&mut subscriber);
    let turns = events
        .iter()
        .filter(|event| matches!(event, WireEvent::TurnBegin { .. }))
        .count();
    assert_eq!(turns, 1);

    let history = fixture.soul.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].extract_text(" "), "hello");
}

#[tokio::test]
async fn test_ralph_invalid_choice_reprompts() {
    let fixture = scripted_soul(
        vec![
            text_turn("working"),
            text_turn("I pick MAYBE"),
            text_turn("fine <choice>STOP</choice>"),
        ],
        true,
        ralph_control(3),
        100_000,
    )
    .await;
    let mut subscriber = fixture.wire.ui_side(false);

    fixture
        .soul
        .run(
            MessageContent::Text("do it".to_string()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = drain_events(&mut subscriber);
    let reprompts = events
        .iter()
        .filter(|event| match event {
            WireEvent::TurnBegin {
                user_input: MessageContent::Text(text),
            } => text.contains("did not include a valid choice"),
            _ => false,
        })
        .count();
    assert_eq!(reprompts, 1);
}
