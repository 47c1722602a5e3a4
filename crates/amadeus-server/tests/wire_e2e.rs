//! End-to-end wire protocol tests over in-memory pipes.
//!
//! A scripted provider drives the Soul; the test plays the client side of
//! the JSON-RPC surface.

use std::collections::BTreeSet;
use std::sync::Arc;

use amadeus_config::{Config, LoopControl};
use amadeus_core::ToolCall;
use amadeus_llm::{Llm, ScriptTurn, Scripted};
use amadeus_server::WireServer;
use amadeus_session::{Session, ShareDir};
use amadeus_soul::{Runtime, Soul, load_agent};
use amadeus_wire::Wire;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

struct Client {
    reader: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    /// Keeps temp dirs alive.
    #[allow(dead_code)]
    dir: tempfile::TempDir,
}

impl Client {
    async fn send(&mut self, payload: Value) {
        let mut line = payload.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = self
            .reader
            .next_line()
            .await
            .unwrap()
            .expect("server closed unexpectedly");
        serde_json::from_str(&line).unwrap()
    }

    /// Read until the response with `id` arrives, collecting events and
    /// auto-answering approval requests with `approval_answer`.
    async fn run_until_response(
        &mut self,
        id: i64,
        approval_answer: Option<&str>,
    ) -> (Vec<Value>, Value) {
        let mut events = Vec::new();
        loop {
            let message = self.recv().await;
            if message.get("method").and_then(Value::as_str) == Some("event") {
                events.push(message["params"].clone());
                continue;
            }
            if message.get("method").and_then(Value::as_str) == Some("request") {
                let request_id = message["id"].as_str().unwrap().to_string();
                match message["params"]["type"].as_str().unwrap() {
                    "ApprovalRequest" => {
                        let answer = approval_answer.expect("unexpected approval request");
                        self.send(json!({
                            "jsonrpc": "2.0",
                            "id": request_id,
                            "result": {"request_id": request_id, "response": answer},
                        }))
                        .await;
                    },
                    "ToolCallRequest" => {
                        self.send(json!({
                            "jsonrpc": "2.0",
                            "id": request_id,
                            "result": {
                                "tool_call_id": request_id,
                                "return_value": {
                                    "is_error": false,
                                    "output": "external says hi",
                                    "message": "",
                                    "display": []
                                },
                            },
                        }))
                        .await;
                    },
                    other => panic!("unexpected request type {other}"),
                }
                continue;
            }
            if message["id"] == json!(id) {
                return (events, message);
            }
            // A response to some other prompt; surface it to the caller by
            // treating it as unexpected.
            panic!("unexpected message: {message}");
        }
    }
}

async fn start_server(
    turns: Vec<ScriptTurn>,
    yolo: bool,
    loop_control: LoopControl,
    with_llm: bool,
) -> Client {
    let dir = tempfile::tempdir().unwrap();
    let share = ShareDir::from_path(dir.path().join("share"));
    let work_dir = dir.path().join("work");
    tokio::fs::create_dir_all(&work_dir).await.unwrap();
    let session = Session::create(&share, &work_dir).await.unwrap();

    let llm = with_llm.then(|| Llm {
        provider: Arc::new(Scripted::new(turns)),
        max_context_size: 100_000,
        capabilities: BTreeSet::new(),
    });
    let config = Config {
        loop_control,
        ..Config::default()
    };
    let (runtime, context) = Runtime::create(Arc::new(config), llm, session, yolo, None)
        .await
        .unwrap();
    let wire = Wire::new();
    let agent = load_agent(None, runtime, wire.clone()).await.unwrap();
    let soul = Arc::new(Soul::new(agent, context, wire));

    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let (server_read, server_write) = tokio::io::split(server_io);
    tokio::spawn(async move {
        WireServer::new(soul)
            .serve(server_read, server_write)
            .await
            .unwrap();
    });

    let (client_read, client_write) = tokio::io::split(client_io);
    Client {
        reader: BufReader::new(client_read).lines(),
        writer: client_write,
        dir,
    }
}

fn usage(input_other: u64, output: u64) -> Value {
    json!({"input_other": input_other, "output": output})
}

fn shell_turn(text: &str, id: &str, command: &str) -> ScriptTurn {
    ScriptTurn {
        text: Some(text.to_string()),
        tool_calls: vec![ToolCall::new(
            id,
            "Shell",
            Some(json!({"command": command}).to_string()),
        )],
        ..ScriptTurn::default()
    }
}

fn event_types(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .map(|event| event["type"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_initialize_reports_server_and_commands() {
    let mut client = start_server(Vec::new(), true, LoopControl::default(), true).await;

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocol_version": "1", "client": {"name": "test-suite"}},
        }))
        .await;

    let response = client.recv().await;
    assert_eq!(response["id"], 1);
    let result = &response["result"];
    assert_eq!(result["protocol_version"], "1");
    assert_eq!(result["server"]["name"], "amadeus");
    let commands: Vec<&str> = result["slash_commands"]
        .as_array()
        .unwrap()
        .iter()
        .map(|command| command["name"].as_str().unwrap())
        .collect();
    assert!(commands.contains(&"clear"));
    assert!(commands.contains(&"compact"));
}

#[tokio::test]
async fn test_happy_path_prompt() {
    let mut client = start_server(
        vec![ScriptTurn {
            text: Some("Hello wire".to_string()),
            usage: serde_json::from_value(usage(5, 2)).ok(),
            ..ScriptTurn::default()
        }],
        true,
        LoopControl::default(),
        true,
    )
    .await;

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "prompt",
            "params": {"user_input": "hi"},
        }))
        .await;

    let (events, response) = client.run_until_response(2, None).await;
    assert_eq!(response["result"]["status"], "finished");

    let types = event_types(&events);
    let turn_begin = types.iter().position(|t| t == "TurnBegin").unwrap();
    let step_begin = types.iter().position(|t| t == "StepBegin").unwrap();
    let content = types.iter().position(|t| t == "ContentPart").unwrap();
    let status = types.iter().position(|t| t == "StatusUpdate").unwrap();
    assert!(turn_begin < step_begin && step_begin < content && content < status);

    let status_event = &events[status]["payload"];
    assert_eq!(status_event["message_id"], "scripted-1");
    assert_eq!(status_event["token_usage"]["input_other"], 5);
    assert_eq!(status_event["token_usage"]["output"], 2);
    let context_usage = status_event["context_usage"].as_f64().unwrap();
    assert!((context_usage - 5e-05).abs() < 1e-9);
}

#[tokio::test]
async fn test_shell_with_approval_approve() {
    let mut client = start_server(
        vec![
            shell_turn("step1", "tc-1", "echo ok"),
            ScriptTurn {
                text: Some("done".to_string()),
                ..ScriptTurn::default()
            },
        ],
        false,
        LoopControl::default(),
        true,
    )
    .await;

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "prompt",
            "params": {"user_input": "run it"},
        }))
        .await;

    let (events, response) = client.run_until_response(3, Some("approve")).await;
    assert_eq!(response["result"]["status"], "finished");

    let types = event_types(&events);
    assert!(types.contains(&"ApprovalResponse".to_string()));
    let tool_result = events
        .iter()
        .find(|event| event["type"] == "ToolResult")
        .unwrap();
    assert_eq!(tool_result["payload"]["return_value"]["is_error"], false);
    assert_eq!(tool_result["payload"]["return_value"]["output"], "ok\n");
    assert!(events.iter().any(|event| {
        event["type"] == "StepBegin" && event["payload"]["n"] == 2
    }));
}

#[tokio::test]
async fn test_shell_with_approval_reject() {
    let mut client = start_server(
        vec![
            shell_turn("step1", "tc-1", "echo ok"),
            ScriptTurn {
                text: Some("never".to_string()),
                ..ScriptTurn::default()
            },
        ],
        false,
        LoopControl::default(),
        true,
    )
    .await;

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "prompt",
            "params": {"user_input": "run it"},
        }))
        .await;

    let (events, response) = client.run_until_response(4, Some("reject")).await;
    assert_eq!(response["result"]["status"], "finished");

    let tool_result = events
        .iter()
        .find(|event| event["type"] == "ToolResult")
        .unwrap();
    assert_eq!(tool_result["payload"]["return_value"]["is_error"], true);
    assert_eq!(
        tool_result["payload"]["return_value"]["error_kind"],
        "rejected"
    );
    assert!(!events.iter().any(|event| {
        event["type"] == "StepBegin" && event["payload"]["n"] == 2
    }));
}

#[tokio::test]
async fn test_max_steps_reached_status() {
    let todo = ScriptTurn {
        tool_calls: vec![ToolCall::new(
            "tc-1",
            "SetTodoList",
            Some(json!({"items": []}).to_string()),
        )],
        ..ScriptTurn::default()
    };
    let mut client = start_server(
        vec![todo.clone(), todo],
        true,
        LoopControl {
            max_steps_per_turn: 1,
            ..LoopControl::default()
        },
        true,
    )
    .await;

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "prompt",
            "params": {"user_input": "loop"},
        }))
        .await;

    let (_events, response) = client.run_until_response(5, None).await;
    assert_eq!(response["result"]["status"], "max_steps_reached");
    assert_eq!(response["result"]["steps"], 1);
}

#[tokio::test]
async fn test_concurrent_prompt_rejected() {
    let mut client = start_server(
        vec![
            shell_turn("step1", "tc-1", "echo ok"),
            ScriptTurn {
                text: Some("done".to_string()),
                ..ScriptTurn::default()
            },
        ],
        false,
        LoopControl::default(),
        true,
    )
    .await;

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 10,
            "method": "prompt",
            "params": {"user_input": "run it"},
        }))
        .await;

    // Wait for prompt A's approval request, then try prompt B.
    let approval_id = loop {
        let message = client.recv().await;
        if message.get("method").and_then(Value::as_str) == Some("request") {
            break message["id"].as_str().unwrap().to_string();
        }
    };

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 11,
            "method": "prompt",
            "params": {"user_input": "me too"},
        }))
        .await;
    let rejection = loop {
        let message = client.recv().await;
        if message["id"] == json!(11) {
            break message;
        }
    };
    assert_eq!(rejection["error"]["code"], -32000);
    assert_eq!(
        rejection["error"]["message"],
        "An agent turn is already in progress"
    );

    // Prompt A is unaffected: approve and let it finish.
    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": approval_id,
            "result": {"request_id": approval_id, "response": "approve"},
        }))
        .await;
    let (_events, response) = client.run_until_response(10, None).await;
    assert_eq!(response["result"]["status"], "finished");
}

#[tokio::test]
async fn test_prompt_without_llm_fails() {
    let mut client = start_server(Vec::new(), true, LoopControl::default(), false).await;

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "prompt",
            "params": {"user_input": "hi"},
        }))
        .await;

    let (_events, response) = client.run_until_response(6, None).await;
    assert_eq!(response["error"]["code"], -32001);
    assert_eq!(response["error"]["message"], "LLM is not set");
}

#[tokio::test]
async fn test_external_tool_roundtrip() {
    let mut client = start_server(
        vec![
            ScriptTurn {
                tool_calls: vec![ToolCall::new("tc-ext", "browser", Some("{}".to_string()))],
                ..ScriptTurn::default()
            },
            ScriptTurn {
                text: Some("summarized".to_string()),
                ..ScriptTurn::default()
            },
        ],
        true,
        LoopControl::default(),
        true,
    )
    .await;

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "initialize",
            "params": {
                "protocol_version": "1",
                "external_tools": [
                    {"name": "browser", "description": "Open a page.", "parameters": {"type": "object"}},
                    {"name": "Shell", "description": "impostor", "parameters": {"type": "object"}}
                ],
            },
        }))
        .await;
    let response = client.recv().await;
    let external = &response["result"]["external_tools"];
    assert_eq!(external["accepted"], json!(["browser"]));
    assert_eq!(external["rejected"][0]["name"], "Shell");

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "prompt",
            "params": {"user_input": "browse"},
        }))
        .await;
    let (events, response) = client.run_until_response(8, None).await;
    assert_eq!(response["result"]["status"], "finished");

    let tool_result = events
        .iter()
        .find(|event| event["type"] == "ToolResult")
        .unwrap();
    assert_eq!(
        tool_result["payload"]["return_value"]["output"],
        "external says hi"
    );
}

#[tokio::test]
async fn test_cancel_without_turn_is_invalid_state() {
    let mut client = start_server(Vec::new(), true, LoopControl::default(), true).await;

    client
        .send(json!({"jsonrpc": "2.0", "id": 9, "method": "cancel", "params": {}}))
        .await;
    let response = client.recv().await;
    assert_eq!(response["error"]["code"], -32000);
}

#[tokio::test]
async fn test_unknown_method_and_bad_json() {
    let mut client = start_server(Vec::new(), true, LoopControl::default(), true).await;

    client
        .send(json!({"jsonrpc": "2.0", "id": 12, "method": "teleport", "params": {}}))
        .await;
    let response = client.recv().await;
    assert_eq!(response["error"]["code"], -32601);

    client.writer.write_all(b"this is not json\n").await.unwrap();
    let response = client.recv().await;
    assert_eq!(response["error"]["code"], -32700);
    assert!(response["id"].is_null());
}
