//! The turn/step loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use amadeus_core::{
    ContentPart, Message, MessageContent, Role, TokenUsage, ToolCall, ToolResult, check_message,
};
use amadeus_llm::{Llm, StreamEvent};
use amadeus_session::Context;
use amadeus_wire::{StatusUpdate, Wire, WireEvent, WireMessage, WireRequest};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::compaction::{Compaction, SimpleCompaction};
use crate::flow::FlowRunner;
use crate::skill::SkillKind;
use crate::slash::{SlashCommand, SlashCommandKind, builtin_commands, parse_slash_command_call};
use crate::subagent::LaborMarketSpawner;
use crate::{SoulError, SoulResult, flow};

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced no further tool calls.
    NoToolCalls,
    /// The user rejected a tool call.
    ToolRejected,
}

/// The outcome of one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Why the step stopped the turn.
    pub stop_reason: StopReason,
    /// The assistant message of this step.
    pub assistant_message: Message,
}

/// The outcome of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Why the turn stopped.
    pub stop_reason: StopReason,
    /// The final assistant message, present on a natural stop.
    pub final_message: Option<Message>,
    /// How many steps ran.
    pub step_count: usize,
}

/// What the agent loop should do after a step.
enum StepFlow {
    /// Stop the turn.
    Stop(StepOutcome),
    /// Run another step.
    Continue,
    /// A D-Mail arrived: rewind and re-enter the loop.
    Rewind {
        checkpoint_id: usize,
        messages: Vec<Message>,
    },
}

/// Everything one LLM stream produced.
struct StreamedStep {
    parts: Vec<ContentPart>,
    tool_calls: Vec<ToolCall>,
    usage: TokenUsage,
    message_id: String,
}

/// The Soul: one per interactive session.
pub struct Soul {
    agent: Arc<Agent>,
    context: Arc<tokio::sync::Mutex<Context>>,
    wire: Wire,
    slash_commands: Vec<SlashCommand>,
    compaction: Arc<dyn Compaction>,
    cancel: Mutex<CancellationToken>,
}

impl Soul {
    /// Create a Soul for an agent and its conversation.
    #[must_use]
    pub fn new(agent: Arc<Agent>, context: Arc<tokio::sync::Mutex<Context>>, wire: Wire) -> Self {
        let mut slash_commands = builtin_commands();
        for skill in agent.runtime.skills.values() {
            slash_commands.push(SlashCommand {
                name: format!("skill:{}", skill.name),
                description: skill.description.clone(),
                aliases: Vec::new(),
                kind: SlashCommandKind::Skill(skill.clone()),
            });
        }
        for skill in agent.runtime.skills.values() {
            if skill.kind == SkillKind::Flow {
                slash_commands.push(SlashCommand {
                    name: format!("flow:{}", skill.name),
                    description: skill.description.clone(),
                    aliases: Vec::new(),
                    kind: SlashCommandKind::Flow(skill.clone()),
                });
            }
        }

        Self {
            agent,
            context,
            wire,
            slash_commands,
            compaction: Arc::new(SimpleCompaction),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Replace the compaction policy.
    #[must_use]
    pub fn with_compaction(mut self, compaction: Arc<dyn Compaction>) -> Self {
        self.compaction = compaction;
        self
    }

    /// The agent this Soul runs.
    #[must_use]
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// The soul-side wire handle.
    #[must_use]
    pub fn wire(&self) -> &Wire {
        &self.wire
    }

    /// Registered slash commands.
    #[must_use]
    pub fn available_slash_commands(&self) -> &[SlashCommand] {
        &self.slash_commands
    }

    /// The current model name, empty when no LLM is set.
    #[must_use]
    pub fn model_name(&self) -> String {
        self.agent
            .runtime
            .llm
            .as_ref()
            .map(|llm| llm.model_name().to_string())
            .unwrap_or_default()
    }

    /// A snapshot of the conversation history.
    pub async fn history(&self) -> Vec<Message> {
        self.context.lock().await.history().to_vec()
    }

    /// Current status snapshot.
    pub async fn status(&self) -> StatusUpdate {
        let token_count = self.context.lock().await.token_count();
        let context_usage = self.agent.runtime.llm.as_ref().map(|llm| {
            #[allow(clippy::cast_precision_loss)]
            let usage = token_count as f64 / llm.max_context_size.max(1) as f64;
            usage
        });
        StatusUpdate {
            context_usage,
            token_usage: None,
            message_id: None,
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().expect("cancel token poisoned").clone()
    }

    /// Run one user prompt to completion.
    ///
    /// Slash commands dispatch to their handlers; a non-zero ralph budget
    /// rewrites the prompt into the ralph flow; everything else is a plain
    /// turn.
    ///
    /// # Errors
    ///
    /// See [`SoulError`]; `MaxStepsReached` and `Cancelled` are normal
    /// stop conditions surfaced as errors for the frontend to map.
    pub async fn run(
        &self,
        user_input: MessageContent,
        cancel: CancellationToken,
    ) -> SoulResult<()> {
        *self.cancel.lock().expect("cancel token poisoned") = cancel;

        let user_message = Message {
            role: Role::User,
            content: user_input.clone(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        };
        let text_input = user_message.extract_text(" ").trim().to_string();

        if let Some(call) = parse_slash_command_call(&text_input) {
            // Unregistered /foo inputs fall through as ordinary prompts;
            // the shell layer filters them earlier if desired.
            let command = self
                .slash_commands
                .iter()
                .find(|command| command.matches(&call.name))
                .cloned();
            if let Some(command) = command {
                self.wire.send(WireEvent::TurnBegin {
                    user_input: user_input.clone(),
                });
                return self.execute_command(&command, &call.args).await;
            }
        }

        let max_ralph = self.agent.runtime.config.loop_control.max_ralph_iterations;
        if max_ralph != 0 {
            let runner = FlowRunner::ralph_loop(&text_input, max_ralph);
            runner.run(self, "").await?;
            return Ok(());
        }

        self.wire.send(WireEvent::TurnBegin { user_input });
        let _ = self.turn(user_message).await?;
        Ok(())
    }

    async fn execute_command(&self, command: &SlashCommand, args: &str) -> SoulResult<()> {
        match &command.kind {
            SlashCommandKind::Clear => {
                let mut context = self.context.lock().await;
                context.clear().await?;
                self.agent.runtime.denwa.set_n_checkpoints(0);
                drop(context);
                self.wire
                    .send(WireEvent::ContentPart(ContentPart::text("Context cleared.")));
                Ok(())
            },
            SlashCommandKind::Compact => self.compact_context().await,
            SlashCommandKind::Skill(skill) => {
                let Some(body) = skill.read_body().await else {
                    self.wire.send(WireEvent::ContentPart(ContentPart::text(format!(
                        "Failed to load skill \"/skill:{}\".",
                        skill.name
                    ))));
                    return Ok(());
                };
                let prompt = if args.trim().is_empty() {
                    body
                } else {
                    format!("{body}\n\nUser request:\n{}", args.trim())
                };
                let _ = self.turn(Message::user(prompt)).await?;
                Ok(())
            },
            SlashCommandKind::Flow(skill) => {
                let Some(source) = skill.read_flow_source().await else {
                    self.wire.send(WireEvent::ContentPart(ContentPart::text(format!(
                        "Skill \"/flow:{}\" has no flowchart.",
                        skill.name
                    ))));
                    return Ok(());
                };
                let parsed = flow::parse_flow(&source)?;
                FlowRunner::new(parsed, Some(skill.name.clone()))
                    .run(self, args)
                    .await
            },
        }
    }

    /// Run one turn: capability check, checkpoint, append, agent loop.
    pub(crate) async fn turn(&self, user_message: Message) -> SoulResult<TurnOutcome> {
        let llm = self
            .agent
            .runtime
            .llm
            .as_ref()
            .ok_or(SoulError::LlmNotSet)?
            .clone();

        let missing = check_message(&user_message, &llm.capabilities);
        if !missing.is_empty() {
            return Err(SoulError::LlmNotSupported(missing.into_iter().collect()));
        }

        // The live subagent spawner for this turn.
        self.agent
            .spawner_slot
            .set(Some(Arc::new(LaborMarketSpawner::new(
                Arc::clone(&self.agent),
                self.wire.clone(),
            ))));

        {
            // The entry checkpoint: on the first turn this is checkpoint 0,
            // placed before the user's message so a rewind replays it.
            let mut context = self.context.lock().await;
            context.checkpoint(false);
            context.append_message(user_message).await?;
        }
        debug!("Appended user message to context");

        self.agent_loop(&llm).await
    }

    async fn agent_loop(&self, llm: &Llm) -> SoulResult<TurnOutcome> {
        self.agent.toolset.wait_for_mcp_tools().await;
        let loop_control = self.agent.runtime.config.loop_control;

        let mut step_no: usize = 0;
        loop {
            step_no = step_no.saturating_add(1);
            if step_no > loop_control.max_steps_per_turn {
                return Err(SoulError::MaxStepsReached(loop_control.max_steps_per_turn));
            }

            let approval_pipe = self.spawn_approval_pipe();
            let step_result = async {
                // The reserve absorbs the usage of the step we have not
                // run yet.
                let token_count = self.context.lock().await.token_count();
                if token_count.saturating_add(loop_control.reserved_context_size)
                    >= llm.max_context_size
                {
                    info!(token_count, "Context too long, compacting");
                    self.compact_context().await?;
                }

                {
                    let mut context = self.context.lock().await;
                    context.checkpoint(true);
                    self.agent
                        .runtime
                        .denwa
                        .set_n_checkpoints(context.n_checkpoints());
                }

                debug!(step_no, "Beginning step");
                self.wire.send(WireEvent::StepBegin { n: step_no });
                self.step(llm).await
            }
            .await;
            approval_pipe.abort();

            let step_flow = match step_result {
                Ok(step_flow) => step_flow,
                Err(error) => {
                    self.wire.send(WireEvent::StepInterrupted);
                    return Err(error);
                },
            };

            match step_flow {
                StepFlow::Stop(outcome) => {
                    let final_message = match outcome.stop_reason {
                        StopReason::NoToolCalls => Some(outcome.assistant_message),
                        StopReason::ToolRejected => None,
                    };
                    return Ok(TurnOutcome {
                        stop_reason: outcome.stop_reason,
                        final_message,
                        step_count: step_no,
                    });
                },
                StepFlow::Continue => {},
                StepFlow::Rewind {
                    checkpoint_id,
                    messages,
                } => {
                    let mut context = self.context.lock().await;
                    context.revert_to(checkpoint_id).await?;
                    context.checkpoint(true);
                    self.agent
                        .runtime
                        .denwa
                        .set_n_checkpoints(context.n_checkpoints());
                    for message in messages {
                        context.append_message(message).await?;
                    }
                },
            }
        }
    }

    /// Drain approval requests to the wire for the duration of one step.
    fn spawn_approval_pipe(&self) -> JoinHandle<()> {
        let approval = self.agent.runtime.approval.share();
        let wire = self.wire.clone();
        tokio::spawn(async move {
            while let Some(request) = approval.fetch_request().await {
                let request_id = request.id.clone();
                let wire_request = amadeus_wire::ApprovalRequest::from_gate(request);
                wire.send(WireMessage::Request(WireRequest::Approval(
                    wire_request.clone(),
                )));
                // One wire approval request in flight per soul at a time;
                // subagents pipe through their own souls.
                let response = wire_request.wait().await;
                approval.resolve_request(&request_id, response);
                wire.send(WireEvent::ApprovalResponse {
                    request_id,
                    response,
                });
            }
        })
    }

    /// Run one step and decide what the loop does next.
    async fn step(&self, llm: &Llm) -> SoulResult<StepFlow> {
        let cancel = self.cancel_token();
        let loop_control = self.agent.runtime.config.loop_control;

        // The LLM request with retry. Transient provider failures back off
        // exponentially with jitter; everything else surfaces immediately.
        let mut attempt: usize = 0;
        let streamed = loop {
            attempt = attempt.saturating_add(1);
            match self.stream_once(llm, &cancel).await {
                Ok(streamed) => break streamed,
                Err(SoulError::ChatProvider(error))
                    if error.is_retryable() && attempt < loop_control.max_retries_per_step =>
                {
                    let delay = retry_delay(attempt);
                    info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "Retrying step after provider error"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(error) => return Err(error),
            }
        };
        debug!(
            message_id = %streamed.message_id,
            n_tool_calls = streamed.tool_calls.len(),
            "Step stream finished"
        );

        // Account the prompt that was actually used, then report status.
        let context_usage = {
            let mut context = self.context.lock().await;
            context.update_token_count(streamed.usage.input());
            #[allow(clippy::cast_precision_loss)]
            let usage = context.token_count() as f64 / llm.max_context_size.max(1) as f64;
            usage
        };
        self.wire.send(WireEvent::StatusUpdate(StatusUpdate {
            context_usage: Some(context_usage),
            token_usage: Some(streamed.usage),
            message_id: Some(streamed.message_id.clone()),
        }));

        let assistant_message = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(streamed.parts),
            tool_calls: streamed.tool_calls.clone(),
            tool_call_id: None,
        };

        // Resolve tool calls concurrently, emitting each result as it
        // settles. A cancel aborts whatever is still running.
        let mut abort_handles = Vec::new();
        let mut futures = FuturesUnordered::new();
        for tool_call in &streamed.tool_calls {
            let handled = self.agent.toolset.handle(tool_call);
            if let amadeus_toolset::HandleResult::Pending { handle, .. } = &handled {
                abort_handles.push(handle.abort_handle());
            }
            futures.push(handled.result());
        }
        let mut results: Vec<ToolResult> = Vec::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    for abort in &abort_handles {
                        abort.abort();
                    }
                    return Err(SoulError::Cancelled);
                },
                next = futures.next() => match next {
                    Some(result) => {
                        self.wire.send(WireEvent::ToolResult(result.clone()));
                        results.push(result);
                    },
                    None => break,
                },
            }
        }

        // Shielded growth: the context gains the assistant message and all
        // tool results even if this future is dropped mid-await.
        let tool_messages: Vec<Message> = results.iter().map(tool_result_to_message).collect();
        {
            let context = Arc::clone(&self.context);
            let assistant = assistant_message.clone();
            let messages = tool_messages.clone();
            let growth = tokio::spawn(async move {
                let mut context = context.lock().await;
                context.append_message(assistant).await?;
                context.append_messages(messages).await?;
                Ok::<(), amadeus_session::SessionError>(())
            });
            growth
                .await
                .map_err(|error| SoulError::Internal(format!("context growth task failed: {error}")))??;
        }

        // Media in tool outputs the model cannot read: the growth already
        // committed, so this surfaces for the next step.
        for tool_message in &tool_messages {
            let missing = check_message(tool_message, &llm.capabilities);
            if !missing.is_empty() {
                warn!(?missing, "Tool result needs unsupported capabilities");
                return Err(SoulError::LlmNotSupported(missing.into_iter().collect()));
            }
        }

        if cancel.is_cancelled() {
            return Err(SoulError::Cancelled);
        }

        let denwa = &self.agent.runtime.denwa;
        if results.iter().any(|result| result.return_value.is_rejected()) {
            // The rejected tool logically failed; its D-Mail dies with it.
            let _ = denwa.fetch_pending_dmail();
            return Ok(StepFlow::Stop(StepOutcome {
                stop_reason: StopReason::ToolRejected,
                assistant_message,
            }));
        }

        if let Some(mail) = denwa.fetch_pending_dmail() {
            return Ok(StepFlow::Rewind {
                checkpoint_id: mail.checkpoint_id,
                messages: vec![dmail_message(&mail.message)],
            });
        }

        if streamed.tool_calls.is_empty() {
            return Ok(StepFlow::Stop(StepOutcome {
                stop_reason: StopReason::NoToolCalls,
                assistant_message,
            }));
        }
        Ok(StepFlow::Continue)
    }

    /// One `generate` call: stream everything to the wire and accumulate.
    async fn stream_once(&self, llm: &Llm, cancel: &CancellationToken) -> SoulResult<StreamedStep> {
        let history = self.context.lock().await.history().to_vec();
        let tools = self.agent.toolset.tools();
        let mut stream = llm
            .provider
            .generate(&self.agent.system_prompt, &tools, &history)
            .await?;

        let mut parts: Vec<ContentPart> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut message_id = String::new();

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return Err(SoulError::Cancelled),
                event = stream.next() => event,
            };
            let Some(event) = event else { break };
            match event? {
                StreamEvent::Part(part) => {
                    self.wire.send(WireEvent::ContentPart(part.clone()));
                    push_part(&mut parts, part);
                },
                StreamEvent::ToolCallBegin(mut call) => {
                    self.wire.send(WireEvent::ToolCall(call.clone()));
                    if call.function.arguments.is_none() {
                        call.function.arguments = Some(String::new());
                    }
                    tool_calls.push(call);
                },
                StreamEvent::ToolCallDelta { arguments_delta } => {
                    self.wire.send(WireEvent::ToolCallPart {
                        arguments_delta: arguments_delta.clone(),
                    });
                    if let Some(call) = tool_calls.last_mut() {
                        call.function
                            .arguments
                            .get_or_insert_with(String::new)
                            .push_str(&arguments_delta);
                    }
                },
                StreamEvent::Usage {
                    usage: reported,
                    message_id: id,
                } => {
                    usage = reported;
                    message_id = id;
                },
            }
        }

        Ok(StreamedStep {
            parts,
            tool_calls,
            usage,
            message_id,
        })
    }

    /// Compact the context into a summary prefix.
    ///
    /// # Errors
    ///
    /// Returns [`SoulError::LlmNotSet`] without an LLM, or the provider
    /// error once retries are exhausted.
    pub async fn compact_context(&self) -> SoulResult<()> {
        let llm = self
            .agent
            .runtime
            .llm
            .as_ref()
            .ok_or(SoulError::LlmNotSet)?
            .clone();
        let loop_control = self.agent.runtime.config.loop_control;

        self.wire.send(WireEvent::CompactionBegin);

        let mut attempt: usize = 0;
        let compacted = loop {
            attempt = attempt.saturating_add(1);
            let history = self.context.lock().await.history().to_vec();
            match self.compaction.compact(&history, &llm).await {
                Ok(messages) => break messages,
                Err(error)
                    if error.is_retryable() && attempt < loop_control.max_retries_per_step =>
                {
                    let delay = retry_delay(attempt);
                    info!(attempt, %error, "Retrying compaction after provider error");
                    tokio::time::sleep(delay).await;
                },
                Err(error) => return Err(SoulError::ChatProvider(error)),
            }
        };

        let mut context = self.context.lock().await;
        context.clear().await?;
        context.checkpoint(true);
        self.agent
            .runtime
            .denwa
            .set_n_checkpoints(context.n_checkpoints());
        context.append_messages(compacted).await?;
        drop(context);

        self.wire.send(WireEvent::CompactionEnd);
        Ok(())
    }
}

impl std::fmt::Debug for Soul {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Soul")
            .field("agent", &self.agent.name)
            .finish_non_exhaustive()
    }
}

/// Merge streaming deltas: adjacent text/think parts coalesce.
fn push_part(parts: &mut Vec<ContentPart>, part: ContentPart) {
    match (parts.last_mut(), part) {
        (Some(ContentPart::Text { text }), ContentPart::Text { text: delta }) => {
            text.push_str(&delta);
        },
        (Some(ContentPart::Think { think }), ContentPart::Think { think: delta }) => {
            think.push_str(&delta);
        },
        (_, part) => parts.push(part),
    }
}

/// Exponential backoff with jitter: 0.3s doubling, capped at 5s, plus up
/// to 0.5s of jitter.
fn retry_delay(attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(8);
    let base = 0.3_f64 * f64::from(2_u32.saturating_pow(exponent));
    let jitter = rand::thread_rng().gen_range(0.0..0.5);
    Duration::from_secs_f64(base.min(5.0) + jitter)
}

/// Convert a tool result into the tool message the model reads.
fn tool_result_to_message(result: &ToolResult) -> Message {
    let value = &result.return_value;
    let content = match &value.output {
        amadeus_core::ToolOutput::Text(text) => {
            let mut combined = text.clone();
            if !value.message.is_empty() {
                if !combined.is_empty() {
                    combined.push_str("\n\n");
                }
                combined.push_str(&value.message);
            }
            MessageContent::Text(combined)
        },
        amadeus_core::ToolOutput::Parts(parts) => {
            let mut parts = parts.clone();
            if !value.message.is_empty() {
                parts.push(ContentPart::text(value.message.clone()));
            }
            MessageContent::Parts(parts)
        },
    };
    Message {
        role: Role::Tool,
        content,
        tool_calls: Vec::new(),
        tool_call_id: Some(result.tool_call_id.clone()),
    }
}

fn dmail_message(content: &str) -> Message {
    Message::user(format!(
        "You just got a D-Mail from your future self. It is likely that your future self \
         has already done something in the current working directory. Please read the \
         D-Mail and decide what to do next. You MUST NEVER mention to the user about this \
         information. D-Mail content:\n\n{}",
        content.trim(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_part_merges_adjacent_text() {
        let mut parts = Vec::new();
        push_part(&mut parts, ContentPart::text("Hello "));
        push_part(&mut parts, ContentPart::text("wire"));
        push_part(
            &mut parts,
            ContentPart::Think {
                think: "hm".to_string(),
            },
        );
        push_part(
            &mut parts,
            ContentPart::Think {
                think: "m".to_string(),
            },
        );
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], ContentPart::text("Hello wire"));
        assert_eq!(
            parts[1],
            ContentPart::Think {
                think: "hmm".to_string()
            }
        );
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let first = retry_delay(1);
        assert!(first >= Duration::from_secs_f64(0.3));
        assert!(first < Duration::from_secs_f64(0.81));

        let late = retry_delay(10);
        assert!(late <= Duration::from_secs_f64(5.5));
    }

    #[test]
    fn test_tool_result_message_combines_output_and_note() {
        let result = ToolResult {
            tool_call_id: "tc-1".to_string(),
            return_value: amadeus_core::ToolReturnValue {
                is_error: false,
                output: "ok\n".into(),
                message: "Command exited with code 0.".to_string(),
                display: Vec::new(),
                error_kind: None,
            },
        };
        let message = tool_result_to_message(&result);
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("tc-1"));
        assert!(message.extract_text(" ").contains("ok"));
        assert!(message.extract_text(" ").contains("code 0"));
    }

    #[test]
    fn test_dmail_message_carries_content() {
        let message = dmail_message("  the build is broken on main  ");
        assert_eq!(message.role, Role::User);
        assert!(message.extract_text(" ").contains("the build is broken on main"));
        assert!(message.extract_text(" ").contains("future self"));
    }
}
