//! Flows: labeled digraphs of prompt steps the Soul walks.
//!
//! A flow has exactly one `begin` and one `end`. Task nodes become user
//! turns; decision nodes ask the model to pick a branch with a
//! `<choice>LABEL</choice>` reply. The ralph loop is a degenerate two-node
//! flow that repeats one prompt until the model chooses STOP.

use std::collections::HashMap;

use amadeus_core::MessageContent;
use tracing::{error, info, warn};

use crate::soul::{Soul, StopReason, TurnOutcome};
use crate::{SoulError, SoulResult};

/// Default bound on flow moves.
pub(crate) const DEFAULT_MAX_FLOW_MOVES: usize = 1000;
/// Effectively unbounded ralph looping.
const UNBOUNDED_MOVES: usize = usize::MAX;

/// Node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowNodeKind {
    /// The unique entry node.
    Begin,
    /// The unique exit node.
    End,
    /// A prompt sent as a user turn.
    Task,
    /// A prompt whose answer picks an outgoing edge.
    Decision,
}

/// One node of a flow.
#[derive(Debug, Clone)]
pub struct FlowNode {
    /// Node id.
    pub id: String,
    /// Prompt text (empty for begin/end).
    pub label: String,
    /// Node kind.
    pub kind: FlowNodeKind,
}

/// One directed edge.
#[derive(Debug, Clone)]
pub struct FlowEdge {
    /// Source node id.
    pub src: String,
    /// Destination node id.
    pub dst: String,
    /// Branch label; required and unique on decision edges.
    pub label: Option<String>,
}

/// A validated flow graph.
#[derive(Debug, Clone)]
pub struct Flow {
    /// Nodes by id.
    pub nodes: HashMap<String, FlowNode>,
    /// Outgoing edges by source id.
    pub outgoing: HashMap<String, Vec<FlowEdge>>,
    /// The begin node id.
    pub begin_id: String,
}

/// Parse a mermaid-style flowchart.
///
/// Supported subset:
///
/// ```text
/// flowchart TD
///   BEGIN --> T1
///   T1[Run the tests] --> D1
///   D1{Did they pass?} -- YES --> END
///   D1 -- NO --> T1
/// ```
///
/// `ID[label]` declares a task node, `ID{label}` a decision node; `BEGIN`
/// and `END` are the entry and exit.
///
/// # Errors
///
/// Returns an error when the graph is missing `BEGIN`/`END`, a decision
/// node has fewer than two uniquely labeled edges, or a line cannot be
/// parsed.
pub fn parse_flow(source: &str) -> SoulResult<Flow> {
    let mut nodes: HashMap<String, FlowNode> = HashMap::new();
    let mut outgoing: HashMap<String, Vec<FlowEdge>> = HashMap::new();

    let mut declare = |raw: &str| -> SoulResult<String> {
        let raw = raw.trim();
        let (id, label, kind) = if let Some((id, rest)) = raw.split_once('[') {
            let label = rest.strip_suffix(']').ok_or_else(|| bad_line(raw))?;
            (id.trim(), label.trim(), FlowNodeKind::Task)
        } else if let Some((id, rest)) = raw.split_once('{') {
            let label = rest.strip_suffix('}').ok_or_else(|| bad_line(raw))?;
            (id.trim(), label.trim(), FlowNodeKind::Decision)
        } else {
            let id = raw;
            let kind = match id {
                "BEGIN" => FlowNodeKind::Begin,
                "END" => FlowNodeKind::End,
                // A bare reference to a node declared elsewhere.
                _ => {
                    if !nodes.contains_key(id) {
                        nodes.insert(
                            id.to_string(),
                            FlowNode {
                                id: id.to_string(),
                                label: String::new(),
                                kind: FlowNodeKind::Task,
                            },
                        );
                    }
                    return Ok(id.to_string());
                },
            };
            (id, "", kind)
        };
        let entry = nodes.entry(id.to_string()).or_insert(FlowNode {
            id: id.to_string(),
            label: String::new(),
            kind,
        });
        if !label.is_empty() {
            entry.label = label.to_string();
            entry.kind = kind;
        }
        Ok(id.to_string())
    };

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("flowchart") || line.starts_with("%%") {
            continue;
        }
        let Some((lhs, rhs)) = line.split_once("-->") else {
            // A standalone node declaration.
            declare(line)?;
            continue;
        };

        // `A -- LABEL --> B` puts the label on the left of `-->`.
        let (src_raw, label) = match lhs.split_once("--") {
            Some((src, label)) if !label.trim().is_empty() => {
                (src.trim(), Some(label.trim().to_string()))
            },
            _ => (lhs.trim(), None),
        };
        let src = declare(src_raw)?;
        let dst = declare(rhs.trim())?;
        outgoing.entry(src.clone()).or_default().push(FlowEdge {
            src,
            dst,
            label,
        });
    }

    validate_flow(&nodes, &outgoing)?;
    Ok(Flow {
        nodes,
        outgoing,
        begin_id: "BEGIN".to_string(),
    })
}

fn bad_line(line: &str) -> SoulError {
    SoulError::AgentSpec(format!("cannot parse flow line: `{line}`"))
}

fn validate_flow(
    nodes: &HashMap<String, FlowNode>,
    outgoing: &HashMap<String, Vec<FlowEdge>>,
) -> SoulResult<()> {
    if !nodes.contains_key("BEGIN") {
        return Err(SoulError::AgentSpec("flow has no BEGIN node".to_string()));
    }
    if !nodes.contains_key("END") {
        return Err(SoulError::AgentSpec("flow has no END node".to_string()));
    }
    for node in nodes.values() {
        if node.kind == FlowNodeKind::Decision {
            let edges = outgoing.get(&node.id).map_or(&[][..], Vec::as_slice);
            let labels: Vec<&str> = edges
                .iter()
                .filter_map(|edge| edge.label.as_deref())
                .filter(|label| !label.is_empty())
                .collect();
            if labels.len() < 2 {
                return Err(SoulError::AgentSpec(format!(
                    "decision node `{}` needs at least two labeled edges",
                    node.id
                )));
            }
            let mut unique = labels.clone();
            unique.sort_unstable();
            unique.dedup();
            if unique.len() != labels.len() {
                return Err(SoulError::AgentSpec(format!(
                    "decision node `{}` has duplicate edge labels",
                    node.id
                )));
            }
        }
    }
    Ok(())
}

/// Extract the model's branch choice: the **last** `<choice>...</choice>`
/// tag in the text.
#[must_use]
pub fn parse_choice(text: &str) -> Option<String> {
    let start = text.rfind("<choice>")?;
    let after = &text[start.saturating_add("<choice>".len())..];
    let end = after.find("</choice>")?;
    let choice = after[..end].trim();
    if choice.is_empty() {
        None
    } else {
        Some(choice.to_string())
    }
}

/// Walks a flow against a Soul.
pub struct FlowRunner {
    flow: Flow,
    name: Option<String>,
    max_moves: usize,
}

impl FlowRunner {
    /// Create a runner with the default move bound.
    #[must_use]
    pub fn new(flow: Flow, name: Option<String>) -> Self {
        Self {
            flow,
            name,
            max_moves: DEFAULT_MAX_FLOW_MOVES,
        }
    }

    /// Build the ralph loop for `prompt`.
    ///
    /// `BEGIN → R1 → R2`, `R2 —CONTINUE→ R2`, `R2 —STOP→ END`, with
    /// `max_moves = max_ralph_iterations + 1` (negative means unbounded).
    #[must_use]
    pub fn ralph_loop(prompt: &str, max_ralph_iterations: i64) -> Self {
        let decision_label = format!(
            "{prompt}. (You are running in an automated loop where the same prompt is fed \
             repeatedly. Only choose STOP when the task is fully complete. Including it will \
             stop further iterations. If you are not 100% sure, choose CONTINUE.)"
        );

        let mut nodes = HashMap::new();
        for (id, label, kind) in [
            ("BEGIN", String::new(), FlowNodeKind::Begin),
            ("END", String::new(), FlowNodeKind::End),
            ("R1", prompt.to_string(), FlowNodeKind::Task),
            ("R2", decision_label, FlowNodeKind::Decision),
        ] {
            nodes.insert(
                id.to_string(),
                FlowNode {
                    id: id.to_string(),
                    label,
                    kind,
                },
            );
        }
        let mut outgoing: HashMap<String, Vec<FlowEdge>> = HashMap::new();
        let mut edge = |src: &str, dst: &str, label: Option<&str>| {
            outgoing.entry(src.to_string()).or_default().push(FlowEdge {
                src: src.to_string(),
                dst: dst.to_string(),
                label: label.map(ToString::to_string),
            });
        };
        edge("BEGIN", "R1", None);
        edge("R1", "R2", None);
        edge("R2", "R2", Some("CONTINUE"));
        edge("R2", "END", Some("STOP"));

        let max_moves = if max_ralph_iterations < 0 {
            UNBOUNDED_MOVES
        } else {
            usize::try_from(max_ralph_iterations)
                .unwrap_or(UNBOUNDED_MOVES)
                .saturating_add(1)
        };

        Self {
            flow: Flow {
                nodes,
                outgoing,
                begin_id: "BEGIN".to_string(),
            },
            name: None,
            max_moves,
        }
    }

    /// Walk the flow to completion.
    ///
    /// # Errors
    ///
    /// Propagates turn errors; exhausting `max_moves` surfaces as
    /// [`SoulError::MaxStepsReached`].
    pub async fn run(&self, soul: &Soul, args: &str) -> SoulResult<()> {
        if !args.trim().is_empty() {
            let command = self
                .name
                .as_ref()
                .map_or_else(|| "/flow".to_string(), |name| format!("/flow:{name}"));
            warn!(%command, args, "Agent flow ignores args");
            return Ok(());
        }

        let mut current_id = self.flow.begin_id.clone();
        let mut moves: usize = 0;
        let mut total_steps: usize = 0;
        loop {
            let Some(node) = self.flow.nodes.get(&current_id) else {
                error!(node = %current_id, "Flow references unknown node; stopping");
                return Ok(());
            };
            let edges = self
                .flow
                .outgoing
                .get(&current_id)
                .map_or(&[][..], Vec::as_slice);

            match node.kind {
                FlowNodeKind::End => {
                    info!(node = %current_id, "Agent flow reached END");
                    return Ok(());
                },
                FlowNodeKind::Begin => {
                    let Some(edge) = edges.first() else {
                        error!("Flow BEGIN node has no outgoing edges; stopping");
                        return Ok(());
                    };
                    current_id = edge.dst.clone();
                },
                FlowNodeKind::Task | FlowNodeKind::Decision => {
                    if moves >= self.max_moves {
                        return Err(SoulError::MaxStepsReached(total_steps));
                    }
                    let (next, steps_used) = self.execute_node(soul, node, edges).await?;
                    total_steps = total_steps.saturating_add(steps_used);
                    let Some(next) = next else {
                        return Ok(());
                    };
                    moves = moves.saturating_add(1);
                    current_id = next;
                },
            }
        }
    }

    async fn execute_node(
        &self,
        soul: &Soul,
        node: &FlowNode,
        edges: &[FlowEdge],
    ) -> SoulResult<(Option<String>, usize)> {
        if edges.is_empty() {
            error!(node = %node.id, "Flow node has no outgoing edges; stopping");
            return Ok((None, 0));
        }

        let base_prompt = build_prompt(node, edges);
        let mut prompt = base_prompt.clone();
        let mut steps_used: usize = 0;
        loop {
            let outcome = flow_turn(soul, &prompt).await?;
            steps_used = steps_used.saturating_add(outcome.step_count);
            if outcome.stop_reason == StopReason::ToolRejected {
                error!("Agent flow stopped after tool rejection");
                return Ok((None, steps_used));
            }

            if node.kind != FlowNodeKind::Decision {
                return Ok((Some(edges[0].dst.clone()), steps_used));
            }

            let choice = outcome
                .final_message
                .as_ref()
                .and_then(|message| parse_choice(&message.extract_text(" ")));
            if let Some(choice) = &choice {
                if let Some(edge) = edges.iter().find(|edge| edge.label.as_deref() == Some(choice))
                {
                    return Ok((Some(edge.dst.clone()), steps_used));
                }
            }

            let options: Vec<&str> = edges.iter().filter_map(|edge| edge.label.as_deref()).collect();
            warn!(
                choice = choice.as_deref().unwrap_or("<missing>"),
                options = %options.join(", "),
                "Agent flow got an invalid choice; re-prompting"
            );
            prompt = format!(
                "{base_prompt}\n\nYour last response did not include a valid choice. \
                 Reply with one of the choices using <choice>...</choice>."
            );
        }
    }
}

fn build_prompt(node: &FlowNode, edges: &[FlowEdge]) -> String {
    if node.kind != FlowNodeKind::Decision {
        return node.label.clone();
    }
    let mut lines = vec![node.label.clone(), String::new(), "Available branches:".to_string()];
    for edge in edges {
        if let Some(label) = &edge.label {
            lines.push(format!("- {label}"));
        }
    }
    lines.push(String::new());
    lines.push("Reply with a choice using <choice>...</choice>.".to_string());
    lines.join("\n")
}

async fn flow_turn(soul: &Soul, prompt: &str) -> SoulResult<TurnOutcome> {
    soul.wire().send(amadeus_wire::WireEvent::TurnBegin {
        user_input: MessageContent::Text(prompt.to_string()),
    });
    soul.turn(amadeus_core::Message::user(prompt)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice_takes_last_tag() {
        let text = "maybe <choice>NO</choice> ... final answer <choice>YES</choice>";
        assert_eq!(parse_choice(text), Some("YES".to_string()));
        assert_eq!(parse_choice("no tags here"), None);
        assert_eq!(parse_choice("<choice>  </choice>"), None);
    }

    #[test]
    fn test_parse_flow_subset() {
        let flow = parse_flow(
            "flowchart TD\n\
             BEGIN --> T1\n\
             T1[Run the tests] --> D1\n\
             D1{Did they pass?} -- YES --> END\n\
             D1 -- NO --> T1\n",
        )
        .unwrap();

        assert_eq!(flow.nodes["T1"].kind, FlowNodeKind::Task);
        assert_eq!(flow.nodes["T1"].label, "Run the tests");
        assert_eq!(flow.nodes["D1"].kind, FlowNodeKind::Decision);
        assert_eq!(flow.outgoing["D1"].len(), 2);
        assert_eq!(flow.outgoing["BEGIN"][0].dst, "T1");
    }

    #[test]
    fn test_parse_flow_requires_begin_and_end() {
        let error = parse_flow("flowchart TD\n  T1[task] --> T2[other]\n").unwrap_err();
        assert!(matches!(error, SoulError::AgentSpec(_)));
    }

    #[test]
    fn test_decision_needs_two_labeled_edges() {
        let source = "flowchart TD\n\
                      BEGIN --> D1\n\
                      D1{pick} -- ONLY --> END\n";
        let error = parse_flow(source).unwrap_err();
        assert!(error.to_string().contains("at least two"));
    }

    #[test]
    fn test_decision_rejects_duplicate_labels() {
        let source = "flowchart TD\n\
                      BEGIN --> D1\n\
                      D1{pick} -- GO --> END\n\
                      D1 -- GO --> BEGIN\n";
        let error = parse_flow(source).unwrap_err();
        assert!(error.to_string().contains("duplicate"));
    }

    #[test]
    fn test_ralph_loop_shape() {
        let runner = FlowRunner::ralph_loop("fix the bug", 3);
        assert_eq!(runner.max_moves, 4);
        assert_eq!(runner.flow.nodes["R1"].label, "fix the bug");
        assert_eq!(runner.flow.nodes["R2"].kind, FlowNodeKind::Decision);
        let labels: Vec<_> = runner.flow.outgoing["R2"]
            .iter()
            .filter_map(|edge| edge.label.as_deref())
            .collect();
        assert_eq!(labels, vec!["CONTINUE", "STOP"]);
    }

    #[test]
    fn test_ralph_loop_unbounded() {
        let runner = FlowRunner::ralph_loop("go", -1);
        assert_eq!(runner.max_moves, UNBOUNDED_MOVES);
    }

    #[test]
    fn test_decision_prompt_lists_branches() {
        let node = FlowNode {
            id: "D1".to_string(),
            label: "Did it work?".to_string(),
            kind: FlowNodeKind::Decision,
        };
        let edges = vec![
            FlowEdge {
                src: "D1".to_string(),
                dst: "END".to_string(),
                label: Some("YES".to_string()),
            },
            FlowEdge {
                src: "D1".to_string(),
                dst: "T1".to_string(),
                label: Some("NO".to_string()),
            },
        ];
        let prompt = build_prompt(&node, &edges);
        assert!(prompt.contains("- YES"));
        assert!(prompt.contains("- NO"));
        assert!(prompt.contains("<choice>"));
    }
}
