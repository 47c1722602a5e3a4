//! Agents, their runtime, and the labor market of subagents.
//!
//! A `Runtime` bundles everything a turn needs besides the conversation
//! itself; an `Agent` adds the identity: name, system prompt, toolset.
//! Subagents get derived runtimes — always a fresh `DenwaRenji`, always the
//! shared `Approval`, and a labor market that is private (fixed subagents)
//! or shared (dynamic ones).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use amadeus_approval::Approval;
use amadeus_config::Config;
use amadeus_core::DenwaRenji;
use amadeus_llm::Llm;
use amadeus_session::{Context, Session};
use amadeus_toolset::builtin::{
    ReadFile, SendDMail, SetTodoList, Shell, StrReplace, Task, WriteFile,
};
use amadeus_toolset::{SpawnerSlot, Toolset};
use amadeus_wire::Wire;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::skill::{Skill, discover_skills};
use crate::{SoulError, SoulResult};

/// Tools enabled when an agent spec does not say otherwise.
const DEFAULT_TOOLS: &[&str] = &[
    "Shell",
    "ReadFile",
    "WriteFile",
    "StrReplace",
    "SetTodoList",
    "SendDMail",
    "Task",
];

/// The default system prompt template.
const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Amadeus, a coding assistant operating in a terminal.

Current time: ${AMADEUS_NOW}
Working directory: ${AMADEUS_WORK_DIR}
Directory listing:
${AMADEUS_WORK_DIR_LS}

Project instructions:
${AMADEUS_AGENTS_MD}

Available skills:
${AMADEUS_SKILLS}

Use the provided tools to inspect and change the project. Ask for \
clarification when a request is ambiguous. Keep answers short.";

/// Detected host environment.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The user's shell.
    pub shell: String,
    /// Operating system name.
    pub os: String,
}

impl Environment {
    /// Detect shell and OS from the process environment.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            shell: std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string()),
            os: std::env::consts::OS.to_string(),
        }
    }
}

/// Builtin template arguments interpolated into system prompts.
#[derive(Debug, Clone, Default)]
pub struct BuiltinPromptArgs {
    /// Current local time, ISO 8601.
    pub now: String,
    /// Absolute working directory.
    pub work_dir: String,
    /// Top-level directory listing of the working directory.
    pub work_dir_ls: String,
    /// Content of the project's AGENTS.md, if any.
    pub agents_md: String,
    /// Formatted catalog of discovered skills.
    pub skills: String,
}

impl BuiltinPromptArgs {
    fn substitution_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("AMADEUS_NOW".to_string(), self.now.clone()),
            ("AMADEUS_WORK_DIR".to_string(), self.work_dir.clone()),
            ("AMADEUS_WORK_DIR_LS".to_string(), self.work_dir_ls.clone()),
            ("AMADEUS_AGENTS_MD".to_string(), self.agents_md.clone()),
            ("AMADEUS_SKILLS".to_string(), self.skills.clone()),
        ])
    }
}

/// Replace `${KEY}` placeholders from `args`. Unknown keys stay verbatim.
fn substitute(template: &str, args: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in args {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}

/// The registry of hireable subagents.
#[derive(Default)]
pub struct LaborMarket {
    fixed: Mutex<HashMap<String, (Arc<Agent>, String)>>,
    dynamic: Mutex<HashMap<String, Arc<Agent>>>,
}

impl LaborMarket {
    /// Create an empty market.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed (spec-declared) subagent.
    pub fn add_fixed_subagent(&self, name: &str, agent: Arc<Agent>, description: &str) {
        self.fixed
            .lock()
            .expect("labor market poisoned")
            .insert(name.to_string(), (agent, description.to_string()));
    }

    /// Register a dynamic subagent.
    pub fn add_dynamic_subagent(&self, name: &str, agent: Arc<Agent>) {
        self.dynamic
            .lock()
            .expect("labor market poisoned")
            .insert(name.to_string(), agent);
    }

    /// Look up a subagent by name. Dynamic registrations win.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        if let Some(agent) = self.dynamic.lock().expect("labor market poisoned").get(name) {
            return Some(Arc::clone(agent));
        }
        self.fixed
            .lock()
            .expect("labor market poisoned")
            .get(name)
            .map(|(agent, _)| Arc::clone(agent))
    }

    /// Names and descriptions for the Task tool catalog.
    #[must_use]
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .fixed
            .lock()
            .expect("labor market poisoned")
            .iter()
            .map(|(name, (_, description))| (name.clone(), description.clone()))
            .collect();
        entries.extend(
            self.dynamic
                .lock()
                .expect("labor market poisoned")
                .keys()
                .map(|name| (name.clone(), "Dynamically created subagent.".to_string())),
        );
        entries.sort();
        entries
    }
}

impl std::fmt::Debug for LaborMarket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaborMarket")
            .field("fixed", &self.fixed.lock().expect("labor market poisoned").len())
            .field(
                "dynamic",
                &self.dynamic.lock().expect("labor market poisoned").len(),
            )
            .finish()
    }
}

/// Everything a turn needs besides the conversation itself.
pub struct Runtime {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// The configured LLM, if any.
    pub llm: Option<Llm>,
    /// Stable session id.
    pub session_id: String,
    /// The working directory.
    pub work_dir: PathBuf,
    /// The session's on-disk home.
    pub session_root: PathBuf,
    /// Builtin template arguments.
    pub builtin_args: BuiltinPromptArgs,
    /// The D-Mail mailbox. Subagents get their own.
    pub denwa: Arc<DenwaRenji>,
    /// The approval gate. Shared with subagents.
    pub approval: Approval,
    /// The subagent registry.
    pub labor_market: Arc<LaborMarket>,
    /// Detected host environment.
    pub environment: Environment,
    /// Discovered skills by name.
    pub skills: BTreeMap<String, Skill>,
}

impl Runtime {
    /// Assemble a runtime for a session.
    ///
    /// Returns the runtime plus the session's context, which the caller
    /// hands to the Soul.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be inspected.
    pub async fn create(
        config: Arc<Config>,
        llm: Option<Llm>,
        session: Session,
        yolo: bool,
        skills_dir_override: Option<PathBuf>,
    ) -> SoulResult<(Arc<Self>, Arc<tokio::sync::Mutex<Context>>)> {
        let Session {
            id,
            work_dir,
            root,
            context,
        } = session;

        let work_dir_ls = list_directory(&work_dir).await;
        let agents_md = load_agents_md(&work_dir).await;
        let skills = discover_skills(&work_dir, skills_dir_override.as_deref()).await;
        info!(count = skills.len(), "Discovered skills");

        let skills_formatted = if skills.is_empty() {
            "No skills found.".to_string()
        } else {
            skills
                .values()
                .map(|skill| {
                    format!(
                        "- {}\n  - Path: {}\n  - Description: {}",
                        skill.name,
                        skill.path.display(),
                        skill.description,
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let runtime = Arc::new(Self {
            config,
            llm,
            session_id: id,
            work_dir: work_dir.clone(),
            session_root: root,
            builtin_args: BuiltinPromptArgs {
                now: chrono::Local::now().to_rfc3339(),
                work_dir: work_dir.display().to_string(),
                work_dir_ls,
                agents_md: agents_md.unwrap_or_default(),
                skills: skills_formatted,
            },
            denwa: Arc::new(DenwaRenji::new()),
            approval: Approval::new(yolo),
            labor_market: Arc::new(LaborMarket::new()),
            environment: Environment::detect(),
            skills,
        });
        Ok((runtime, Arc::new(tokio::sync::Mutex::new(context))))
    }

    /// Derived runtime for a fixed subagent: fresh mailbox, shared
    /// approval, private labor market.
    #[must_use]
    pub fn copy_for_fixed_subagent(&self) -> Arc<Self> {
        self.derive(Arc::new(LaborMarket::new()))
    }

    /// Derived runtime for a dynamic subagent: fresh mailbox, shared
    /// approval, shared labor market.
    #[must_use]
    pub fn copy_for_dynamic_subagent(&self) -> Arc<Self> {
        self.derive(Arc::clone(&self.labor_market))
    }

    fn derive(&self, labor_market: Arc<LaborMarket>) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::clone(&self.config),
            llm: self.llm.clone(),
            session_id: self.session_id.clone(),
            work_dir: self.work_dir.clone(),
            session_root: self.session_root.clone(),
            builtin_args: self.builtin_args.clone(),
            denwa: Arc::new(DenwaRenji::new()),
            approval: self.approval.share(),
            labor_market,
            environment: self.environment.clone(),
            skills: self.skills.clone(),
        })
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("session_id", &self.session_id)
            .field("work_dir", &self.work_dir)
            .field("has_llm", &self.llm.is_some())
            .finish_non_exhaustive()
    }
}

/// A loaded agent.
pub struct Agent {
    /// Agent name.
    pub name: String,
    /// Fully substituted system prompt.
    pub system_prompt: String,
    /// The agent's toolset.
    pub toolset: Arc<Toolset>,
    /// The agent's runtime.
    pub runtime: Arc<Runtime>,
    /// Slot the Soul fills with a live subagent spawner each turn.
    pub spawner_slot: SpawnerSlot,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("name", &self.name).finish_non_exhaustive()
    }
}

/// On-disk agent specification.
#[derive(Debug, Deserialize)]
struct AgentSpec {
    name: String,
    #[serde(default)]
    system_prompt_path: Option<PathBuf>,
    #[serde(default)]
    system_prompt_args: BTreeMap<String, String>,
    #[serde(default)]
    tools: Option<Vec<String>>,
    #[serde(default)]
    exclude_tools: Vec<String>,
    #[serde(default)]
    subagents: BTreeMap<String, SubagentSpec>,
}

#[derive(Debug, Deserialize)]
struct SubagentSpec {
    path: PathBuf,
    description: String,
}

/// Load an agent, or build the default one when `spec_path` is `None`.
///
/// `wire` carries the agent's events; subagents get their own wire at spawn
/// time.
///
/// # Errors
///
/// Returns [`SoulError::AgentSpec`] when the spec file, its system prompt,
/// or a declared tool cannot be loaded.
pub async fn load_agent(
    spec_path: Option<&Path>,
    runtime: Arc<Runtime>,
    wire: Wire,
) -> SoulResult<Arc<Agent>> {
    load_agent_inner(spec_path, runtime, wire).await
}

fn load_agent_boxed(
    spec_path: PathBuf,
    runtime: Arc<Runtime>,
    wire: Wire,
) -> futures::future::BoxFuture<'static, SoulResult<Arc<Agent>>> {
    Box::pin(async move { load_agent_inner(Some(&spec_path), runtime, wire).await })
}

async fn load_agent_inner(
    spec_path: Option<&Path>,
    runtime: Arc<Runtime>,
    wire: Wire,
) -> SoulResult<Arc<Agent>> {
    let (spec, spec_dir) = match spec_path {
        None => (
            AgentSpec {
                name: "amadeus".to_string(),
                system_prompt_path: None,
                system_prompt_args: BTreeMap::new(),
                tools: None,
                exclude_tools: Vec::new(),
                subagents: BTreeMap::new(),
            },
            PathBuf::new(),
        ),
        Some(path) => {
            info!(path = %path.display(), "Loading agent spec");
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| SoulError::AgentSpec(format!("cannot read {}: {e}", path.display())))?;
            let spec: AgentSpec = serde_json::from_str(&text)
                .map_err(|e| SoulError::AgentSpec(format!("invalid spec {}: {e}", path.display())))?;
            let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            (spec, dir)
        },
    };

    // Subagents load first: the Task tool catalogs them at construction.
    for (name, subagent_spec) in &spec.subagents {
        debug!(subagent = %name, "Loading fixed subagent");
        let sub_path = if subagent_spec.path.is_absolute() {
            subagent_spec.path.clone()
        } else {
            spec_dir.join(&subagent_spec.path)
        };
        let sub_runtime = runtime.copy_for_fixed_subagent();
        let subagent = load_agent_boxed(sub_path, sub_runtime, Wire::new()).await?;
        runtime
            .labor_market
            .add_fixed_subagent(name, subagent, &subagent_spec.description);
    }

    let system_prompt = {
        let template = match &spec.system_prompt_path {
            None => DEFAULT_SYSTEM_PROMPT.to_string(),
            Some(path) => {
                let full = if path.is_absolute() {
                    path.clone()
                } else {
                    spec_dir.join(path)
                };
                tokio::fs::read_to_string(&full).await.map_err(|e| {
                    SoulError::AgentSpec(format!("cannot read system prompt {}: {e}", full.display()))
                })?
            },
        };
        let mut args = runtime.builtin_args.substitution_map();
        args.extend(spec.system_prompt_args.clone());
        substitute(template.trim(), &args)
    };

    let tool_names: Vec<String> = spec
        .tools
        .unwrap_or_else(|| DEFAULT_TOOLS.iter().map(ToString::to_string).collect())
        .into_iter()
        .filter(|name| !spec.exclude_tools.contains(name))
        .collect();

    let spawner_slot = SpawnerSlot::new();
    let toolset = build_toolset(&tool_names, &runtime, &wire, &spawner_slot)?;

    Ok(Arc::new(Agent {
        name: spec.name,
        system_prompt,
        toolset,
        runtime,
        spawner_slot,
    }))
}

fn build_toolset(
    tool_names: &[String],
    runtime: &Arc<Runtime>,
    wire: &Wire,
    spawner_slot: &SpawnerSlot,
) -> SoulResult<Arc<Toolset>> {
    let toolset = Arc::new(Toolset::new(wire.clone()));
    let approval = &runtime.approval;
    let work_dir = &runtime.work_dir;

    for name in tool_names {
        let tool: Arc<dyn amadeus_toolset::Tool> = match name.as_str() {
            "Shell" => Arc::new(Shell::new(approval.share(), work_dir.clone())),
            "ReadFile" => Arc::new(ReadFile::new(work_dir.clone())),
            "WriteFile" => Arc::new(WriteFile::new(approval.share(), work_dir.clone())),
            "StrReplace" => Arc::new(StrReplace::new(approval.share(), work_dir.clone())),
            "SetTodoList" => Arc::new(SetTodoList::new()),
            "SendDMail" => Arc::new(SendDMail::new(Arc::clone(&runtime.denwa))),
            "Task" => Arc::new(Task::new(
                spawner_slot.clone(),
                &runtime.labor_market.descriptions(),
            )),
            other => {
                return Err(SoulError::AgentSpec(format!("unknown tool `{other}`")));
            },
        };
        if let Err(error) = toolset.add(tool) {
            warn!(%error, tool = %name, "Failed to register tool");
        }
    }
    Ok(toolset)
}

/// Format the top-level directory listing, directories first.
async fn list_directory(work_dir: &Path) -> String {
    let mut entries = Vec::new();
    if let Ok(mut dir) = tokio::fs::read_dir(work_dir).await {
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
    }
    entries.sort();
    entries.join("\n")
}

async fn load_agents_md(work_dir: &Path) -> Option<String> {
    for candidate in ["AGENTS.md", "agents.md"] {
        let path = work_dir.join(candidate);
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            info!(path = %path.display(), "Loaded project instructions");
            return Some(text.trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use amadeus_session::ShareDir;

    async fn test_runtime(dir: &tempfile::TempDir) -> (Arc<Runtime>, Arc<tokio::sync::Mutex<Context>>) {
        let share = ShareDir::from_path(dir.path().join("share"));
        let work_dir = dir.path().join("work");
        tokio::fs::create_dir_all(&work_dir).await.unwrap();
        let session = Session::create(&share, &work_dir).await.unwrap();
        Runtime::create(Arc::new(Config::default()), None, session, true, None)
            .await
            .unwrap()
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        let args = BTreeMap::from([("AMADEUS_NOW".to_string(), "today".to_string())]);
        let out = substitute("time=${AMADEUS_NOW} x=${UNSET}", &args);
        assert_eq!(out, "time=today x=${UNSET}");
    }

    #[tokio::test]
    async fn test_default_agent_has_default_tools() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _context) = test_runtime(&dir).await;
        let agent = load_agent(None, runtime, Wire::new()).await.unwrap();

        let names: Vec<String> = agent
            .toolset
            .tools()
            .into_iter()
            .map(|schema| schema.name)
            .collect();
        for expected in DEFAULT_TOOLS {
            assert!(names.contains(&(*expected).to_string()), "missing {expected}");
        }
        assert!(agent.system_prompt.contains("Working directory:"));
        assert!(!agent.system_prompt.contains("${AMADEUS_WORK_DIR}"));
    }

    #[tokio::test]
    async fn test_spec_with_subagent_and_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _context) = test_runtime(&dir).await;

        let spec_dir = dir.path().join("agents");
        std::fs::create_dir_all(&spec_dir).unwrap();
        std::fs::write(
            spec_dir.join("researcher.json"),
            serde_json::json!({
                "name": "researcher",
                "tools": ["ReadFile", "Shell"]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            spec_dir.join("main.json"),
            serde_json::json!({
                "name": "main",
                "exclude_tools": ["SendDMail"],
                "subagents": {
                    "researcher": {
                        "path": "researcher.json",
                        "description": "Reads code and reports back."
                    }
                }
            })
            .to_string(),
        )
        .unwrap();

        let agent = load_agent(Some(&spec_dir.join("main.json")), runtime, Wire::new())
            .await
            .unwrap();
        assert_eq!(agent.name, "main");
        assert!(!agent.toolset.contains("SendDMail"));
        assert!(agent.runtime.labor_market.get("researcher").is_some());

        // The subagent's runtime shares approval but not the mailbox.
        let researcher = agent.runtime.labor_market.get("researcher").unwrap();
        assert!(!Arc::ptr_eq(&researcher.runtime.denwa, &agent.runtime.denwa));
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _context) = test_runtime(&dir).await;
        let spec = dir.path().join("agent.json");
        std::fs::write(
            &spec,
            serde_json::json!({"name": "broken", "tools": ["Teleport"]}).to_string(),
        )
        .unwrap();

        let error = load_agent(Some(&spec), runtime, Wire::new()).await.unwrap_err();
        assert!(matches!(error, SoulError::AgentSpec(_)));
    }
}
