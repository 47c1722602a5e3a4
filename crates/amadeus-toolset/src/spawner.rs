//! The seam between the Task tool and the soul crate.
//!
//! Tools cannot depend on the Soul (the Soul owns the toolset), so the
//! Task tool talks to subagents through this trait. The soul crate
//! implements it and injects the implementation into [`SpawnerSlot`]
//! before each turn.

use std::sync::{Arc, RwLock};

use amadeus_core::ToolReturnValue;
use async_trait::async_trait;

/// A named subagent available for hire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubagentHandle {
    /// The subagent's name.
    pub name: String,
    /// What it is good at.
    pub description: String,
}

/// Spawns subagents on behalf of the Task tool.
#[async_trait]
pub trait SubagentSpawner: Send + Sync {
    /// Subagents that can be addressed by name.
    fn available(&self) -> Vec<SubagentHandle>;

    /// Run `prompt` on the named subagent to completion.
    ///
    /// `task_tool_call_id` identifies the Task call so the subagent's wire
    /// events can be wrapped and forwarded to the parent wire.
    async fn spawn(
        &self,
        name: &str,
        prompt: &str,
        task_tool_call_id: &str,
    ) -> ToolReturnValue;
}

/// A slot the Soul fills with the live spawner before each turn.
#[derive(Clone, Default)]
pub struct SpawnerSlot {
    inner: Arc<RwLock<Option<Arc<dyn SubagentSpawner>>>>,
}

impl SpawnerSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or clear) the spawner.
    pub fn set(&self, spawner: Option<Arc<dyn SubagentSpawner>>) {
        *self.inner.write().expect("spawner slot poisoned") = spawner;
    }

    /// The current spawner, if one is installed.
    #[must_use]
    pub fn get(&self) -> Option<Arc<dyn SubagentSpawner>> {
        self.inner.read().expect("spawner slot poisoned").clone()
    }
}

impl std::fmt::Debug for SpawnerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnerSlot")
            .field("installed", &self.get().is_some())
            .finish()
    }
}
