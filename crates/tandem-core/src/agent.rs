//! Agent descriptors: the immutable configuration record behind each agent.
//!
//! Descriptors are loaded once (see `tandem-settings`) and shared read-only
//! through `Arc` by every session manager in the process.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Every built-in tool a worker may be granted.
pub const ALL_TOOLS: &[&str] = &[
    "agent",
    "bash",
    "download",
    "edit",
    "multiedit",
    "fetch",
    "glob",
    "grep",
    "ls",
    "sourcegraph",
    "view",
    "write",
];

/// Read-only tools granted to the built-in `task` agent.
pub const SEARCH_TOOLS: &[&str] = &["glob", "grep", "ls", "sourcegraph", "view"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    #[default]
    Large,
    Small,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Large => write!(f, "large"),
            Self::Small => write!(f, "small"),
        }
    }
}

/// Which model an agent runs on. Provider/model override the tier default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelBinding {
    pub tier: ModelTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Tool, MCP and LSP allow-lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilitySet {
    pub tools: Vec<String>,
    /// MCP server name → allowed tool names on that server.
    pub mcp: BTreeMap<String, Vec<String>>,
    pub lsp: Vec<String>,
}

impl CapabilitySet {
    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}

/// Which agents this agent may delegate to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentPolicy {
    pub allowed: Vec<AgentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<AgentId>,
}

impl SubagentPolicy {
    pub fn permits(&self, agent_id: &AgentId) -> bool {
        self.allowed.contains(agent_id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDescriptor {
    /// Stable identity. Derived from `name` when left empty.
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub model: ModelBinding,
    pub capabilities: CapabilitySet,
    pub subagents: SubagentPolicy,
    pub context_paths: Vec<String>,
    pub disabled: bool,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: AgentId::from_raw(id),
            name: name.into(),
            ..Default::default()
        }
    }

    /// `"Code Reviewer"` → `"code-reviewer"`.
    pub fn id_from_name(name: &str) -> AgentId {
        AgentId::from_raw(name.replace(' ', "-").to_lowercase())
    }

    /// Fill in the id from the display name if configuration omitted it.
    pub fn normalized(mut self) -> Self {
        if self.id.is_empty() {
            self.id = Self::id_from_name(&self.name);
        }
        self
    }

    pub fn with_subagents(mut self, allowed: &[&str], default: Option<&str>) -> Self {
        self.subagents = SubagentPolicy {
            allowed: allowed.iter().map(|s| AgentId::from(*s)).collect(),
            default: default.map(AgentId::from),
        };
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.capabilities.tools = tools.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Built-in general coding agent, used when nothing is configured.
    pub fn builtin_coder() -> Self {
        Self {
            description: "An agent that helps with executing coding tasks.".into(),
            prompt: "You are a CLI tool for software engineering tasks. Be concise, direct, and correct.".into(),
            context_paths: default_context_paths(),
            ..Self::new("coder", "Coder")
        }
        .with_tools(ALL_TOOLS)
        .with_subagents(&["task"], Some("task"))
    }

    /// Built-in read-only search agent.
    pub fn builtin_task() -> Self {
        Self {
            description: "An agent that helps with searching for context and finding implementation details.".into(),
            prompt: "Given the user's prompt, use the tools available to you to answer the question. \
                     Be concise. Any file paths you return MUST be absolute."
                .into(),
            context_paths: default_context_paths(),
            ..Self::new("task", "Task")
        }
        .with_tools(SEARCH_TOOLS)
    }
}

fn default_context_paths() -> Vec<String> {
    [".github/copilot-instructions.md", ".cursorrules", "CLAUDE.md", "TANDEM.md"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}
