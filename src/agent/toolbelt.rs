//! Toolbelt management: the curated subset of the gateway catalog the model
//! may currently invoke, plus the todo ledger that gates the terminal answer.
//!
//! The catalog can be large; exposing every schema on every model call is
//! wasteful and noisy. The toolbelt starts empty and the model discovers and
//! adds the tools it needs through the meta-tools defined here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::gateway::ToolDescriptor;
use crate::llm::ToolDefinition;

/// Default cap on concurrent toolbelt membership.
pub const DEFAULT_TOOLBELT_CAPACITY: usize = 80;

/// Name of the terminal-answer tool.
pub const ANSWER_TOOL: &str = "submit_answer";

/// Names of the meta-tools resolved inside the orchestrator.
pub const META_TODO_WRITE: &str = "todo_write";
pub const META_LIST_TOOLS: &str = "toolbelt_list_tools";
pub const META_INSPECT_TOOL: &str = "toolbelt_inspect_tool";
pub const META_ADD_TOOL: &str = "toolbelt_add_tool";
pub const META_REMOVE_TOOL: &str = "toolbelt_remove_tool";

/// Error from toolbelt mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolbeltError {
    #[error("tool '{0}' is not in the catalog; use {META_LIST_TOOLS} to see what exists")]
    UnknownTool(String),

    #[error("toolbelt is at its capacity of {capacity}; remove a tool before adding another")]
    AtCapacity { capacity: usize },
}

/// Status of a todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    /// Whether this status still blocks the terminal answer.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, TodoStatus::Pending | TodoStatus::InProgress)
    }
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry in the todo ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

/// Per-run registry of discovered tools, the active toolbelt, and the todo
/// ledger.
pub struct ToolbeltManager {
    /// Full catalog, keyed by tool name
    catalog: HashMap<String, ToolDescriptor>,
    /// Catalog names in discovery order, for stable listings
    catalog_order: Vec<String>,
    /// Active toolbelt, in insertion order
    active: Vec<String>,
    capacity: usize,
    todos: Vec<TodoItem>,
}

impl ToolbeltManager {
    /// Build a manager from a catalog snapshot. The toolbelt starts empty.
    pub fn new(catalog: Vec<ToolDescriptor>, capacity: usize) -> Self {
        let catalog_order: Vec<String> = catalog.iter().map(|t| t.name.clone()).collect();
        let catalog = catalog.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self {
            catalog,
            catalog_order,
            active: Vec::new(),
            capacity,
            todos: Vec::new(),
        }
    }

    /// Number of tools currently in the toolbelt.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether the toolbelt is empty.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a tool is currently in the toolbelt.
    pub fn contains(&self, name: &str) -> bool {
        self.active.iter().any(|n| n == name)
    }

    /// Whether a tool exists in the catalog at all.
    pub fn in_catalog(&self, name: &str) -> bool {
        self.catalog.contains_key(name)
    }

    /// Render the full catalog as names + first-line summaries.
    pub fn list_tools(&self) -> String {
        if self.catalog_order.is_empty() {
            return "The catalog is empty: the gateway exposed no tools.".to_string();
        }
        let mut out = format!(
            "{} tools available ({} currently in your toolbelt, capacity {}):\n",
            self.catalog_order.len(),
            self.active.len(),
            self.capacity
        );
        for name in &self.catalog_order {
            let descriptor = &self.catalog[name];
            let summary = descriptor.description.lines().next().unwrap_or("");
            let marker = if self.contains(name) { "*" } else { "-" };
            out.push_str(&format!("{} {}: {}\n", marker, name, summary));
        }
        out.push_str("Tools marked * are in your toolbelt and callable right now.");
        out
    }

    /// Render one tool's full schema.
    pub fn inspect_tool(&self, name: &str) -> Result<String, ToolbeltError> {
        let descriptor = self
            .catalog
            .get(name)
            .ok_or_else(|| ToolbeltError::UnknownTool(name.to_string()))?;
        Ok(format!(
            "{}: {}\nParameters schema:\n{}",
            descriptor.name,
            descriptor.description,
            serde_json::to_string_pretty(&descriptor.input_schema)
                .unwrap_or_else(|_| "{}".to_string())
        ))
    }

    /// Add a tool to the toolbelt.
    ///
    /// Rejects unknown names and additions beyond capacity; the toolbelt is
    /// left unchanged on rejection.
    pub fn add_tool(&mut self, name: &str) -> Result<String, ToolbeltError> {
        if !self.catalog.contains_key(name) {
            return Err(ToolbeltError::UnknownTool(name.to_string()));
        }
        if self.contains(name) {
            return Ok(format!("{} is already in your toolbelt.", name));
        }
        if self.active.len() >= self.capacity {
            return Err(ToolbeltError::AtCapacity {
                capacity: self.capacity,
            });
        }
        self.active.push(name.to_string());
        Ok(format!(
            "Added {} to your toolbelt ({}/{} slots used). You can now call it directly.",
            name,
            self.active.len(),
            self.capacity
        ))
    }

    /// Remove a tool from the toolbelt. No-op when absent.
    pub fn remove_tool(&mut self, name: &str) -> String {
        match self.active.iter().position(|n| n == name) {
            Some(idx) => {
                self.active.remove(idx);
                format!(
                    "Removed {} from your toolbelt ({}/{} slots used).",
                    name,
                    self.active.len(),
                    self.capacity
                )
            }
            None => format!("{} was not in your toolbelt; nothing to remove.", name),
        }
    }

    /// Write the todo ledger.
    ///
    /// With `merge` false the whole ledger is replaced; with `merge` true
    /// items are upserted by id (existing ids updated in place, new ids
    /// appended).
    pub fn todo_write(&mut self, items: Vec<TodoItem>, merge: bool) -> String {
        if merge {
            for item in items {
                match self.todos.iter_mut().find(|t| t.id == item.id) {
                    Some(existing) => *existing = item,
                    None => self.todos.push(item),
                }
            }
        } else {
            self.todos = items;
        }

        let incomplete = self.get_incomplete_todos().len();
        format!(
            "Todo ledger now has {} item(s), {} incomplete.",
            self.todos.len(),
            incomplete
        )
    }

    /// All todos whose status is neither completed nor cancelled.
    pub fn get_incomplete_todos(&self) -> Vec<&TodoItem> {
        self.todos.iter().filter(|t| t.status.is_incomplete()).collect()
    }

    /// The current ledger.
    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    /// Tool definitions for the active toolbelt, in insertion order.
    pub fn active_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.active
            .iter()
            .filter_map(|name| self.catalog.get(name))
            .map(|t| {
                ToolDefinition::function(
                    t.name.clone(),
                    t.description.clone(),
                    t.input_schema.clone(),
                )
            })
            .collect()
    }
}

/// Schemas for the meta-tools resolved inside the orchestrator.
pub fn meta_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            META_LIST_TOOLS,
            "List every tool the gateway exposes, with one-line summaries. \
             Tools marked * are already in your toolbelt.",
            json!({"type": "object", "properties": {}}),
        ),
        ToolDefinition::function(
            META_INSPECT_TOOL,
            "Show the full description and parameter schema of one catalog tool.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Catalog tool name"}
                },
                "required": ["name"]
            }),
        ),
        ToolDefinition::function(
            META_ADD_TOOL,
            "Add a catalog tool to your toolbelt so you can call it. \
             Fails when the toolbelt is at capacity.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Catalog tool name"}
                },
                "required": ["name"]
            }),
        ),
        ToolDefinition::function(
            META_REMOVE_TOOL,
            "Remove a tool from your toolbelt to free a slot.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Toolbelt tool name"}
                },
                "required": ["name"]
            }),
        ),
        ToolDefinition::function(
            META_TODO_WRITE,
            "Create or update your todo ledger. Every item must be completed or \
             cancelled before submit_answer is accepted.",
            json!({
                "type": "object",
                "properties": {
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {"type": "string"},
                                "content": {"type": "string"},
                                "status": {
                                    "type": "string",
                                    "enum": ["pending", "in_progress", "completed", "cancelled"]
                                }
                            },
                            "required": ["id", "content", "status"]
                        }
                    },
                    "merge": {
                        "type": "boolean",
                        "description": "false replaces the whole ledger; true upserts by id"
                    }
                },
                "required": ["items", "merge"]
            }),
        ),
    ]
}

/// Schema for the terminal-answer tool.
pub fn answer_tool_definition() -> ToolDefinition {
    ToolDefinition::function(
        ANSWER_TOOL,
        "Submit your final answer and end the run. Rejected while any todo \
         item is still pending or in progress.",
        json!({
            "type": "object",
            "properties": {
                "answer": {"type": "string", "description": "The final answer to the task"},
                "status": {
                    "type": "string",
                    "enum": ["completed", "blocked", "failed"],
                    "description": "completed: task done; blocked: cannot proceed; failed: attempted but failed"
                }
            },
            "required": ["answer", "status"]
        }),
    )
}

/// Whether a tool name resolves to a meta-tool.
pub fn is_meta_tool(name: &str) -> bool {
    matches!(
        name,
        META_TODO_WRITE | META_LIST_TOOLS | META_INSPECT_TOOL | META_ADD_TOOL | META_REMOVE_TOOL
    )
}
