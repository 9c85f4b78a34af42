//! Agent execution: the toolbelt ReAct loop, the simple loop variant, and
//! their supporting components.
//!
//! ## Modules
//! - `react`: the core loop with toolbelt curation and context compression
//! - `simple`: the loop variant where every tool is visible from step one
//! - `toolbelt`: catalog registry, active toolbelt, todo ledger
//! - `resum`: context compression via running summarization
//! - `truncate`: tool-result size bounding
//! - `trajectory`: run status, usage counters, output record

pub mod react;
pub mod resum;
pub mod simple;
pub mod toolbelt;
pub mod trajectory;
pub mod truncate;

pub use react::ReactToolbeltAgent;
pub use resum::{ContextCompressor, ResumConfig};
pub use simple::LoopAgent;
pub use toolbelt::{TodoItem, TodoStatus, ToolbeltError, ToolbeltManager};
pub use trajectory::{FinalAnswer, RunStatus, TaskOutcome, Trajectory, UsageTally};
pub use truncate::TruncationPolicy;
