//! # Toolbelt Agent
//!
//! Agent execution harness for LLM-driven task completion against a tool
//! ecosystem exposed through a uniform gateway protocol.
//!
//! This library provides:
//! - A ReAct loop with dynamic toolbelt curation: the model discovers and
//!   adds the gateway tools it needs instead of seeing every schema upfront
//! - Context compression (ReSum): an aging transcript prefix is folded into
//!   a running summary to stay under the model's context budget
//! - A simpler loop agent where all tools are visible from step one
//!
//! ## Architecture
//!
//! ```text
//!        ┌───────────────────────────────────┐
//!        │        ReactToolbeltAgent         │
//!        │  step loop · dispatch · budgets   │
//!        └──────┬──────────────┬─────────────┘
//!               │              │
//!               ▼              ▼
//!      ┌────────────────┐  ┌───────────────┐
//!      │  LlmClient     │  │ GatewayClient │
//!      │  (OpenRouter)  │  │  (JSON-RPC)   │
//!      └────────────────┘  └───────────────┘
//! ```
//!
//! ## Run Flow
//! 1. Open one gateway connection and fetch the tool catalog
//! 2. Loop: maybe compress context, ask the model, dispatch tool calls
//! 3. Finalize on submit_answer (gated by the todo ledger) or budget expiry
//! 4. Return a trajectory: transcript + status + timing + usage
//!
//! ## Modules
//! - `agent`: the execution loops and their components
//! - `llm`: chat message model and the OpenRouter client
//! - `gateway`: JSON-RPC tool gateway client
//! - `config`: environment-driven configuration

pub mod agent;
pub mod config;
pub mod gateway;
pub mod llm;

pub use agent::{LoopAgent, ReactToolbeltAgent, RunStatus, Trajectory};
pub use config::{Config, RunConfig};
pub use gateway::{GatewayClient, GatewayConnection, McpGateway};
pub use llm::{LlmClient, OpenRouterClient};
