//! Toolbelt ReAct agent - the core execution loop.
//!
//! # Algorithm
//! 1. Open one gateway connection for the run's lifetime and fetch the
//!    tool catalog; the toolbelt starts empty
//! 2. Each step: maybe compress the transcript, then ask the model for its
//!    next action with meta-tools + active toolbelt + submit_answer visible
//! 3. Dispatch tool calls: meta-tools resolve locally, gateway tools go
//!    through the connection under a per-call deadline, submit_answer ends
//!    the run once the todo ledger is clear
//! 4. Repeat until finalized or the step budget runs out
//!
//! Model-call timeouts and context-window rejections are recoverable;
//! fatal gateway errors and other model errors abort the run. Every exit
//! path produces a trajectory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::gateway::{GatewayClient, GatewayError};
use crate::llm::{
    ChatMessage, ChatOptions, ContentPart, LlmClient, LlmErrorKind, ToolCall,
};

use super::resum::ContextCompressor;
use super::toolbelt::{
    self, is_meta_tool, TodoItem, ToolbeltManager, ANSWER_TOOL, META_ADD_TOOL, META_INSPECT_TOOL,
    META_LIST_TOOLS, META_REMOVE_TOOL, META_TODO_WRITE,
};
use super::trajectory::{FinalAnswer, RunStatus, Trajectory, UsageTally};
use super::truncate::TruncationPolicy;

/// Sent when the model responds without any tool call.
const NO_TOOL_NUDGE: &str = "You made no tool calls. Either call a tool to make \
progress or submit your final answer with submit_answer.";

/// Sent when the model produces no usable output at all.
const CONTINUE_NUDGE: &str = "Continue with the task.";

fn build_system_prompt(toolbelt_capacity: usize) -> String {
    format!(
        r#"You are an autonomous agent that completes tasks using tools exposed by a gateway.

## Tool discovery
Your toolbelt starts EMPTY. The gateway tools you can actually call are only the ones you add:
1. {list} shows every available tool
2. {inspect} shows one tool's parameters
3. {add} puts a tool into your toolbelt (at most {capacity} at a time)
4. {remove} frees a slot

## Task tracking
Use {todo} to keep a ledger of what remains. Every item must be completed or
cancelled before your final answer is accepted.

## Finishing
Call submit_answer with your answer and a status of completed, blocked, or failed.
Do not stop calling tools until you have submitted your answer."#,
        list = META_LIST_TOOLS,
        inspect = META_INSPECT_TOOL,
        add = META_ADD_TOOL,
        remove = META_REMOVE_TOOL,
        todo = META_TODO_WRITE,
        capacity = toolbelt_capacity,
    )
}

/// Parse a tool call's argument string, tolerating empty and malformed input.
pub(crate) fn parse_call_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
}

/// Execute one gateway tool call under a deadline and append its result.
///
/// Text content is truncated before it enters the transcript. Image blocks
/// are pushed onto `pending_images` for the caller to append after all tool
/// results of the batch: interleaving image messages between sibling tool
/// results violates ordering expectations of some providers.
///
/// Returns `Err` only for fatal gateway errors; the error tool-result is
/// appended before returning so the transcript stays consistent.
pub(crate) async fn execute_gateway_call(
    gateway: &dyn GatewayClient,
    call: &ToolCall,
    timeout: Duration,
    truncation: &TruncationPolicy,
    messages: &mut Vec<ChatMessage>,
    pending_images: &mut Vec<ContentPart>,
) -> Result<(), GatewayError> {
    let name = &call.function.name;
    let arguments = parse_call_arguments(&call.function.arguments);

    let outcome = tokio::time::timeout(timeout, gateway.call_tool(name, arguments)).await;

    match outcome {
        Err(_elapsed) => {
            warn!("Tool call {} timed out after {:?}", name, timeout);
            messages.push(ChatMessage::tool_result(
                &call.id,
                name,
                format!("Tool call timed out after {} seconds.", timeout.as_secs()),
            ));
            Ok(())
        }
        Ok(Err(e)) if e.is_fatal() => {
            error!("Fatal gateway error on {}: {}", name, e);
            messages.push(ChatMessage::tool_result(&call.id, name, format!("{}", e)));
            Err(e)
        }
        Ok(Err(e)) => {
            debug!("Tool {} failed: {}", name, e);
            messages.push(ChatMessage::tool_result(&call.id, name, format!("{}", e)));
            Ok(())
        }
        Ok(Ok(blocks)) => {
            let text = blocks
                .iter()
                .filter(|b| b.is_text())
                .filter_map(|b| b.text.as_deref())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");

            let images: Vec<ContentPart> = blocks
                .iter()
                .filter(|b| b.is_image())
                .filter_map(|b| b.as_data_uri())
                .map(ContentPart::image_url)
                .collect();

            if text.is_empty() && images.is_empty() {
                messages.push(ChatMessage::tool_result(
                    &call.id,
                    name,
                    format!("Tool {} returned no usable content.", name),
                ));
                return Ok(());
            }

            let result_text = if text.is_empty() {
                format!("Tool {} returned image content; see below.", name)
            } else {
                truncation.apply(&text)
            };
            messages.push(ChatMessage::tool_result(&call.id, name, result_text));
            pending_images.extend(images);
            Ok(())
        }
    }
}

/// Append deferred image content as one user message after a tool batch.
pub(crate) fn flush_pending_images(messages: &mut Vec<ChatMessage>, pending: Vec<ContentPart>) {
    if pending.is_empty() {
        return;
    }
    let mut parts = vec![ContentPart::text("Image output from the tool calls above:")];
    parts.extend(pending);
    messages.push(ChatMessage::user_parts(parts));
}

#[derive(Debug, Deserialize)]
struct NamedToolArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TodoWriteArgs {
    items: Vec<TodoItem>,
    #[serde(default)]
    merge: bool,
}

#[derive(Debug, Deserialize)]
struct SubmitAnswerArgs {
    answer: String,
    status: super::trajectory::TaskOutcome,
}

/// What the dispatcher decided about one tool call.
enum DispatchOutcome {
    /// Result appended; keep processing the batch
    Continue,
    /// The run finalized; remaining calls in the batch are not executed
    Finalized(FinalAnswer),
}

/// The kind a tool-call name resolves to. The set is closed and known at
/// design time; resolution happens once per call.
enum CallKind {
    Answer,
    Meta,
    Gateway,
}

fn classify_call(name: &str) -> CallKind {
    if name == ANSWER_TOOL {
        CallKind::Answer
    } else if is_meta_tool(name) {
        CallKind::Meta
    } else {
        CallKind::Gateway
    }
}

/// Mutable per-run state that must survive timeout and cancellation so the
/// trajectory can report partial progress.
#[derive(Default)]
struct RunState {
    messages: Vec<ChatMessage>,
    usage: UsageTally,
    final_answer: Option<FinalAnswer>,
}

/// ReAct agent with dynamic toolbelt curation and context compression.
pub struct ReactToolbeltAgent {
    llm: Arc<dyn LlmClient>,
    config: RunConfig,
}

impl ReactToolbeltAgent {
    pub fn new(llm: Arc<dyn LlmClient>, config: RunConfig) -> Self {
        Self { llm, config }
    }

    /// Run a task to completion. Takes ownership of the gateway handle so
    /// the connection is released when the run's scope exits, on every path.
    pub async fn run(&self, gateway: Arc<dyn GatewayClient>, task: &str) -> Trajectory {
        self.run_with_cancellation(gateway, task, CancellationToken::new())
            .await
    }

    /// Run a task with an external cancellation handle.
    ///
    /// Always returns a trajectory: wall-clock expiry maps to `Error`,
    /// cancellation to `Cancelled`, unhandled errors to `Error` or `Failed`
    /// per the configured system-error policy.
    pub async fn run_with_cancellation(
        &self,
        gateway: Arc<dyn GatewayClient>,
        task: &str,
        cancel: CancellationToken,
    ) -> Trajectory {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut state = RunState::default();

        info!("Run {} starting: model={}", run_id, self.config.model);

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Run {} cancelled externally", run_id);
                RunStatus::Cancelled
            }
            outcome = tokio::time::timeout(
                self.config.wall_clock_timeout,
                self.run_inner(&*gateway, task, &mut state),
            ) => {
                match outcome {
                    Err(_) => {
                        error!("Run {} exceeded its wall-clock budget", run_id);
                        RunStatus::Error
                    }
                    Ok(Ok(status)) => status,
                    Ok(Err(e)) => {
                        if (self.config.system_error_policy)(&e) {
                            error!("Run {} aborted by system error: {:#}", run_id, e);
                            RunStatus::Error
                        } else {
                            error!("Run {} aborted by task error: {:#}", run_id, e);
                            RunStatus::Failed
                        }
                    }
                }
            }
        };

        info!(
            "Run {} finished: status={} elapsed={:.1}s model_calls={}",
            run_id,
            status,
            started.elapsed().as_secs_f64(),
            state.usage.model_calls
        );

        drop(gateway);

        Trajectory {
            run_id,
            messages: state.messages,
            status,
            time_elapsed: started.elapsed().as_secs_f64(),
            usage: state.usage,
            final_answer: state.final_answer,
            created_at: Utc::now(),
        }
    }

    /// The step loop. Returns the terminal status for normal exits and
    /// `Err` for fatal conditions classified by the caller.
    async fn run_inner(
        &self,
        gateway: &dyn GatewayClient,
        task: &str,
        state: &mut RunState,
    ) -> anyhow::Result<RunStatus> {
        let catalog = gateway.list_tools().await?;
        info!("Discovered {} tools from the gateway", catalog.len());

        let mut toolbelt = ToolbeltManager::new(catalog, self.config.toolbelt_capacity);
        let mut compressor = ContextCompressor::new(self.config.resum.clone());

        state
            .messages
            .push(ChatMessage::system(build_system_prompt(
                self.config.toolbelt_capacity,
            )));
        state.messages.push(ChatMessage::user(task));

        for step in 0..self.config.max_steps {
            debug!("Step {}/{}", step + 1, self.config.max_steps);

            if compressor.should_summarize(&state.messages, &self.config.model) {
                match compressor
                    .compress(&*self.llm, &self.config.model, &state.messages)
                    .await
                {
                    Ok(rebuilt) => {
                        info!(
                            "Compressed transcript: {} -> {} messages",
                            state.messages.len(),
                            rebuilt.len()
                        );
                        state.messages = rebuilt;
                    }
                    Err(e) => warn!("Summarization failed, continuing uncompressed: {}", e),
                }
            }

            let mut tools = toolbelt::meta_tool_definitions();
            tools.extend(toolbelt.active_tool_definitions());
            tools.push(toolbelt::answer_tool_definition());

            let options = ChatOptions {
                timeout: Some(self.config.model_call_timeout),
                ..ChatOptions::default()
            };
            let response = match self
                .llm
                .chat_completion_with_options(&self.config.model, &state.messages, Some(&tools), options)
                .await
            {
                Ok(response) => response,
                Err(e) if e.kind == LlmErrorKind::Timeout => {
                    warn!("Model call timed out: {}", e);
                    continue;
                }
                Err(e) if e.kind == LlmErrorKind::ContextExceeded => {
                    warn!("Context window exceeded; forcing summarization");
                    match compressor
                        .compress(&*self.llm, &self.config.model, &state.messages)
                        .await
                    {
                        Ok(rebuilt) => state.messages = rebuilt,
                        Err(err) => warn!("Forced summarization failed: {}", err),
                    }
                    continue;
                }
                Err(e) if e.kind == LlmErrorKind::EmptyResponse => {
                    warn!("Model returned no usable choice: {}", e);
                    state.messages.push(ChatMessage::user(CONTINUE_NUDGE));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            state.usage.record(response.usage.as_ref());

            if response.is_empty() {
                state.messages.push(ChatMessage::user(CONTINUE_NUDGE));
                continue;
            }

            let tool_calls = response.tool_calls.clone().filter(|c| !c.is_empty());
            state.messages.push(ChatMessage::assistant(
                response.content.clone(),
                tool_calls.clone(),
                response.reasoning.clone(),
            ));

            let Some(calls) = tool_calls else {
                state.messages.push(ChatMessage::user(NO_TOOL_NUDGE));
                continue;
            };

            let mut pending_images = Vec::new();
            let mut finalized = None;

            for call in &calls {
                let outcome = self
                    .dispatch_call(gateway, &mut toolbelt, call, state, &mut pending_images)
                    .await?;
                if let DispatchOutcome::Finalized(answer) = outcome {
                    finalized = Some(answer);
                    break;
                }
            }

            flush_pending_images(&mut state.messages, pending_images);

            if let Some(answer) = finalized {
                state.final_answer = Some(answer);
                return Ok(RunStatus::Completed);
            }
        }

        info!("Step budget exhausted without a terminal answer");
        Ok(RunStatus::Failed)
    }

    /// Resolve and execute one tool call.
    async fn dispatch_call(
        &self,
        gateway: &dyn GatewayClient,
        toolbelt: &mut ToolbeltManager,
        call: &ToolCall,
        state: &mut RunState,
        pending_images: &mut Vec<ContentPart>,
    ) -> anyhow::Result<DispatchOutcome> {
        let name = call.function.name.clone();

        match classify_call(&name) {
            CallKind::Answer => Ok(self.handle_answer_call(toolbelt, call, state)),
            CallKind::Meta => {
                let result = execute_meta_call(toolbelt, call);
                state
                    .messages
                    .push(ChatMessage::tool_result(&call.id, &name, result));
                Ok(DispatchOutcome::Continue)
            }
            CallKind::Gateway => {
                if !toolbelt.contains(&name) {
                    let hint = if toolbelt.in_catalog(&name) {
                        format!(
                            "Tool {} is not in your toolbelt. Add it with {} first.",
                            name, META_ADD_TOOL
                        )
                    } else {
                        format!(
                            "Unknown tool {}. Use {} to see what exists.",
                            name, META_LIST_TOOLS
                        )
                    };
                    state
                        .messages
                        .push(ChatMessage::tool_result(&call.id, &name, hint));
                    return Ok(DispatchOutcome::Continue);
                }

                execute_gateway_call(
                    gateway,
                    call,
                    self.config.tool_call_timeout,
                    &self.config.truncation,
                    &mut state.messages,
                    pending_images,
                )
                .await?;
                Ok(DispatchOutcome::Continue)
            }
        }
    }

    /// Handle submit_answer: gate on the todo ledger, then finalize.
    fn handle_answer_call(
        &self,
        toolbelt: &ToolbeltManager,
        call: &ToolCall,
        state: &mut RunState,
    ) -> DispatchOutcome {
        let incomplete = toolbelt.get_incomplete_todos();
        if !incomplete.is_empty() {
            let mut rejection = format!(
                "Cannot submit the answer yet: {} todo item(s) are unfinished:\n",
                incomplete.len()
            );
            for todo in &incomplete {
                rejection.push_str(&format!("- {} ({}): {}\n", todo.id, todo.status, todo.content));
            }
            rejection.push_str("Complete or cancel each item, then call submit_answer again.");
            state
                .messages
                .push(ChatMessage::tool_result(&call.id, ANSWER_TOOL, rejection));
            return DispatchOutcome::Continue;
        }

        let args = parse_call_arguments(&call.function.arguments);
        match serde_json::from_value::<SubmitAnswerArgs>(args) {
            Ok(parsed) => {
                state.messages.push(ChatMessage::tool_result(
                    &call.id,
                    ANSWER_TOOL,
                    "Answer recorded. Run complete.",
                ));
                DispatchOutcome::Finalized(FinalAnswer {
                    answer: parsed.answer,
                    status: parsed.status,
                })
            }
            Err(e) => {
                state.messages.push(ChatMessage::tool_result(
                    &call.id,
                    ANSWER_TOOL,
                    format!(
                        "Invalid submit_answer arguments: {}. Provide 'answer' and a \
                         'status' of completed, blocked, or failed.",
                        e
                    ),
                ));
                DispatchOutcome::Continue
            }
        }
    }
}

/// Execute a meta-tool against the toolbelt manager. Always produces a
/// result string; meta-tools never fail the run.
fn execute_meta_call(toolbelt: &mut ToolbeltManager, call: &ToolCall) -> String {
    let args = parse_call_arguments(&call.function.arguments);

    match call.function.name.as_str() {
        META_LIST_TOOLS => toolbelt.list_tools(),
        META_INSPECT_TOOL => match serde_json::from_value::<NamedToolArgs>(args) {
            Ok(parsed) => toolbelt
                .inspect_tool(&parsed.name)
                .unwrap_or_else(|e| e.to_string()),
            Err(e) => format!("Invalid arguments: {}", e),
        },
        META_ADD_TOOL => match serde_json::from_value::<NamedToolArgs>(args) {
            Ok(parsed) => toolbelt
                .add_tool(&parsed.name)
                .unwrap_or_else(|e| e.to_string()),
            Err(e) => format!("Invalid arguments: {}", e),
        },
        META_REMOVE_TOOL => match serde_json::from_value::<NamedToolArgs>(args) {
            Ok(parsed) => toolbelt.remove_tool(&parsed.name),
            Err(e) => format!("Invalid arguments: {}", e),
        },
        META_TODO_WRITE => match serde_json::from_value::<TodoWriteArgs>(args) {
            Ok(parsed) => toolbelt.todo_write(parsed.items, parsed.merge),
            Err(e) => format!("Invalid arguments: {}", e),
        },
        other => format!("Unknown meta-tool: {}", other),
    }
}
