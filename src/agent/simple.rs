//! Simple loop agent - every discovered tool is visible from step one.
//!
//! No toolbelt curation, no meta-tools, no context compression. The model's
//! first turn without tool calls is terminal: its text becomes the answer.
//! Gateway dispatch mechanics (deadline, truncation, image deferral, fatal
//! error propagation) are shared with the toolbelt agent.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::gateway::{GatewayClient, ToolDescriptor};
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmErrorKind, ToolDefinition};

use super::react::{execute_gateway_call, flush_pending_images};
use super::trajectory::{FinalAnswer, RunStatus, TaskOutcome, Trajectory, UsageTally};

const SYSTEM_PROMPT: &str = "You are an autonomous agent that completes tasks \
using the tools provided. Use tools to make progress; respond without tool \
calls only when you are finished, and make that response your final answer.";

/// Mutable per-run state kept outside the step loop so abnormal exits can
/// still report partial progress.
#[derive(Default)]
struct RunState {
    messages: Vec<ChatMessage>,
    usage: UsageTally,
    final_answer: Option<FinalAnswer>,
}

/// Loop agent: the whole catalog is exposed on every model call.
pub struct LoopAgent {
    llm: Arc<dyn LlmClient>,
    config: RunConfig,
}

impl LoopAgent {
    pub fn new(llm: Arc<dyn LlmClient>, config: RunConfig) -> Self {
        Self { llm, config }
    }

    /// Run a task to completion. Takes ownership of the gateway handle so
    /// the connection is released when the run's scope exits.
    pub async fn run(&self, gateway: Arc<dyn GatewayClient>, task: &str) -> Trajectory {
        self.run_with_cancellation(gateway, task, CancellationToken::new())
            .await
    }

    /// Run a task with an external cancellation handle. Always returns a
    /// trajectory.
    pub async fn run_with_cancellation(
        &self,
        gateway: Arc<dyn GatewayClient>,
        task: &str,
        cancel: CancellationToken,
    ) -> Trajectory {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut state = RunState::default();

        info!("Loop run {} starting: model={}", run_id, self.config.model);

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Loop run {} cancelled externally", run_id);
                RunStatus::Cancelled
            }
            outcome = tokio::time::timeout(
                self.config.wall_clock_timeout,
                self.run_inner(&*gateway, task, &mut state),
            ) => {
                match outcome {
                    Err(_) => {
                        error!("Loop run {} exceeded its wall-clock budget", run_id);
                        RunStatus::Error
                    }
                    Ok(Ok(status)) => status,
                    Ok(Err(e)) => {
                        if (self.config.system_error_policy)(&e) {
                            error!("Loop run {} aborted by system error: {:#}", run_id, e);
                            RunStatus::Error
                        } else {
                            error!("Loop run {} aborted by task error: {:#}", run_id, e);
                            RunStatus::Failed
                        }
                    }
                }
            }
        };

        info!(
            "Loop run {} finished: status={} elapsed={:.1}s",
            run_id,
            status,
            started.elapsed().as_secs_f64()
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

    async fn run_inner(
        &self,
        gateway: &dyn GatewayClient,
        task: &str,
        state: &mut RunState,
    ) -> anyhow::Result<RunStatus> {
        let catalog = gateway.list_tools().await?;
        info!("Discovered {} tools from the gateway", catalog.len());

        let tools: Vec<ToolDefinition> = catalog
            .iter()
            .map(|t: &ToolDescriptor| {
                ToolDefinition::function(
                    t.name.clone(),
                    t.description.clone(),
                    t.input_schema.clone(),
                )
            })
            .collect();

        state.messages.push(ChatMessage::system(SYSTEM_PROMPT));
        state.messages.push(ChatMessage::user(task));

        for step in 0..self.config.max_steps {
            debug!("Loop step {}/{}", step + 1, self.config.max_steps);

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
                Err(e) if e.kind == LlmErrorKind::EmptyResponse => {
                    warn!("Model returned no usable choice: {}", e);
                    state
                        .messages
                        .push(ChatMessage::user("Continue with the task."));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            state.usage.record(response.usage.as_ref());

            let tool_calls = response.tool_calls.clone().filter(|c| !c.is_empty());
            state.messages.push(ChatMessage::assistant(
                response.content.clone(),
                tool_calls.clone(),
                response.reasoning.clone(),
            ));

            // No tool calls is the terminal condition for this variant: the
            // model's text is the answer.
            let Some(calls) = tool_calls else {
                let answer = response.content.unwrap_or_default();
                state.final_answer = Some(FinalAnswer {
                    answer,
                    status: TaskOutcome::Completed,
                });
                return Ok(RunStatus::Completed);
            };

            let mut pending_images = Vec::new();
            for call in &calls {
                execute_gateway_call(
                    gateway,
                    call,
                    self.config.tool_call_timeout,
                    &self.config.truncation,
                    &mut state.messages,
                    &mut pending_images,
                )
                .await?;
            }
            flush_pending_images(&mut state.messages, pending_images);
        }

        info!("Loop step budget exhausted without a final answer");
        Ok(RunStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ContentBlock, GatewayError};
    use crate::llm::{ChatResponse, LlmError, Role, ToolCall};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedLlm {
        script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        calls: AtomicUsize,
        tools_seen: Mutex<Vec<usize>>,
    }

    impl ScriptedLlm {
        fn new(script: Vec<Result<ChatResponse, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                tools_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion_with_options(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            tools: Option<&[crate::llm::ToolDefinition]>,
            _options: ChatOptions,
        ) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tools_seen
                .lock()
                .unwrap()
                .push(tools.map(|t| t.len()).unwrap_or(0));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::empty_response("script exhausted".to_string())))
        }
    }

    struct ScriptedGateway {
        catalog: Vec<ToolDescriptor>,
        script: Mutex<VecDeque<Result<Vec<ContentBlock>, GatewayError>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GatewayClient for ScriptedGateway {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
            Ok(self.catalog.clone())
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: serde_json::Value,
        ) -> Result<Vec<ContentBlock>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Tool("script exhausted".to_string())))
        }
    }

    fn gateway_with(names: &[&str], script: Vec<Result<Vec<ContentBlock>, GatewayError>>) -> ScriptedGateway {
        ScriptedGateway {
            catalog: names
                .iter()
                .map(|name| ToolDescriptor {
                    name: name.to_string(),
                    description: format!("The {} tool", name),
                    input_schema: json!({"type": "object"}),
                })
                .collect(),
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn text_response(text: &str) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            content: Some(text.to_string()),
            tool_calls: None,
            finish_reason: Some("stop".to_string()),
            usage: None,
            model: None,
            reasoning: None,
        })
    }

    fn call_response(id: &str, name: &str) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            content: None,
            tool_calls: Some(vec![ToolCall::function(id, name, "{}")]),
            finish_reason: Some("tool_calls".to_string()),
            usage: None,
            model: None,
            reasoning: None,
        })
    }

    fn text_block(text: &str) -> ContentBlock {
        ContentBlock {
            content_type: "text".to_string(),
            text: Some(text.to_string()),
            data: None,
            mime_type: None,
        }
    }

    #[tokio::test]
    async fn test_no_tool_calls_is_terminal() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            call_response("c1", "search"),
            text_response("the final answer"),
        ]));
        let gateway = Arc::new(gateway_with(&["search"], vec![Ok(vec![text_block("hit")])]));

        let agent = LoopAgent::new(llm.clone(), RunConfig::loop_agent_defaults());
        let trajectory = agent.run(gateway.clone(), "task").await;

        assert_eq!(trajectory.status, RunStatus::Completed);
        assert_eq!(
            trajectory.final_answer.as_ref().unwrap().answer,
            "the final answer"
        );
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        // All catalog tools were visible from the first call
        assert_eq!(llm.tools_seen.lock().unwrap()[0], 1);
    }

    #[tokio::test]
    async fn test_all_tools_visible_without_curation() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            call_response("c1", "b"),
            text_response("done"),
        ]));
        let gateway = Arc::new(gateway_with(
            &["a", "b", "c"],
            vec![Ok(vec![text_block("result from b")])],
        ));

        let agent = LoopAgent::new(llm.clone(), RunConfig::loop_agent_defaults());
        let trajectory = agent.run(gateway.clone(), "task").await;

        assert_eq!(trajectory.status, RunStatus::Completed);
        assert_eq!(llm.tools_seen.lock().unwrap()[0], 3);
        // The tool result landed in the transcript
        assert!(trajectory.messages.iter().any(|m| {
            m.role == Role::Tool && m.text_content() == Some("result from b")
        }));
    }

    #[tokio::test]
    async fn test_fatal_gateway_error_aborts() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            call_response("c1", "a"),
            text_response("never reached"),
        ]));
        let gateway = Arc::new(gateway_with(
            &["a"],
            vec![Err(GatewayError::Transport("gone".to_string()))],
        ));

        let agent = LoopAgent::new(llm.clone(), RunConfig::loop_agent_defaults());
        let trajectory = agent.run(gateway, "task").await;

        assert_eq!(trajectory.status, RunStatus::Error);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_step_budget_exhaustion() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            call_response("c1", "a"),
            call_response("c2", "a"),
            call_response("c3", "a"),
        ]));
        let gateway = Arc::new(gateway_with(
            &["a"],
            vec![
                Ok(vec![text_block("one")]),
                Ok(vec![text_block("two")]),
                Ok(vec![text_block("three")]),
            ],
        ));

        let agent = LoopAgent::new(
            llm,
            RunConfig {
                max_steps: 3,
                ..RunConfig::loop_agent_defaults()
            },
        );
        let trajectory = agent.run(gateway, "task").await;
        assert_eq!(trajectory.status, RunStatus::Failed);
        assert!(trajectory.final_answer.is_none());
    }
}
