//! Configuration management for the agent harness.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. Your OpenRouter API key.
//! - `GATEWAY_URL` - Required. Endpoint of the tool gateway.
//! - `GATEWAY_AUTH_TOKEN` - Optional. Bearer token for the gateway.
//! - `DEFAULT_MODEL` - Optional. The LLM model to use. Defaults to `anthropic/claude-sonnet-4.5`.
//! - `MAX_STEPS` - Optional. Maximum agent loop steps. Defaults to `100`.
//! - `RUN_TIMEOUT_SECS` - Optional. Overall wall-clock budget. Defaults to `10800` (3h).
//! - `TOOL_CALL_TIMEOUT_SECS` - Optional. Per-tool-call deadline. Defaults to `60`.
//! - `MODEL_CALL_TIMEOUT_SECS` - Optional. Per-model-call deadline. Defaults to `600`.
//! - `TOOLBELT_CAPACITY` - Optional. Max tools in the toolbelt. Defaults to `80`.

use std::time::Duration;

use thiserror::Error;

use crate::agent::resum::ResumConfig;
use crate::agent::toolbelt::DEFAULT_TOOLBELT_CAPACITY;
use crate::agent::trajectory::{default_is_system_error, SystemErrorPolicy};
use crate::agent::truncate::TruncationPolicy;
use crate::gateway::GatewayConnection;

/// Default step budget for the toolbelt agent.
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Default step budget for the simple loop agent, which spends no steps on
/// tool discovery.
pub const DEFAULT_LOOP_MAX_STEPS: usize = 250;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Process-level configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// Tool gateway connection descriptor
    pub gateway: GatewayConnection,

    /// Default LLM model identifier (OpenRouter format)
    pub default_model: String,

    /// Per-run settings
    pub run: RunConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` or
    /// `GATEWAY_URL` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let gateway_url = std::env::var("GATEWAY_URL")
            .map_err(|_| ConfigError::MissingEnvVar("GATEWAY_URL".to_string()))?;
        let mut gateway = GatewayConnection::new(gateway_url);
        if let Ok(token) = std::env::var("GATEWAY_AUTH_TOKEN") {
            gateway = gateway.with_auth_token(token);
        }

        let default_model = std::env::var("DEFAULT_MODEL")
            .unwrap_or_else(|_| "anthropic/claude-sonnet-4.5".to_string());

        let mut run = RunConfig {
            model: default_model.clone(),
            ..RunConfig::default()
        };
        run.max_steps = env_parse("MAX_STEPS", run.max_steps)?;
        run.wall_clock_timeout =
            Duration::from_secs(env_parse("RUN_TIMEOUT_SECS", run.wall_clock_timeout.as_secs())?);
        run.tool_call_timeout = Duration::from_secs(env_parse(
            "TOOL_CALL_TIMEOUT_SECS",
            run.tool_call_timeout.as_secs(),
        )?);
        run.model_call_timeout = Duration::from_secs(env_parse(
            "MODEL_CALL_TIMEOUT_SECS",
            run.model_call_timeout.as_secs(),
        )?);
        run.toolbelt_capacity = env_parse("TOOLBELT_CAPACITY", run.toolbelt_capacity)?;

        Ok(Self {
            api_key,
            gateway,
            default_model,
            run,
        })
    }
}

/// Parse an optional env var, falling back to a default.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

/// Per-run configuration with documented defaults.
///
/// Every threshold a component takes lives here; there is no ambient
/// mutable state.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Model identifier for the run
    pub model: String,

    /// Maximum loop steps before the run fails
    pub max_steps: usize,

    /// Overall wall-clock budget; expiry is not recoverable
    pub wall_clock_timeout: Duration,

    /// Deadline for each gateway tool call; expiry is recoverable
    pub tool_call_timeout: Duration,

    /// Deadline for each model call; expiry is recoverable
    pub model_call_timeout: Duration,

    /// Maximum tools in the toolbelt
    pub toolbelt_capacity: usize,

    /// Tool-result truncation thresholds
    pub truncation: TruncationPolicy,

    /// Context compression settings
    pub resum: ResumConfig,

    /// Classifies unhandled errors into infrastructure vs. task failures
    pub system_error_policy: SystemErrorPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4.5".to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            wall_clock_timeout: Duration::from_secs(3 * 60 * 60),
            tool_call_timeout: Duration::from_secs(60),
            model_call_timeout: Duration::from_secs(600),
            toolbelt_capacity: DEFAULT_TOOLBELT_CAPACITY,
            truncation: TruncationPolicy::default(),
            resum: ResumConfig::default(),
            system_error_policy: default_is_system_error,
        }
    }
}

impl RunConfig {
    /// Defaults for the simple loop agent: a larger step budget, since no
    /// steps are spent on toolbelt curation.
    pub fn loop_agent_defaults() -> Self {
        Self {
            max_steps: DEFAULT_LOOP_MAX_STEPS,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.wall_clock_timeout, Duration::from_secs(10_800));
        assert_eq!(config.tool_call_timeout, Duration::from_secs(60));
        assert_eq!(config.model_call_timeout, Duration::from_secs(600));
        assert_eq!(config.toolbelt_capacity, 80);
    }

    #[test]
    fn test_loop_agent_defaults_raise_step_budget() {
        let config = RunConfig::loop_agent_defaults();
        assert_eq!(config.max_steps, 250);
        assert_eq!(config.toolbelt_capacity, 80);
    }
}
