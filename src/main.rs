//! toolbelt-agent - CLI entry point.
//!
//! Runs one task against the configured gateway and prints the resulting
//! trajectory as JSON on stdout.
//!
//! Usage:
//!   toolbelt-agent [--simple] <task...>
//!
//! Configuration comes from the environment; see `config` module docs.

use std::sync::Arc;

use toolbelt_agent::agent::{LoopAgent, ReactToolbeltAgent};
use toolbelt_agent::config::{Config, RunConfig, DEFAULT_LOOP_MAX_STEPS};
use toolbelt_agent::gateway::McpGateway;
use toolbelt_agent::llm::OpenRouterClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolbelt_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse arguments: an optional --simple flag, then the task text
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let simple = args.first().map(|a| a == "--simple").unwrap_or(false);
    if simple {
        args.remove(0);
    }
    let task = args.join(" ");
    if task.trim().is_empty() {
        anyhow::bail!("usage: toolbelt-agent [--simple] <task...>");
    }

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={} gateway={}",
        config.default_model, config.gateway.endpoint
    );

    let llm = Arc::new(OpenRouterClient::new(config.api_key.clone()));
    let gateway = Arc::new(McpGateway::connect(config.gateway.clone()).await?);

    let trajectory = if simple {
        let run = RunConfig {
            max_steps: DEFAULT_LOOP_MAX_STEPS,
            ..config.run.clone()
        };
        LoopAgent::new(llm, run).run(gateway, &task).await
    } else {
        ReactToolbeltAgent::new(llm, config.run.clone())
            .run(gateway, &task)
            .await
    };

    info!(
        "Run finished: status={} steps_used={} elapsed={:.1}s",
        trajectory.status, trajectory.usage.model_calls, trajectory.time_elapsed
    );

    println!("{}", serde_json::to_string_pretty(&trajectory)?);

    Ok(())
}
