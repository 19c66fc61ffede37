use std::sync::Arc;

use thiserror::Error;
use tradebot_agent::checkpoint::InMemoryCheckpointStore;
use tradebot_agent::engine::WorkflowEngine;
use tradebot_agent::llm::{ModelError, OpenAiChatModel};
use tradebot_core::audit::{AuditEvent, AuditSink};
use tradebot_core::config::{AppConfig, ConfigError, LoadOptions};
use tradebot_core::tools::StaticPriceSource;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub engine: Arc<WorkflowEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("chat model client construction failed: {0}")]
    Model(#[from] ModelError),
}

/// Forwards engine audit events into the structured log stream.
#[derive(Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            thread_id = event.thread_id.as_deref().unwrap_or("unknown"),
            outcome = ?event.outcome,
            "audit event"
        );
    }
}

pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

/// Wires the engine exactly once from an already-loaded config. All state is
/// process-local; a restart starts from empty checkpoints.
pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        provider = ?config.llm.provider,
        "starting application bootstrap"
    );

    // Both supported providers speak the OpenAI-compatible wire format.
    let model = Arc::new(OpenAiChatModel::from_config(&config.llm)?);
    let engine = Arc::new(WorkflowEngine::build(
        model,
        Arc::new(StaticPriceSource::default()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(TracingAuditSink),
    ));

    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        tool_count = engine.tool_count(),
        "workflow engine wired"
    );

    Ok(Application { config, engine })
}
