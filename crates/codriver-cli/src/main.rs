//! Codriver server entry point.
//!
//! Loads configuration from the environment (and an optional `.env` file),
//! wires the LLM client, tool dispatcher, and permission broker together,
//! and starts the HTTP session controller.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use codriver_agent::{
    LlmClient, LlmConfig, LoopConfig, MemoryConfig, PermissionBroker, TracingUsageSink,
};
use codriver_server::{CodriverServer, ServerConfig};
use codriver_tools::{HttpToolBackend, ToolEndpoints};

/// Codriver — a tool-using coding-assistant runtime.
#[derive(Debug, Parser)]
#[command(name = "codriver", version, about)]
struct Args {
    /// Address to bind the HTTP server to.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Path to an env file to load before reading configuration.
    #[arg(long, default_value = ".env")]
    env_file: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Missing env file is fine; explicit paths that fail to parse are not.
    match dotenvy::from_filename(&args.env_file) {
        Ok(_) => {}
        Err(dotenvy::Error::Io(_)) => {}
        Err(e) => return Err(e).context(format!("failed to load env file {}", args.env_file)),
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codriver=info,codriver_agent=info,codriver_tools=info,codriver_server=info".into()),
        )
        .init();

    let mut server_config = ServerConfig::from_env();
    if let Some(bind_addr) = args.bind_addr {
        server_config.bind_addr = bind_addr;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }

    let llm_config = LlmConfig::from_env().context("LLM configuration incomplete")?;
    tracing::info!(
        model = %llm_config.model,
        summary_model = %llm_config.summary_model,
        base_url = %llm_config.base_url,
        "llm configured"
    );

    let llm = Arc::new(
        LlmClient::new(llm_config, Arc::new(TracingUsageSink))
            .context("failed to build LLM client")?,
    );

    let tools = Arc::new(
        HttpToolBackend::new(ToolEndpoints::from_env())
            .context("failed to build tool dispatcher")?,
    );

    let broker = Arc::new(PermissionBroker::from_env());
    let loop_config = LoopConfig::from_env();
    let memory_config = MemoryConfig::from_env();

    tracing::info!(
        max_depth = loop_config.max_depth,
        tool_call_quota = loop_config.tool_call_quota,
        token_ceiling = memory_config.token_ceiling,
        "agent configured"
    );

    let server = CodriverServer::new(
        server_config,
        llm,
        tools,
        broker,
        loop_config,
        memory_config,
    );

    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))
}
