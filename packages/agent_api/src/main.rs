use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use agent_api::config::{CliOverrides, FileConfig, load_config};
use agent_api::pty_source::PtyScreenSource;
use agent_api::rest_agent::{RestAgent, RestClient};
use agent_api::{AgentType, AppState, create_router};
use pty_manager::{PtyActor, PtyHandle};
use screen_tracker::{Agent, EventEmitter, ScreenTracker, spawn_emitter_loop};

/// How long the agent gets to exit on SIGTERM before it is killed.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "agentapi")]
#[command(about = "HTTP API for terminal coding agents")]
struct Args {
    /// Agent type (inferred from the command when omitted)
    #[arg(short = 't', long = "type", value_enum)]
    agent_type: Option<AgentType>,

    /// Port for the HTTP server
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Config file (default: ./agentapi.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Keep serving after the agent process exits
    #[arg(long)]
    persist: bool,

    /// Terminal height in rows
    #[arg(long)]
    rows: Option<u16>,

    /// Terminal width in columns
    #[arg(long)]
    cols: Option<u16>,

    /// Agent command and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "agentapi=debug,agent_api=debug,screen_tracker=debug,pty_manager=debug,tower_http=debug,info"
    } else {
        "agentapi=info,agent_api=info,screen_tracker=info,pty_manager=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut config: FileConfig = load_config(args.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    config.apply_overrides(&CliOverrides {
        host: args.host.clone(),
        port: args.port,
        rows: args.rows,
        cols: args.cols,
    });

    let agent_type = match (args.agent_type, args.command.first()) {
        (Some(agent_type), _) => agent_type,
        (None, Some(program)) => AgentType::from_command(program),
        (None, None) => bail!("No agent command given. Usage: agentapi [OPTIONS] -- <COMMAND> [ARGS]..."),
    };
    info!(%agent_type, command = ?args.command, "Starting agentapi");

    let cancel = CancellationToken::new();
    let (agent, pty) = start_agent(agent_type, &args.command, &config).await?;

    let emitter = Arc::new(EventEmitter::new(config.events.queue_capacity));
    agent.start_polling(cancel.clone());
    let emitter_task = spawn_emitter_loop(
        agent.clone(),
        emitter.clone(),
        config.tracker_config().snapshot_interval,
        cancel.clone(),
    );

    let app = create_router(AppState {
        agent,
        emitter: emitter.clone(),
        agent_type,
    });

    let addr = config.bind_addr().await?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("agentapi listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET    /messages         - Conversation history");
    info!("  POST   /message          - Send a message");
    info!("  GET    /status           - Agent status");
    info!("  GET    /events           - Conversation events (SSE)");
    info!("  GET    /internal/screen  - Screen updates (SSE)");

    let exit_watch = if args.persist { None } else { pty.clone() };
    let shutdown = {
        let cancel = cancel.clone();
        let emitter = emitter.clone();
        async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("Received shutdown signal, cleaning up..."),
                    Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                },
                _ = wait_for_agent_exit(exit_watch) => {
                    info!("Agent process exited, shutting down");
                }
            }
            cancel.cancel();
            // Open SSE streams end once their queues close
            emitter.unsubscribe_all();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    if let Err(e) = emitter_task.await {
        warn!("Emitter loop ended abnormally: {}", e);
    }
    if let Some(pty) = pty {
        if !pty.has_exited() {
            info!("Stopping agent process");
            if let Err(e) = pty.shutdown(STOP_GRACE_PERIOD).await {
                error!("Failed to stop agent process: {}", e);
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Launch the agent. Terminal agents always run under a PTY; a REST agent
/// runs its server under one only when a command is given, otherwise an
/// already-running server is assumed.
async fn start_agent(
    agent_type: AgentType,
    command: &[String],
    config: &FileConfig,
) -> Result<(Arc<dyn Agent>, Option<PtyHandle>)> {
    let pty = match command.split_first() {
        Some((program, rest)) => {
            let handle = PtyActor::spawn(config.pty_config(program, rest))
                .with_context(|| format!("Failed to start {}", program))?;
            Some(handle)
        }
        None => None,
    };

    if agent_type.is_rest() {
        let rest_config = config.rest_agent_config();
        info!(url = %rest_config.base_url, "Waiting for agent server");
        RestClient::new(&rest_config.base_url, rest_config.request_timeout)?
            .wait_for_ready(config.ready_timeout())
            .await
            .context("Agent server did not become ready")?;
        let agent = RestAgent::connect(&rest_config)
            .await
            .context("Failed to open agent session")?;
        return Ok((Arc::new(agent), pty));
    }

    let Some(handle) = pty else {
        bail!("{} needs a command to run", agent_type);
    };
    let tracker = ScreenTracker::new(
        Arc::new(PtyScreenSource::new(handle.clone())),
        agent_type.formatter(),
        config.tracker_config(),
    );
    Ok((Arc::new(tracker), Some(handle)))
}

async fn wait_for_agent_exit(pty: Option<PtyHandle>) {
    match pty {
        Some(pty) => pty.wait_for_exit().await,
        None => std::future::pending().await,
    }
}
