//! TWS Session Proxy Binary
//!
//! Runs one batch session against a TWS / IB Gateway and prints the outcome.
//!
//! # Usage
//!
//! ```bash
//! tws-session-proxy lookup --targets contracts.json
//! tws-session-proxy place --targets orders.json --port 4002
//! ```
//!
//! Resolved contracts and order events are written to stdout as JSON lines,
//! followed by the session outcome. Logs go to stderr.
//!
//! # Exit Codes
//!
//! - `0`: every request succeeded
//! - `1`: the session finished with errors or outstanding requests
//! - `2`: setup failed or the session faulted
//!
//! # Environment Variables
//!
//! - `TWS_HOST`: Gateway host (default: 127.0.0.1)
//! - `TWS_PORT`: Gateway port (default: 7497)
//! - `TWS_CLIENT_ID`: API client id (default: 0)
//! - `TWS_SESSION_TIMEOUT_SECS`: Session deadline (default: 900)
//! - `TWS_PACING_DELAY_MS`: Delay between requests, 0 disables (default: 500)
//! - `TWS_EVENT_CHANNEL_CAPACITY`: Inbound event queue size (default: 1024)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: tws_session_proxy=info)

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tws_session_proxy::infrastructure::config::load_dotenv;
use tws_session_proxy::infrastructure::metrics::get_metrics_handle;
use tws_session_proxy::{
    ContractDescription, ContractResolutionWorkflow, ContractSink, ContractSpec,
    GatewayTransport, OrderAcknowledgement, OrderPlacementWorkflow, OrderRecord, OrderSink,
    OrderStatusUpdate, OrderTarget, ProxySettings, SessionConfig, SessionError, SessionOutcome,
    SessionProxy, SinkError, StopReason, TcpGateway, Workflow, init_metrics, init_telemetry,
};

#[derive(Debug, Parser)]
#[command(
    name = "tws-session-proxy",
    version,
    about = "Batch contract lookups and order placement over one TWS session"
)]
struct Cli {
    #[command(flatten)]
    gateway: GatewayArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the environment configuration.
#[derive(Debug, Args)]
struct GatewayArgs {
    /// Gateway host.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Gateway port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// API client id.
    #[arg(long, global = true)]
    client_id: Option<i32>,

    /// Session deadline in seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Delay between requests in milliseconds.
    #[arg(long, global = true)]
    pacing_ms: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve contracts, one candidate required per target.
    Lookup {
        /// JSON file with an array of contract specs.
        #[arg(long)]
        targets: PathBuf,
    },
    /// Place orders and wait for the gateway to acknowledge them.
    Place {
        /// JSON file with an array of order targets.
        #[arg(long)]
        targets: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();
    let cli = Cli::parse();

    let _telemetry_guard = match init_telemetry() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {e}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics recorder not installed");
    }

    let code = match run(cli).await {
        Ok(outcome) if outcome.is_clean() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("Session proxy failed: {e:#}");
            ExitCode::from(2)
        }
    };

    if let Some(handle) = get_metrics_handle() {
        tracing::debug!(metrics = %handle.render(), "Metrics snapshot");
    }
    code
}

async fn run(cli: Cli) -> anyhow::Result<SessionOutcome> {
    let settings = ProxySettings::from_env().context("invalid configuration")?;
    let config = session_config(&settings, &cli.gateway);
    tracing::info!(
        endpoint = %config.endpoint.address(),
        client_id = config.endpoint.client_id,
        timeout_secs = config.timeout.as_secs(),
        pacing_ms = u64::try_from(config.pacing_delay.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );

    let transport: Arc<dyn GatewayTransport> = Arc::new(TcpGateway::new());

    let outcome = match cli.command {
        Command::Lookup { targets } => {
            let targets: Vec<ContractSpec> = load_targets(&targets)?;
            let workflow = ContractResolutionWorkflow::new(targets, Arc::new(StdoutSink));
            drive(workflow, transport, config).await?
        }
        Command::Place { targets } => {
            let targets: Vec<OrderTarget> = load_targets(&targets)?;
            let workflow = OrderPlacementWorkflow::new(targets, Arc::new(StdoutSink));
            drive(workflow, transport, config).await?
        }
    };

    emit(&outcome).context("failed to write outcome")?;
    tracing::info!(
        stop_reason = %outcome.stop_reason,
        errors = outcome.errors.len(),
        outstanding = outcome.outstanding.len(),
        "Session finished"
    );
    Ok(outcome)
}

fn session_config(settings: &ProxySettings, args: &GatewayArgs) -> SessionConfig {
    let mut config = settings.session_config();
    if let Some(host) = &args.host {
        config.endpoint.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.endpoint.port = port;
    }
    if let Some(client_id) = args.client_id {
        config.endpoint.client_id = client_id;
    }
    if let Some(secs) = args.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = args.pacing_ms {
        config.pacing_delay = Duration::from_millis(ms);
    }
    config
}

fn load_targets<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Run one session to completion, stopping it on Ctrl+C.
async fn drive<W: Workflow>(
    workflow: W,
    transport: Arc<dyn GatewayTransport>,
    config: SessionConfig,
) -> Result<SessionOutcome, SessionError> {
    let proxy = SessionProxy::new(workflow, transport, config);

    let session = Arc::clone(proxy.session());
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, stopping session");
            session.stop(StopReason::Requested);
        }
    });

    let result = match proxy.activate().await {
        Ok(()) => proxy.wait_for_completion().await,
        Err(e) => Err(e),
    };
    interrupt.abort();
    result
}

// =============================================================================
// Stdout Sink
// =============================================================================

/// Writes one JSON line per persisted event.
struct StdoutSink;

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SinkLine<'a> {
    Resolved {
        target: &'a ContractSpec,
        contract: &'a ContractDescription,
    },
    Submitted {
        record: &'a OrderRecord,
    },
    Acknowledged {
        rid: uuid::Uuid,
        ack: &'a OrderAcknowledgement,
    },
    Status {
        update: &'a OrderStatusUpdate,
    },
}

fn emit<T: Serialize>(value: &T) -> Result<(), SinkError> {
    let line = serde_json::to_string(value).map_err(|e| SinkError::new(e.to_string()))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").map_err(|e| SinkError::new(e.to_string()))
}

impl ContractSink for StdoutSink {
    fn on_resolved(
        &self,
        target: &ContractSpec,
        description: &ContractDescription,
    ) -> Result<(), SinkError> {
        emit(&SinkLine::Resolved {
            target,
            contract: description,
        })
    }
}

impl OrderSink for StdoutSink {
    fn on_submitted(&self, record: &OrderRecord) -> Result<(), SinkError> {
        emit(&SinkLine::Submitted { record })
    }

    fn on_acknowledged(
        &self,
        record: &OrderRecord,
        ack: &OrderAcknowledgement,
    ) -> Result<(), SinkError> {
        emit(&SinkLine::Acknowledged {
            rid: record.rid,
            ack,
        })
    }

    fn on_status(&self, update: &OrderStatusUpdate) {
        if let Err(e) = emit(&SinkLine::Status { update }) {
            tracing::warn!(error = %e, "Failed to write order status");
        }
    }
}
