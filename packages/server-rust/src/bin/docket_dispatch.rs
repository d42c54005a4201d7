//! Line-oriented command runner.
//!
//! Reads one JSON command body per line from stdin, dispatches it through the
//! full middleware pipeline, and writes the reply as one JSON line to stdout.
//! Bodies without `$db` run against `--db`.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use docket_core::{Document, OpMsgRequest, ReadConcernLevel, RequestContext};
use docket_server::{
    build_command_pipeline, register_builtin_commands, CommandDispatcher, CommandRegistry, CommandRequest,
    DispatchError, OperationContext, ServerConfig, ServiceContext,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tower::{Service, ServiceExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docket-dispatch")]
#[command(about = "Run commands read from stdin through the dispatch pipeline")]
struct Args {
    /// Database used for bodies that carry no `$db`
    #[arg(long, default_value = "admin")]
    db: String,

    /// Node identifier reported by serverStatus (random when unset)
    #[arg(long, env = "DOCKET_NODE_ID")]
    node_id: Option<String>,

    /// Application name attached to every request
    #[arg(long, env = "DOCKET_APP_NAME")]
    app_name: Option<String>,

    #[arg(long, env = "DOCKET_MAX_CONCURRENT_COMMANDS", default_value_t = 1000)]
    max_concurrent_commands: u32,

    /// Register test-only commands such as configureFailPoint
    #[arg(long, env = "DOCKET_ENABLE_TEST_COMMANDS")]
    enable_test_commands: bool,

    #[arg(long, env = "DOCKET_DEFAULT_READ_CONCERN", value_parser = parse_read_concern_level)]
    default_read_concern: Option<ReadConcernLevel>,

    #[arg(long, env = "DOCKET_DEFAULT_MAX_TIME_MS")]
    default_max_time_ms: Option<u64>,

    /// Commands at or above this duration are logged as slow
    #[arg(long, env = "DOCKET_SLOW_MS", default_value_t = 100)]
    slow_ms: u64,

    /// Emit logs as JSON
    #[arg(long, env = "DOCKET_LOG_JSON")]
    log_json: bool,
}

fn parse_read_concern_level(s: &str) -> Result<ReadConcernLevel, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown read concern level '{s}'"))
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            node_id: self
                .node_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            max_concurrent_commands: self.max_concurrent_commands,
            enable_test_commands: self.enable_test_commands,
            default_read_concern: self.default_read_concern,
            default_max_time_ms: self.default_max_time_ms,
            slow_command_threshold_ms: self.slow_ms,
            ..ServerConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    // Logs go to stderr so stdout carries replies only.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_request(line: &str, default_db: &str) -> anyhow::Result<OpMsgRequest> {
    let body: Document = serde_json::from_str(line).context("request line is not a JSON object")?;
    if body.contains_key(docket_core::request::DB_FIELD) {
        Ok(OpMsgRequest::from_body(body)?)
    } else {
        Ok(OpMsgRequest::new(default_db, body))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.server_config();
    let mut registry = CommandRegistry::new();
    register_builtin_commands(&mut registry, &config);
    let service = Arc::new(ServiceContext::new(config.clone(), registry));
    let mut pipeline = build_command_pipeline(CommandDispatcher::new(service.clone()), &config);
    info!(node_id = %config.node_id, "docket-dispatch ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line, &args.db) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "skipping malformed request");
                continue;
            }
        };
        let op_ctx = Arc::new(OperationContext::new(
            service.clone(),
            RequestContext::external(args.app_name.as_deref()),
        ));

        let ready = pipeline.ready().await?;
        match ready.call(CommandRequest::new(op_ctx, request)).await {
            Ok(reply) => {
                let mut out = serde_json::to_vec(&reply.body)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
            Err(DispatchError::ConnectionClosed { reason }) => {
                info!(%reason, "session closed by command");
                break;
            }
            Err(e) => warn!(error = %e, "command rejected"),
        }
    }

    Ok(())
}
