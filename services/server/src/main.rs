use std::process::ExitCode;

use clap::Parser;
use push_core::config::{Protocol, RawConfig};
use server::state::AppState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line flags, mirroring the reference service's single `-c`
/// config-file convention.
#[derive(Debug, Parser)]
struct Args {
    #[arg(short = 'c', long = "config", default_value = "./pushgate.conf")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let text = match std::fs::read_to_string(&args.config) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("failed to read config file {}: {err}", args.config);
            return ExitCode::FAILURE;
        }
    };
    let config = match RawConfig::from_json(&text).and_then(RawConfig::validate) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid config: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.log, config.debug);

    let state = AppState::new(config);
    info!(
        addr = %state.config.addr,
        admin_addr = %state.config.admin_addr,
        protocol = ?state.config.protocol,
        "pushgate starting"
    );

    let admin_router = server::build_admin_router(state.clone());
    let admin_listener = match tokio::net::TcpListener::bind(&state.config.admin_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %state.config.admin_addr, "failed to bind admin listener");
            return ExitCode::FAILURE;
        }
    };
    let admin_task = tokio::spawn(
        axum::serve(admin_listener, admin_router).with_graceful_shutdown(shutdown_signal()),
    );

    let subscribe_task = match state.config.protocol {
        Protocol::Tcp => tokio::spawn(async move {
            if let Err(err) = server::listeners::tcp::serve(state).await {
                error!(%err, "tcp subscribe listener exited with error");
            }
        }),
        Protocol::WebSocket => {
            let subscribe_router = server::build_subscribe_router(state.clone());
            let listener = match tokio::net::TcpListener::bind(&state.config.addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(%err, addr = %state.config.addr, "failed to bind subscribe listener");
                    return ExitCode::FAILURE;
                }
            };
            tokio::spawn(async move {
                if let Err(err) = axum::serve(listener, subscribe_router)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
                {
                    error!(%err, "websocket subscribe listener exited with error");
                }
            })
        }
    };

    let _ = tokio::join!(admin_task, subscribe_task);
    info!("pushgate shut down gracefully");
    ExitCode::SUCCESS
}

fn init_logging(log_path: &str, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if log_path.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let path = std::path::Path::new(log_path);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("pushgate.log"));
        let file_appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard: it must live for the process lifetime to keep
        // flushing the non-blocking writer, and main() never returns early
        // from here on.
        std::mem::forget(guard);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .init();
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
