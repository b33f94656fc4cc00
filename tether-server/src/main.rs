//! tether - MCP bridge to a browser extension

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use tether_protocol::ServerInfo;
use tether_server::config::{ConfigLoader, DEFAULT_CONFIG_TOML};
use tether_server::peer::PeerListener;
use tether_server::ports::ensure_port_free;
use tether_server::tools::default_registry;
use tether_server::{Context, McpServer, ShutdownCoordinator};
use tether_utils::{init_logging_with_config, LogConfig, Result, TetherError};

/// MCP bridge that forwards tool calls to a browser extension
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
struct Cli {
    /// Read configuration from this file instead of the default location
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", DEFAULT_CONFIG_TOML.trim_start());
        return;
    }

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "tether failed");
            eprintln!("tether: {}", e);
            1
        }
    };

    // The stdin reader may still be parked on a blocking read; don't wait for it
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    // stdout carries the protocol, so logs go to a file
    if let Err(e) = init_logging_with_config(LogConfig::bridge()) {
        eprintln!("tether: file logging unavailable ({}), logging to stderr", e);
        init_logging_with_config(LogConfig {
            filter: LogConfig::bridge().filter,
            ..LogConfig::default()
        })?;
    }

    let config = ConfigLoader::load_and_validate(cli.config.as_deref())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        peer_addr = %config.peer.addr(),
        response_timeout = ?config.channel.response_timeout(),
        "tether starting"
    );

    ensure_port_free(&config.peer.host, config.peer.port).await?;
    let listener = PeerListener::bind(&config.peer.addr()).await?;

    let context = Arc::new(Context::new(config.channel.response_timeout()));
    let registry = default_registry().map_err(|e| TetherError::internal(e.to_string()))?;
    let server = Arc::new(McpServer::new(
        Arc::clone(&context),
        Arc::new(registry),
        ServerInfo::new(&config.server.name, &config.server.version),
    ));

    let (acceptor_stop_tx, acceptor_stop_rx) = watch::channel(false);
    let acceptor = tokio::spawn(listener.run(Arc::clone(&context), acceptor_stop_rx));

    let serve = tokio::spawn(
        Arc::clone(&server).serve(tokio::io::stdin(), tokio::io::stdout()),
    );

    tokio::select! {
        _ = server.wait_closed() => info!("Client disconnected"),
        _ = shutdown_signal() => info!("Termination signal received"),
    }

    let coordinator = ShutdownCoordinator::new(Arc::clone(&server), Arc::clone(&context))
        .with_acceptor(acceptor_stop_tx, acceptor);
    coordinator.shutdown().await;

    let drain_timeout = config.shutdown.drain_timeout();
    match tokio::time::timeout(drain_timeout, serve).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "MCP server stopped with an error"),
        Ok(Err(e)) => error!(error = %e, "MCP server task failed"),
        Err(_) => warn!(timeout = ?drain_timeout, "Gave up waiting for in-flight requests"),
    }

    info!("tether stopped");
    Ok(())
}

/// Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("tether").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_args() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.config, None);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_config_path() {
        let cli = parse(&["--config", "/tmp/tether.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/tether.toml")));

        let cli = parse(&["--config=/etc/tether.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tether.toml")));

        let cli = parse(&["-c", "x.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn test_config_requires_value() {
        assert!(parse(&["--config"]).is_err());
    }

    #[test]
    fn test_print_config_flag() {
        assert!(parse(&["--print-config"]).unwrap().print_config);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&["-h"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
        assert_eq!(parse(&["--version"]).unwrap_err().kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_unknown_argument() {
        let err = parse(&["--verbose"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }
}
