//! Client-side command dispatch

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use crate::commands::{BackendKind, Commands, TransportKind};
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::executor::{LocalExecutor, ShellExecutor, ShellRequest};
use crate::mailbox::{MailboxExecutor, MailboxServer};
use crate::socket::{SocketExecutor, SocketServer};

/// Dispatch a parsed CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Serve {
            transport,
            exchange_dir,
        } => serve(transport, exchange_dir).await,
        Commands::Run {
            command,
            parameters,
            via,
            address,
            env,
            shell,
            timeout_ms,
        } => run(command, parameters, via, address, env, shell, timeout_ms).await,
    }
}

async fn serve(transport: TransportKind, exchange_dir: Option<PathBuf>) -> Result<()> {
    let config = Config::load()?;

    match transport {
        TransportKind::Socket => {
            let server = SocketServer::bind_with_config(&config).await?;
            // The address line is the machine-readable handoff to the harness
            println!("address: {}", server.address());

            let (tx, rx) = oneshot::channel();
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = tx.send(());
            });

            server.run(rx).await
        }
        TransportKind::Mailbox => {
            let dir = exchange_dir.unwrap_or_else(paths::default_exchange_dir);
            let server = MailboxServer::start(&dir).await?;
            println!("address: {}", server.exchange_dir().display());

            shutdown_signal().await;
            server.stop().await;
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    command: String,
    parameters: Vec<String>,
    via: BackendKind,
    address: Option<String>,
    env: Vec<String>,
    shell: bool,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let config = Config::load()?;

    let request = ShellRequest::new(command)
        .parameters(parameters)
        .environment(parse_env(&env)?)
        .through_shell(shell)
        .timeout(Duration::from_millis(
            timeout_ms.unwrap_or(config.timeouts.command_ms),
        ));

    // The backend is fixed here, once; nothing below branches on it again
    let executor: Box<dyn ShellExecutor> = match via {
        BackendKind::Local => Box::new(LocalExecutor::new()),
        BackendKind::Socket => Box::new(SocketExecutor::new(resolve_address(address)?)),
        BackendKind::Mailbox => {
            Box::new(MailboxExecutor::with_config(resolve_address(address)?, &config))
        }
    };

    let mut stream = executor.execute(request).await?;
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.next_chunk().await {
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;

    Ok(())
}

/// Resolve the server address from the flag or the environment
fn resolve_address(address: Option<String>) -> Result<String> {
    if let Some(address) = address {
        return Ok(address);
    }
    std::env::var(paths::ADDRESS_ENV_VAR).map_err(|_| {
        Error::Config(format!(
            "no server address: pass --address or set ${}",
            paths::ADDRESS_ENV_VAR
        ))
    })
}

/// Parse KEY=VALUE pairs into an environment map
fn parse_env(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::Config(format!(
                "invalid environment entry '{}', expected KEY=VALUE",
                pair
            )));
        };
        if map.insert(key.to_string(), value.to_string()).is_some() {
            return Err(Error::Config(format!("duplicate environment key '{}'", key)));
        }
    }
    Ok(map)
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {e}");
            return std::future::pending().await;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to install SIGINT handler: {e}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("received Ctrl+C, shutting down");
    }
}
