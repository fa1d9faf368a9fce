//! `harbor` command line: boot the application and run its RPC server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use harbor_server::error::error_chain;
use harbor_server::{
    AppContext, BootOptions, Bootstrap, ConcurrencyMode, Environment, ReloadController,
    ServerSupervisor,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about = "Boot a Harbor application and serve RPC")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Application root (defaults to the current directory)
    #[arg(long, env = "HARBOR_ROOT", global = true)]
    root: Option<PathBuf>,

    /// Environment name
    #[arg(long, env = "HARBOR_ENV", global = true)]
    env: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot and serve until interrupted
    Start {
        /// Concurrency mode: threaded or event-driven
        #[arg(long)]
        mode: Option<ConcurrencyMode>,

        /// Listening port for the selected mode
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the resolved configuration as JSON
    Config,
}

impl Cli {
    fn boot_options(&self) -> BootOptions {
        let mut options = BootOptions::new();
        if let Some(root) = &self.root {
            options = options.root(root.clone());
        }
        if let Some(env) = &self.env {
            options = options.env(Environment::new(env.clone()));
        }
        options
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut options = cli.boot_options();

    match cli.command {
        Commands::Config => {
            let ctx = AppContext::new(&options.install_subscriber(false));
            let config = ctx.config().context("failed to load configuration")?;
            println!("{}", serde_json::to_string_pretty(&*config)?);
        }
        Commands::Start { mode, port } => {
            if let Some(mode) = mode {
                options = options.config_override("concurrency_mode", mode.as_str());
            }
            if let Some(port) = port {
                // Only the selected mode's port is bound, so set both.
                options = options
                    .config_override("port", port.to_string())
                    .config_override("thread_port", port.to_string());
            }

            let ctx = Bootstrap::new(options).init().context("boot failed")?;
            let mut supervisor = ServerSupervisor::new(Arc::clone(&ctx));
            let handle = supervisor.start().await.context("server start failed")?;
            eprintln!(
                "harbor: {} serving on {} ({})",
                ctx.env(),
                handle.local_addr(),
                handle.mode()
            );

            spawn_reload_on_hangup(ReloadController::new(Arc::clone(&ctx)));
            supervisor.serve(shutdown_signal()).await?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(unix)]
fn spawn_reload_on_hangup(reloader: ReloadController) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "SIGHUP reload unavailable");
            return;
        }
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            let reloader = reloader.clone();
            match tokio::task::spawn_blocking(move || reloader.reload(false)).await {
                Ok(Ok(_)) => info!("reload handled"),
                Ok(Err(e)) => error!(error = %error_chain(&e), "reload failed"),
                Err(e) => error!(error = %e, "reload task failed"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_reloader: ReloadController) {}
