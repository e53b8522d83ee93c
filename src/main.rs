use clap::Parser;
use lsp_gateway::cli::{Args, PARENT_POLL_INTERVAL, TransportMode, watch_parent};
use lsp_gateway::gateway::{Gateway, serve_stdio, serve_tcp};
use lsp_gateway::logging::{LogConfig, init_logging};
use lsp_gateway::router::{ProcessLauncher, RecipeBook, RecipeConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Time given to backends to read `exit` before the runtime kills them
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let recipe_config = RecipeConfig::resolve(args.recipe_overrides());
    info!(
        "Backends: clangd={} python={} typescript={} jdtls={}",
        recipe_config.clangd_path,
        recipe_config.python_path,
        recipe_config.typescript_server_path,
        recipe_config.jdtls_path
    );

    let launcher = Arc::new(ProcessLauncher::new(Arc::new(RecipeBook::new(recipe_config))));
    let mut gateway = Gateway::new(launcher);

    let serve = async {
        match args.mode {
            TransportMode::Stdio => serve_stdio(&mut gateway).await.map(|_| ()),
            TransportMode::Tcp => serve_tcp(&mut gateway, args.port).await,
        }
    };

    let result = match args.parent_pid {
        Some(pid) => {
            info!("Watching parent process {}", pid);
            tokio::select! {
                result = serve => result,
                _ = watch_parent(pid, PARENT_POLL_INTERVAL) => Ok(()),
            }
        }
        None => serve.await,
    };

    gateway.shutdown().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    // A blocked stdin read would keep the runtime from shutting down
    match result {
        Ok(()) => {
            info!("Gateway stopped");
            std::process::exit(0);
        }
        Err(e) => {
            error!("Gateway stopped: {}", e);
            std::process::exit(1);
        }
    }
}
