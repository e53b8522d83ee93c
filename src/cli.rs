//! Command line of the gateway binary and the parent-process watchdog

use crate::router::recipes::RecipeOverrides;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3307;

/// How often the watchdog checks the parent process
pub const PARENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Transport between the editor and the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    Stdio,
    Tcp,
}

/// CLI arguments for the LSP gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Transport used to talk to the editor
    #[arg(long, value_enum, default_value_t = TransportMode::Stdio)]
    pub mode: TransportMode,

    /// TCP port to listen on in tcp mode
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Exit when this process disappears
    #[arg(
        long,
        alias = "parentPid",
        value_name = "PID",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub parent_pid: Option<u32>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log file path (overrides LSP_GATEWAY_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Path to clangd executable (overrides CLANGD_PATH env var)
    #[arg(long, value_name = "PATH")]
    pub clangd_path: Option<String>,

    /// Python interpreter with pylsp installed (overrides PYLSP_PYTHON env var)
    #[arg(long, value_name = "PATH")]
    pub python_path: Option<String>,

    /// Path to typescript-language-server (overrides TS_LANGUAGE_SERVER env var)
    #[arg(long, value_name = "PATH")]
    pub ts_server_path: Option<String>,

    /// Path to the jdtls launcher (overrides JDTLS_PATH env var)
    #[arg(long, value_name = "PATH")]
    pub jdtls_path: Option<String>,
}

impl Args {
    pub fn recipe_overrides(&self) -> RecipeOverrides {
        RecipeOverrides {
            clangd_path: self.clangd_path.clone(),
            python_path: self.python_path.clone(),
            typescript_server_path: self.ts_server_path.clone(),
            jdtls_path: self.jdtls_path.clone(),
        }
    }
}

/// Whether a process with `pid` exists
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 delivers nothing; kill only checks that the target
    // exists and may be signalled
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Resolve once `pid` is gone
pub async fn watch_parent(pid: u32, interval: Duration) {
    loop {
        if !process_alive(pid) {
            warn!("Parent process {} is gone", pid);
            return;
        }
        tokio::time::sleep(interval).await;
    }
}
