use std::{num::NonZeroUsize, path::PathBuf, thread};

use clap::{Args, Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(name = "sockbudget")]
#[command(version)]
#[command(about = "Raise and verify open-file limits before opening many simultaneous connections.")]
pub struct Cli {
    #[command(flatten)]
    pub load: LoadConfig,

    #[command(flatten)]
    pub global: GlobalConfig,
}

#[derive(Args, Debug, Clone)]
pub struct LoadConfig {
    /// Number of simultaneous connections the workload expects to open
    #[arg(short = 'c', long, env("CONNECTIONS"), default_value_t = 1)]
    pub connections: u64,

    /// Number of workers sharing the descriptor budget, defaults to the available parallelism
    #[arg(short = 'w', long, env("WORKERS"))]
    pub workers: Option<u64>,

    /// Only audit the current limits, never try to raise them
    #[arg(long, env("SKIP_NEGOTIATION"), default_value_t = false)]
    pub skip_negotiation: bool,

    /// Fail with exit code 2 when the audit finds the host unable to sustain the load
    #[arg(long, env("STRICT"), default_value_t = false)]
    pub strict: bool,
}

impl LoadConfig {
    pub fn workers(&self) -> u64 {
        self.workers.unwrap_or_else(|| {
            thread::available_parallelism().map_or(1, NonZeroUsize::get) as u64
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct GlobalConfig {
    /// How the audit report is printed on stdout
    #[arg(long, env("FORMAT"), value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Root of the sysctl tree network tunables are read from
    #[arg(long, env("PROC_SYS_ROOT"), default_value = "/proc/sys", value_parser = clap::value_parser!(PathBuf))]
    pub proc_sys_root: PathBuf,

    /// Log level
    #[arg(long, env("LOG_LEVEL"), default_value_t = tracing_subscriber::filter::LevelFilter::INFO)]
    pub log_level: tracing_subscriber::filter::LevelFilter,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
