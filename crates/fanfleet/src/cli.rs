//! Clap derive structures for the `fanfleet` CLI.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fanfleet -- run and control a wind-tunnel fan array
#[derive(Debug, Parser)]
#[command(
    name = "fanfleet",
    version,
    about = "Run and control a wind-tunnel fan array",
    long_about = "Master for a fleet of networked fan-array controllers.\n\n\
        Discovers Slaves over UDP broadcast, keeps one connection per device,\n\
        and exposes the array to external tools through a datagram protocol.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "FANFLEET_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "FANFLEET_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the Master and print fleet events until Ctrl-C
    Run(RunArgs),

    /// Listen for Slaves for a while, then list every device seen
    #[command(alias = "disc")]
    Discover(DiscoverArgs),

    /// Send one external-control command to a running Master
    Ctl(CtlArgs),

    /// Inspect or create the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Approve every newly discovered device
    #[arg(long)]
    pub auto_approve: bool,

    /// Do not start the external-control service
    #[arg(long)]
    pub no_external: bool,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// How long to listen
    #[arg(long, short = 's', default_value = "5")]
    pub seconds: u64,
}

#[derive(Debug, Args)]
pub struct CtlArgs {
    /// External listener address (host:port)
    pub target: SocketAddr,

    /// Command code: F, N, S, PROFILE, DC-UNIFORM, DC-VECTOR, EVAL, RESET
    pub code: String,

    /// Command arguments (attribute, duty cycle, comma-separated vector, query)
    pub args: Vec<String>,

    /// Reply timeout in milliseconds
    #[arg(long, short = 't', default_value = "1000")]
    pub timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the effective configuration (passcode redacted)
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
