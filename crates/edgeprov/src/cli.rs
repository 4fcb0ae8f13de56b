//! Clap derive structures for the `edgeprov` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// edgeprov -- provisioning for RouterOS access devices
#[derive(Debug, Parser)]
#[command(
    name = "edgeprov",
    version,
    about = "Provision RouterOS access devices for an ISP",
    long_about = "Queue and run provisioning jobs against RouterOS routers, onboard\n\
        factory-fresh devices found on a management subnet, and serve the\n\
        DHCP lease webhook that keeps MAC profiles up to date.",
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
    #[arg(long, env = "EDGEPROV_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', env = "EDGEPROV_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Log device commands instead of sending them
    #[arg(long, env = "EDGEPROV_DRY_RUN", global = true)]
    pub dry_run: bool,

    /// Device I/O timeout in seconds (overrides config)
    #[arg(long, env = "EDGEPROV_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Queue, inspect, and run provisioning jobs
    #[command(alias = "j")]
    Jobs(JobsArgs),

    /// Onboard factory-fresh devices on a management subnet
    #[command(alias = "ob")]
    Onboard(OnboardArgs),

    /// Serve the DHCP lease webhook
    Serve(ServeArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Jobs ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommand,
}

#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// Queue a job
    #[command(alias = "add")]
    Enqueue(EnqueueArgs),

    /// List jobs, oldest first
    #[command(alias = "ls")]
    List {
        /// Only jobs in this state (queued, running, success, failed)
        #[arg(long)]
        state: Option<String>,

        /// Only jobs of this type
        #[arg(long = "type")]
        job_type: Option<String>,
    },

    /// Show one job
    Show {
        /// Job ID
        id: String,
    },

    /// Run queued jobs
    Run {
        /// Maximum jobs to run [default: dispatcher.batch_size]
        #[arg(long, short = 'n')]
        limit: Option<usize>,

        /// Run only this job
        #[arg(long, conflicts_with = "limit")]
        id: Option<String>,
    },

    /// Put a failed job back in the queue
    Retry {
        /// Job ID
        id: String,

        /// Run it right away
        #[arg(long)]
        run: bool,
    },
}

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Job type (e.g. activate_subscription, device_healthcheck)
    pub job_type: String,

    /// Target device name from the config's device table
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// Target sector code
    #[arg(long, short = 's')]
    pub sector: Option<String>,

    /// Subscription reference
    #[arg(long)]
    pub subscription: Option<String>,

    /// Inline JSON payload object
    #[arg(long, conflicts_with = "from_file")]
    pub payload: Option<String>,

    /// Read the JSON payload object from a file
    #[arg(long, short = 'F')]
    pub from_file: Option<PathBuf>,
}

// ── Onboard ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct OnboardArgs {
    #[command(subcommand)]
    pub command: OnboardCommand,
}

#[derive(Debug, Args)]
pub struct ProfileArgs {
    /// Onboarding profile (YAML)
    #[arg(long, short = 'p', env = "EDGEPROV_ONBOARDING")]
    pub profile: PathBuf,

    /// Override the profile's sector_code
    #[arg(long)]
    pub sector: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum OnboardCommand {
    /// Scan the management subnet and onboard every device that answers
    Scan {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Override the profile's mgmt_subnet
        #[arg(long)]
        subnet: Option<String>,
    },

    /// Onboard a single device
    Device {
        /// Management address of the device
        ip: Ipv4Addr,

        #[command(flatten)]
        profile: ProfileArgs,
    },

    /// Print the sector configuration as console commands, without
    /// touching a device
    Plan {
        /// Onboarding profile (YAML)
        #[arg(long, short = 'p', env = "EDGEPROV_ONBOARDING")]
        profile: PathBuf,

        /// Interface kept out of the LAN bridge
        #[arg(long)]
        mgmt_interface: Option<String>,
    },
}

// ── Serve ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address [default: webhook.bind]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Sector codes the webhook accepts, besides those of configured devices
    #[arg(long = "sector", short = 's')]
    pub sectors: Vec<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// Store a device password or the webhook token in the system keyring
    SetPassword {
        /// Device name from the device table
        #[arg(required_unless_present = "webhook")]
        device: Option<String>,

        /// Store the webhook token instead
        #[arg(long, conflicts_with = "device")]
        webhook: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
