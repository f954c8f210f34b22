//! Clap derive structures for the `nest` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// nest -- control Nest thermostats and structures from the command line
#[derive(Debug, Parser)]
#[command(
    name = "nest",
    version,
    about = "Control Nest thermostats and structures from the command line",
    long_about = "Reads and updates thermostats and structures through the Nest REST API.\n\n\
        Credentials come from --token, the profile's token_env variable,\n\
        NEST_TOKEN, the system keyring or the active profile in the config\n\
        file (see `nest config path`).",
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
    /// Config profile to use
    #[arg(long, short = 'p', env = "NEST_PROFILE", global = true)]
    pub profile: Option<String>,

    /// API root URL (overrides profile)
    #[arg(long, env = "NEST_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Access token (overrides profile, NEST_TOKEN and keyring)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "NEST_OUTPUT",
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

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "NEST_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
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

#[derive(Debug, Clone, ValueEnum)]
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
    /// List structures
    #[command(alias = "homes")]
    Structures,

    /// List thermostats
    #[command(alias = "ls")]
    Thermostats,

    /// Update a single thermostat
    #[command(alias = "t")]
    Thermostat(ThermostatArgs),

    /// Update a single structure
    #[command(alias = "s")]
    Structure(StructureArgs),

    /// Stream live changes until interrupted
    Watch(WatchArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Thermostat ───────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ThermostatArgs {
    /// Thermostat device ID
    pub id: String,

    #[command(subcommand)]
    pub command: ThermostatCommand,
}

#[derive(Debug, Subcommand)]
pub enum ThermostatCommand {
    /// Turn the fan timer on or off
    Fan {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Set the HVAC mode (cool, heat, heat-cool, off or 0-3)
    Mode { mode: String },

    /// Set the target temperature
    Temp {
        /// Celsius 9-32, Fahrenheit 50-90 (whole degrees)
        value: String,

        #[arg(long, short = 'u', value_enum, default_value = "c")]
        unit: TempUnit,
    },

    /// Set the heat-cool band
    Range {
        high: String,
        low: String,

        #[arg(long, short = 'u', value_enum, default_value = "c")]
        unit: TempUnit,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TempUnit {
    /// Celsius
    C,
    /// Fahrenheit
    F,
}

// ── Structure ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StructureArgs {
    /// Structure ID
    pub id: String,

    #[command(subcommand)]
    pub command: StructureCommand,
}

#[derive(Debug, Subcommand)]
pub enum StructureCommand {
    /// Set the away state (home, away, auto-away or 0-2)
    Away { mode: String },

    /// Submit an estimated arrival window
    Eta {
        /// Caller-chosen trip identifier
        trip_id: String,

        /// Minutes from now until the window opens
        #[arg(long, default_value = "30")]
        arrive_in: u32,

        /// Window length in minutes
        #[arg(long, default_value = "15")]
        window: u32,
    },
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[arg(value_enum)]
    pub target: WatchTarget,

    /// Give up after this many consecutive failed reconnects
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum WatchTarget {
    Structures,
    Thermostats,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file with a single profile
    Init {
        /// Read the token from this environment variable at runtime
        #[arg(long)]
        token_env: Option<String>,

        /// Store --token in the system keyring instead of the config file
        #[arg(long)]
        keyring: bool,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Print the config file location
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
