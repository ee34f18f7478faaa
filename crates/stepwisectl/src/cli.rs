use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::commands;
use crate::output::OutputFormat;

/// Stepwise CLI - drive persisted multi-step flows
#[derive(Parser, Debug)]
#[command(name = "stepwisectl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where and how flow state is stored
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// JSON file holding persisted flow state
    #[arg(
        long,
        global = true,
        env = "STEPWISE_STORE",
        default_value = ".stepwise/flows.json"
    )]
    pub store: PathBuf,

    /// Storage key prefix
    #[arg(long, global = true, env = "STEPWISE_PREFIX", default_value = "stepwise")]
    pub prefix: String,

    /// Discard saved state older than this many seconds
    #[arg(long, global = true, env = "STEPWISE_TTL_SECS")]
    pub ttl_secs: Option<u64>,
}

/// Flow file and instance selection shared by instance commands
#[derive(Args, Debug, Clone)]
pub struct InstanceArgs {
    /// Flow definition file (YAML or JSON)
    #[arg(short, long)]
    pub file: PathBuf,

    /// Instance id (omit for the flow's default instance)
    #[arg(short, long)]
    pub instance: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a flow definition file
    Validate {
        /// Flow definition file (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Start a flow, or resume its saved state
    Start {
        #[command(flatten)]
        target: InstanceArgs,

        /// Start a new instance with a generated id
        #[arg(long, conflicts_with = "instance")]
        new: bool,
    },

    /// Answer the current step and move on
    Next {
        #[command(flatten)]
        target: InstanceArgs,

        /// Destination step (required on branching steps)
        #[arg(long)]
        to: Option<String>,

        /// Context values to merge first (key=value, value parsed as JSON)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Skip the current step and move on
    Skip {
        #[command(flatten)]
        target: InstanceArgs,

        /// Destination step (required on branching steps)
        #[arg(long)]
        to: Option<String>,

        /// Context values to merge first (key=value, value parsed as JSON)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Go back to the previous step
    Back {
        #[command(flatten)]
        target: InstanceArgs,
    },

    /// Merge values into the context without moving
    Set {
        #[command(flatten)]
        target: InstanceArgs,

        /// Context values (key=value, value parsed as JSON)
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        set: Vec<String>,
    },

    /// Show the state of an instance
    Show {
        #[command(flatten)]
        target: InstanceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// List saved instances of a flow
    List {
        /// Flow definition file (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Discard an instance's state and start over
    Reset {
        #[command(flatten)]
        target: InstanceArgs,
    },

    /// Delete saved state for every flow under the prefix
    Purge {
        /// Only delete records that have outlived --ttl-secs
        #[arg(long)]
        expired: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        let store = self.store;

        match self.command {
            Commands::Validate { file } => commands::validate::execute(&file),
            Commands::Start { target, new } => commands::start::execute(&store, target, new).await,
            Commands::Next { target, to, set } => {
                commands::navigate::next(&store, &target, to, &set, false).await
            }
            Commands::Skip { target, to, set } => {
                commands::navigate::next(&store, &target, to, &set, true).await
            }
            Commands::Back { target } => commands::navigate::back(&store, &target).await,
            Commands::Set { target, set } => commands::navigate::set(&store, &target, &set).await,
            Commands::Show { target, output } => {
                commands::show::execute(&store, &target, output).await
            }
            Commands::List { file, output } => commands::list::execute(&store, &file, output).await,
            Commands::Reset { target } => commands::reset::reset(&store, &target).await,
            Commands::Purge { expired } => commands::reset::purge(&store, expired).await,
            Commands::Completion { shell } => commands::completion::execute(shell),
        }
    }
}
