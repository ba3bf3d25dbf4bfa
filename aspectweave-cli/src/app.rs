use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// aspectweave - static aspect weaving for compiled modules
#[derive(Debug, Parser)]
#[command(name = "aspectweave", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Reference modules used to resolve external aspect types.
#[derive(Debug, Args)]
pub struct ReferenceOptions {
    /// Referenced module files, separated by ';'.
    #[arg(short, long, value_name = "PATHS", default_value = "")]
    pub references: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Weave aspects into a module file in place.
    Weave {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        #[command(flatten)]
        references: ReferenceOptions,

        /// Strong-name key file (.snk, or .pfx with a sibling .snk).
        #[arg(long, value_name = "FILE", conflicts_with = "key_container")]
        key_file: Option<PathBuf>,

        /// Name of a key in the key store.
        #[arg(long, value_name = "NAME")]
        key_container: Option<String>,

        /// Directory holding named keys (defaults to $ASPECTWEAVE_KEY_STORE).
        #[arg(long, value_name = "DIR", requires = "key_container")]
        key_store: Option<PathBuf>,

        /// Do not read or rewrite the debug-symbol side-file.
        #[arg(long)]
        no_symbols: bool,
    },

    /// Show the aspects each member would receive, without rewriting anything.
    Inspect {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        #[command(flatten)]
        references: ReferenceOptions,

        /// Show only members whose name contains this text.
        #[arg(long, value_name = "NAME")]
        member: Option<String>,
    },
}
