use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// strongnamer - retrofit strong names onto unsigned .NET modules
#[derive(Debug, Parser)]
#[command(name = "strongnamer", version, about, long_about = None)]
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

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign unsigned modules and pin their references to the key.
    Sign(SignArgs),

    /// Display a module's identity, references and friend declarations.
    Info {
        /// Path to the module.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Verify the strong name signature against this key.
        #[arg(short, long, value_name = "KEY")]
        key: Option<PathBuf>,
    },

    /// Print the public key token of a key container.
    Token {
        /// Path to the key container (.snk or public key blob).
        #[arg(value_name = "KEY")]
        key: PathBuf,
    },

    /// Remove all signed modules from an output directory.
    Clean {
        /// The output directory.
        #[arg(value_name = "DIR")]
        output_dir: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct SignArgs {
    /// Modules to sign, in priority order.
    #[arg(value_name = "FILE", required = true)]
    pub modules: Vec<PathBuf>,

    /// Key container used for signing.
    #[arg(short, long, value_name = "KEY")]
    pub key: PathBuf,

    /// Directory receiving the signed modules.
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Copy-local artifacts; matching entries are remapped to the signed outputs.
    #[arg(long, value_name = "FILE")]
    pub copy_local: Vec<PathBuf>,

    /// Directory searched for referenced modules which are not being signed.
    #[arg(long, value_name = "DIR")]
    pub search_dir: Vec<PathBuf>,

    /// Which existing outputs may be reused.
    #[arg(long, value_enum, default_value_t = CacheMode::Fingerprint)]
    pub cache: CacheMode,

    /// Leave references to modules that cannot be found without a token.
    #[arg(long)]
    pub leave_unresolved: bool,

    /// Process modules one after another.
    #[arg(long)]
    pub sequential: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheMode {
    /// Reuse outputs built from the same compilation
    Fingerprint,
    /// Reuse outputs built from the same compilation and signed with the same key
    Key,
    /// Always rewrite outputs
    Off,
}
