use clap::{Parser, Subcommand};

/// Query and modify settings stored through GSettings schemas.
#[derive(Parser, Debug)]
#[command(name = "novade-gsettings")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Storage backend to use (memory, keyfile, dconf). Defaults to
    /// GSETTINGS_BACKEND, then dconf.
    #[arg(long, global = true, env = "GSETTINGS_BACKEND")]
    pub backend: Option<String>,

    /// Log resolution steps to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List installed schemas
    ListSchemas {
        /// Only list relocatable schemas
        #[arg(long)]
        relocatable: bool,
    },

    /// List the keys of a schema
    ListKeys {
        /// SCHEMA or SCHEMA:PATH
        schema: String,
    },

    /// Print the value of a key
    Get { schema: String, key: String },

    /// Print the default value of a key
    GetDefault { schema: String, key: String },

    /// Report whether a key has a stored value
    IsSet { schema: String, key: String },

    /// Print the schema metadata of a key as JSON
    Describe { schema: String, key: String },

    /// Store a value, given in GVariant text format
    Set {
        schema: String,
        key: String,
        value: String,
    },

    /// Remove a key's stored value
    Reset { schema: String, key: String },

    /// Print changes of a schema's keys until interrupted
    Monitor { schema: String },
}

/// Splits `SCHEMA[:PATH]`.
pub fn split_schema_arg(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once(':') {
        Some((schema, path)) => (schema, Some(path)),
        None => (arg, None),
    }
}
