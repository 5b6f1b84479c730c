//! `novade-gsettings` command-line front end.

mod cli;

use std::process;
use std::sync::Arc;

use clap::Parser;
use novade_gsettings::logging::{init_logging, init_minimal_logging};
use novade_gsettings::variant::text;
use novade_gsettings::{EnvironmentConfig, LoggingConfig, SchemaLocator, Settings};
use tracing::debug;

use cli::{split_schema_arg, Cli, Commands};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: if cli.verbose { "debug" } else { "warn" }.to_string(),
        format: if cli.json_logs { "json" } else { "text" }.to_string(),
    };
    if let Err(e) = init_logging(&logging) {
        init_minimal_logging();
        tracing::warn!("Falling back to minimal logging: {}", e);
    }

    let mut config = EnvironmentConfig::from_env();
    if cli.backend.is_some() {
        config.backend = cli.backend.clone();
    }

    if let Err(e) = run(cli.command, Arc::new(config)).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn open(config: Arc<EnvironmentConfig>, schema_arg: &str) -> Result<Settings, novade_gsettings::SettingsError> {
    let (schema, path) = split_schema_arg(schema_arg);
    Settings::new(config, schema, path, None)
}

async fn run(command: Commands, config: Arc<EnvironmentConfig>) -> CliResult {
    debug!("Running {:?}", command);
    match command {
        Commands::ListSchemas { relocatable } => {
            let locator = SchemaLocator::new(config);
            let schemas = if relocatable {
                locator.list_relocatable_schemas().await?
            } else {
                locator.list_schemas().await?
            };
            for schema in schemas {
                println!("{schema}");
            }
        }
        Commands::ListKeys { schema } => {
            for key in open(config, &schema)?.list().await? {
                println!("{key}");
            }
        }
        Commands::Get { schema, key } => {
            println!("{}", open(config, &schema)?.get(&key).await?);
        }
        Commands::GetDefault { schema, key } => {
            println!("{}", open(config, &schema)?.get_default(&key).await?);
        }
        Commands::IsSet { schema, key } => {
            println!("{}", open(config, &schema)?.is_set(&key).await?);
        }
        Commands::Describe { schema, key } => {
            let entry = open(config, &schema)?.describe(&key).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Set { schema, key, value } => {
            let settings = open(config, &schema)?;
            let value_type = settings.describe(&key).await?.value_type();
            let value = text::parse(&value, Some(&value_type))?;
            settings.set(&key, value).await?;
            settings.close().await?;
        }
        Commands::Reset { schema, key } => {
            let settings = open(config, &schema)?;
            settings.unset(&key).await?;
            settings.close().await?;
        }
        Commands::Monitor { schema } => {
            let settings = open(config, &schema)?;
            let mut subscription = settings.subscribe().await?;
            while let Some(keys) = subscription.recv().await {
                for key in keys {
                    match settings.get(&key).await {
                        Ok(value) => println!("{key}: {value}"),
                        Err(e) => println!("{key}: <{e}>"),
                    }
                }
            }
        }
    }
    Ok(())
}
