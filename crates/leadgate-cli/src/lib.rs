//! # Leadgate CLI
//!
//! Command-line interface for Leadgate operations:
//! - Generating webhook source credentials (the plaintext key and secret
//!   are printed exactly once, alongside a ready-to-paste seed entry)
//! - Hashing a plaintext credential for key rotation
//! - Validating and showing the resolved service configuration

use clap::{Parser, Subcommand};
use leadgate_api::ServiceConfig;
use leadgate_core::security::{sha256_hex, GeneratedCredential};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// CLI Structure
// ============================================================================

/// Leadgate CLI - webhook source administration and configuration tooling
#[derive(Debug, Parser)]
#[command(name = "leadgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Administration tooling for the Leadgate ingestion service")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Webhook source credential management
    Sources {
        #[command(subcommand)]
        action: SourceCommands,
    },

    /// Service configuration inspection
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Source management commands
#[derive(Debug, Subcommand)]
pub enum SourceCommands {
    /// Generate a new webhook source with fresh credentials
    New {
        /// Owning brand id (a new one is generated when omitted)
        #[arg(long)]
        brand: Option<Uuid>,

        /// Human-readable integration name
        #[arg(long)]
        name: String,

        /// Requests per minute allowed through the rate limiter
        #[arg(long, default_value = "60")]
        rate_limit: u32,

        /// Require HMAC-signed requests (generates a webhook secret too)
        #[arg(long)]
        hmac: bool,
    },

    /// Hash a plaintext credential (SHA-256 hex) for manual rotation
    Hash {
        /// The plaintext credential value
        value: String,
    },
}

/// Configuration commands
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Validate a service configuration file
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the resolved configuration (defaults applied)
    Show {
        /// Configuration file to resolve; defaults-only when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// CLI-level errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load configuration: {message}")]
    ConfigLoad { message: String },

    #[error("Configuration invalid: {0}")]
    ConfigInvalid(#[from] leadgate_api::ConfigError),

    #[error("Failed to render output: {message}")]
    Render { message: String },
}

// ============================================================================
// Command Execution
// ============================================================================

/// Run the parsed CLI, writing human-readable output to the given writer
pub fn run(cli: Cli, out: &mut impl std::io::Write) -> Result<(), CliError> {
    match cli.command {
        Commands::Sources { action } => run_sources(action, out),
        Commands::Config { action } => run_config(action, out),
    }
}

fn run_sources(action: SourceCommands, out: &mut impl std::io::Write) -> Result<(), CliError> {
    match action {
        SourceCommands::New {
            brand,
            name,
            rate_limit,
            hmac,
        } => {
            let source_id = Uuid::new_v4();
            let brand_id = brand.unwrap_or_else(Uuid::new_v4);
            let api_key = GeneratedCredential::generate();
            let webhook_secret = hmac.then(GeneratedCredential::generate);

            let mut render = |line: String| -> Result<(), CliError> {
                writeln!(out, "{line}").map_err(|e| CliError::Render {
                    message: e.to_string(),
                })
            };

            render(format!("Webhook source: {name}"))?;
            render(format!("  source id:      {source_id}"))?;
            render(format!("  brand id:       {brand_id}"))?;
            render(format!("  endpoint path:  /webhook-ingest/{source_id}"))?;
            render(String::new())?;
            render("Credentials (shown once, store them now):".to_string())?;
            render(format!("  X-API-Key:        {}", api_key.plaintext()))?;
            if let Some(secret) = &webhook_secret {
                render(format!("  X-Webhook-Secret: {}", secret.plaintext()))?;
            }
            render(String::new())?;
            render("Seed file entry:".to_string())?;
            render(format!("  - id: {source_id}"))?;
            render(format!("    brand_id: {brand_id}"))?;
            render(format!("    name: {name}"))?;
            render(format!("    api_key_hash: {}", api_key.hash()))?;
            render(format!("    rate_limit_per_min: {rate_limit}"))?;
            if let Some(secret) = &webhook_secret {
                render("    hmac_enabled: true".to_string())?;
                render(format!("    hmac_secret_hash: {}", secret.hash()))?;
            }
            Ok(())
        }
        SourceCommands::Hash { value } => {
            writeln!(out, "{}", sha256_hex(&value)).map_err(|e| CliError::Render {
                message: e.to_string(),
            })
        }
    }
}

fn run_config(action: ConfigCommands, out: &mut impl std::io::Write) -> Result<(), CliError> {
    match action {
        ConfigCommands::Validate { file } => {
            let config = load_config(Some(&file))?;
            config.validate()?;
            writeln!(out, "Configuration OK: {}", file.display()).map_err(|e| {
                CliError::Render {
                    message: e.to_string(),
                }
            })
        }
        ConfigCommands::Show { file } => {
            let config = load_config(file.as_deref())?;
            let rendered =
                serde_yaml::to_string(&config).map_err(|e| CliError::Render {
                    message: e.to_string(),
                })?;
            writeln!(out, "{rendered}").map_err(|e| CliError::Render {
                message: e.to_string(),
            })
        }
    }
}

/// Load a service configuration with the same semantics as the service
/// binary: serde defaults fill everything a file does not set.
fn load_config(file: Option<&std::path::Path>) -> Result<ServiceConfig, CliError> {
    let Some(path) = file else {
        return Ok(ServiceConfig::default());
    };

    if !path.exists() {
        return Err(CliError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let settings = config::Config::builder()
        .add_source(
            config::File::from(path.to_path_buf())
                .required(true)
                .format(config::FileFormat::Yaml),
        )
        .build()
        .map_err(|e| CliError::ConfigLoad {
            message: e.to_string(),
        })?;

    settings.try_deserialize().map_err(|e| CliError::ConfigLoad {
        message: e.to_string(),
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
