//! # Leadgate Service
//!
//! Binary entry point for the Leadgate HTTP service.
//!
//! This executable:
//! - Loads configuration from environment and files
//! - Initializes observability (logging, metrics)
//! - Seeds webhook sources from the configured seed file
//! - Wires the ingestion and export pipelines over the datastore
//! - Starts the HTTP server from leadgate-api

mod export_trigger;
mod seed;
mod sheets;

use export_trigger::HttpExportTrigger;
use leadgate_api::{start_server, ServiceConfig, ServiceError};
use leadgate_core::adapters::MemoryStore;
use leadgate_core::export::{ExportPipeline, ExportTrigger, NoopExportTrigger, SheetsClient};
use leadgate_core::ingest::IngestPipeline;
use sheets::{GoogleSheetsClient, UnconfiguredSheets};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "leadgate_service=info,leadgate_api=info,leadgate_core=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Leadgate Service");

    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Sources (applied in order — later sources override earlier ones):
    //  1. /etc/leadgate/service.yaml       — system-wide defaults
    //  2. ./config/service.yaml            — deployment-local override
    //  3. Path given by LG_CONFIG_FILE env — operator-specified file
    //  4. Environment variables prefixed LG__ (double-underscore separator)
    //     e.g. LG__SERVER__PORT=9090 sets server.port = 9090
    //
    // All service configuration fields carry serde defaults, so absent files
    // or an entirely unconfigured environment produces a valid service config
    // with built-in defaults.  A malformed file or an environment variable
    // that cannot be coerced to the correct type IS a hard error because it
    // indicates deliberate-but-broken operator configuration.
    // -------------------------------------------------------------------------
    let mut config_builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/leadgate/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    // Optional explicit path supplied by the operator.
    if let Ok(explicit_path) = std::env::var("LG_CONFIG_FILE") {
        if !explicit_path.is_empty() {
            config_builder = config_builder.add_source(
                config::File::with_name(&explicit_path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
            info!(path = %explicit_path, "Loading configuration from explicit path");
        }
    }

    let config = match config_builder
        .add_source(config::Environment::with_prefix("LG").separator("__"))
        .build()
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "Failed to build configuration; aborting");
            std::process::exit(3);
        }
    };

    let service_config: ServiceConfig = match config.try_deserialize() {
        Ok(sc) => sc,
        Err(e) => {
            error!(
                error = %e,
                "Could not deserialize service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    // -------------------------------------------------------------------------
    // Datastore and seeding
    //
    // The bundled datastore is in-memory; webhook sources are loaded from
    // the seed file at boot. An unreadable or invalid seed file is a hard
    // error: running with silently missing sources would turn every
    // integration's webhook into a 404.
    // -------------------------------------------------------------------------
    let store = MemoryStore::new();

    match &service_config.sources.seed_file {
        Some(path) => {
            let sources = match seed::load_seed_file(path) {
                Ok(sources) => sources,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to load source seed file; aborting");
                    std::process::exit(3);
                }
            };
            match seed::apply_seed(&store, sources).await {
                Ok(count) => info!(count, "Seeded webhook sources"),
                Err(e) => {
                    error!(error = %e, "Failed to store seeded sources; aborting");
                    std::process::exit(3);
                }
            }
        }
        None => {
            warn!(
                "No source seed file configured; every webhook request will be \
                 rejected as source_not_found until sources are loaded"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Export pipeline wiring
    //
    // The trigger and the Sheets backend are only materialized when the
    // export section is enabled; otherwise the pipeline short-circuits to a
    // disabled response and the trigger is a no-op.
    // -------------------------------------------------------------------------
    let sheets_client: Arc<dyn SheetsClient> = if service_config.export.enabled {
        match GoogleSheetsClient::from_settings(&service_config.export) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!(error = %e, "Failed to build Sheets client; aborting");
                std::process::exit(3);
            }
        }
    } else {
        Arc::new(UnconfiguredSheets)
    };

    let export = Arc::new(ExportPipeline::new(
        service_config.export.enabled,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        sheets_client,
    ));

    let trigger: Arc<dyn ExportTrigger> = match (
        service_config.export.enabled,
        service_config.export.endpoint.clone(),
    ) {
        (true, Some(endpoint)) => {
            info!(endpoint = %endpoint, "Export trigger enabled");
            Arc::new(HttpExportTrigger::new(
                endpoint,
                Duration::from_secs(service_config.export.trigger_timeout_seconds),
            ))
        }
        (true, None) => {
            warn!(
                "Export is enabled but export.endpoint is not set; lead events \
                 will only be exported when /sheets-export is called explicitly"
            );
            Arc::new(NoopExportTrigger)
        }
        (false, _) => Arc::new(NoopExportTrigger),
    };

    let ingest = Arc::new(IngestPipeline::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        trigger,
    ));

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        "Starting HTTP server"
    );

    // Start the server
    if let Err(e) = start_server(service_config, ingest, export).await {
        error!("Failed to start server: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => 3,
        };

        std::process::exit(exit_code);
    }

    Ok(())
}
