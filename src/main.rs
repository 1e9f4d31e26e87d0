//! Entrypoint: loads config, stands up storage and logging, reconciles
//! crashed tasks, and either binds the HTTP control plane (`serve`) or
//! forwards an admin subcommand to a running instance — grounded on the
//! teacher's `main.rs` in spirit (config → logger → server), rebuilt
//! around `clap` 4's derive API and a `tokio` runtime instead of the
//! teacher's actix-actor/futures-0.1 startup sequence.

use std::sync::Arc;

use clap::Parser;
#[cfg(not(debug_assertions))]
use human_panic::setup_panic;

use harvestd::cli::{Cli, Command};
use harvestd::config::Config;
use harvestd::logging::LogManager;
use harvestd::metadata_store::MetadataStore;
use harvestd::objectstore::ObjectStoreClient;
use harvestd::processor::supervisor::ProcessorRegistry;
use harvestd::registry::Registry;
use harvestd::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(not(debug_assertions))]
    setup_panic!();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve(cli.config).await,
        admin => harvestd::cli::run_admin_command(admin).await,
    }
}

/// Falls back to `$XDG_CONFIG_HOME/harvestd/config.ini` (or the platform
/// equivalent) when `--config` isn't given, the same way the teacher agent
/// located its own config file relative to the user's home directory.
fn default_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|dir| dir.join("harvestd").join("config.ini"))
}

async fn serve(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let config_path = config_path.or_else(default_config_path);
    let config = Config::load(config_path.as_deref())?;
    config.ensure_directories()?;

    let log_manager = Arc::new(LogManager::init(&config.app_log_dir, &config.task_log_dir, &config.log_level)?);
    log::info!("harvestd starting up (version {})", env!("CARGO_PKG_VERSION"));

    let metadata_store = MetadataStore::open(&config.database_file_path)?;
    let fetch_registry = Arc::new(Registry::new(reqwest::Client::new()));
    let object_store = Arc::new(ObjectStoreClient::new(&config.s3)?);
    let config = Arc::new(config);

    let processor_registry = ProcessorRegistry::new(
        config.clone(),
        metadata_store.clone(),
        fetch_registry.clone(),
        object_store,
        log_manager,
    );

    processor_registry.reconcile_at_startup().await?;

    let state = Arc::new(AppState {
        config: config.clone(),
        metadata_store,
        fetch_registry,
        processor_registry: processor_registry.clone(),
    });

    let server = tokio::spawn(server::run(state));

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.blocking_send(());
    })
    .expect("failed to install Ctrl-C handler");

    tokio::select! {
        result = server => {
            result??;
        }
        _ = shutdown_rx.recv() => {
            log::info!("received shutdown signal, stopping live tasks");
            processor_registry.shutdown_all().await;
        }
    }

    Ok(())
}
