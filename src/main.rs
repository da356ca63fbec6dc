use lifehabits_sync::error::SyncError;
use lifehabits_sync::services::sync_service::{load_sync_settings, save_sync_settings};
use lifehabits_sync::{AutoSync, Category, RecordStore, SyncEngine, SyncSettings};
use std::sync::Arc;
use webdav_store::WebDavStore;

const USAGE: &str = "usage: lifehabits-sync <config.toml> [--check | --full | --watch | --backfill <category> <YYYY-Www>]";

enum Mode {
    Check,
    Once,
    Full,
    Watch,
    Backfill(Category, String),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(String, Mode), SyncError> {
    let config = args
        .next()
        .ok_or_else(|| SyncError::Config(USAGE.to_string()))?;

    let mode = match args.next().as_deref() {
        None => Mode::Once,
        Some("--check") => Mode::Check,
        Some("--full") => Mode::Full,
        Some("--watch") => Mode::Watch,
        Some("--backfill") => {
            let category = args
                .next()
                .and_then(|c| Category::from_str(&c))
                .ok_or_else(|| SyncError::Config(USAGE.to_string()))?;
            let week = args
                .next()
                .ok_or_else(|| SyncError::Config(USAGE.to_string()))?;
            Mode::Backfill(category, week)
        }
        Some(other) => {
            return Err(SyncError::Config(format!("unknown option {}\n{}", other, USAGE)));
        }
    };
    Ok((config, mode))
}

fn load_settings(path: &str) -> Result<SyncSettings, SyncError> {
    let content = std::fs::read_to_string(path)?;
    let settings = SyncSettings::from_toml(&content)?;
    settings.validate().map_err(SyncError::Config)?;
    Ok(settings)
}

/// Verifies server URL and credentials
async fn check_connection(engine: &SyncEngine<WebDavStore>) -> Result<(), SyncError> {
    let server_url = &engine.settings().server_url;
    if engine.remote().test_connection().await? {
        println!("Connection to {} OK", server_url);
        Ok(())
    } else {
        Err(SyncError::Config(format!(
            "{} answered, but the collection does not exist",
            server_url
        )))
    }
}

async fn run(mode: Mode, settings: SyncSettings) -> Result<(), SyncError> {
    let store = Arc::new(RecordStore::open(&settings.database_path)?);

    // Keep the stored settings row in step with the config file
    store.with_connection(|conn| {
        let last_sync = load_sync_settings(conn)?.and_then(|stored| stored.last_sync);
        log::debug!("Last sync: {}", last_sync.as_deref().unwrap_or("never"));
        save_sync_settings(conn, &settings)
    })?;

    let engine = Arc::new(SyncEngine::from_settings(settings, Arc::clone(&store))?);

    match mode {
        Mode::Check => check_connection(&engine).await?,
        Mode::Once => {
            let report = engine.sync().await?;
            println!("{}", report);
        }
        Mode::Full => {
            let report = engine.sync_full().await?;
            println!("{}", report);
        }
        Mode::Backfill(category, week) => {
            let stats = engine.backfill_week(category, &week).await?;
            println!(
                "Backfill {} {}: {} inserted, {} updated, {} skipped",
                category.as_str(),
                week,
                stats.inserted,
                stats.updated,
                stats.skipped
            );
        }
        Mode::Watch => {
            let auto = AutoSync::new(engine);
            auto.start(store.subscribe_changes());
            tokio::signal::ctrl_c().await?;
            log::info!("Shutting down");
            auto.stop().await;
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = parse_args(std::env::args().skip(1)).and_then(|(config, mode)| {
        let settings = load_settings(&config)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(run(mode, settings))
    });

    if let Err(e) = result {
        log::error!("{}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}
