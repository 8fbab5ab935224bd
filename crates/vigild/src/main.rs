use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vigil_core::Registry;

mod config;
mod dbus_interface;
mod engine;
mod fs_image_store;
mod providers;
mod sqlite_store;
mod transport;

const BUS_NAME: &str = "org.vigil.Access1";
const OBJECT_PATH: &str = "/org/vigil/Access1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    let config = config::Config::from_env().context("configuration")?;

    let provider = providers::build_provider(&config).context("descriptor provider")?;
    let transport = transport::build_transport(&config).context("notification transport")?;
    let images = Arc::new(fs_image_store::FsImageStore::new(&config.image_dir));
    let identities = sqlite_store::SqliteIdentityStore::open(&config.db_path)
        .with_context(|| format!("open identity store at {}", config.db_path.display()))?;

    let registry = Registry::new(Box::new(identities), config.registry_settings());
    let engine = engine::spawn_engine(
        registry,
        engine::EngineDeps {
            provider,
            images,
            transport,
            recipients: config.alert_recipients.clone(),
            extract_timeout: config.extract_timeout(),
        },
    )?;

    let service = dbus_interface::VigilService::new(engine);
    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("register {BUS_NAME} on the D-Bus"))?;

    tracing::info!(
        bus = if config.session_bus { "session" } else { "system" },
        images = %config.image_dir.display(),
        "vigild ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("vigild shutting down");

    Ok(())
}
