mod config;
mod telemetry;

use std::sync::Arc;

use clap::Parser;
use config::{CliArgs, CliConfig};
use hashflake::{Bootstrap, Error, IdCoordinator, RedisStore};
use telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
    let coordinator = Bootstrap::new(store, config.key.clone(), config.layout, config.machine_id)
        .attach_policy(config.attach)
        .cancellation(cancel.clone())
        .coordinator(config.mode.clone())
        .await?;

    for _ in 0..config.count {
        let id = match coordinator.generate_id_with(&cancel).await {
            Ok(id) => id,
            Err(Error::Cancelled) => {
                tracing::info!("Cancelled, stopping early");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if config.decode {
            let parts = config.layout.decompose(id);
            println!(
                "{id}\ttimestamp={} machine_id={} seq={} unix_ms={}",
                parts.timestamp,
                parts.machine_id,
                parts.seq,
                config.layout.unix_millis(id)
            );
        } else {
            println!("{id}");
        }
    }

    Ok(())
}

fn log_startup_info(config: &CliConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Generating IDs with full config: {:#?}", config);
    } else {
        tracing::info!(
            key = %config.key,
            machine_id = config.machine_id,
            count = config.count,
            "Generating IDs"
        );
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
    cancel.cancel();
}
