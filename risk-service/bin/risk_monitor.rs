use std::{panic, process, sync::Arc};

use dotenv::dotenv;
use envconfig::Envconfig;
use marginfi_risk_service::{
    config::Config, metadata::BankMetadataCache, notifier::HealthNotifier,
    scheduler::ScheduledTask, snapshot::MarketSnapshot,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(1);
    }));

    let config = Config::init_from_env()?;

    let pretty_logs = config.pretty_logs.unwrap_or(false);

    let filter = EnvFilter::from_default_env();
    let stackdriver = tracing_stackdriver::layer(); // writes to std::io::Stdout
    let subscriber = tracing_subscriber::registry().with(filter);
    if pretty_logs {
        let subscriber = subscriber.with(tracing_subscriber::fmt::layer().compact());
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = subscriber.with(stackdriver);
        tracing::subscriber::set_global_default(subscriber)?;
    };

    let metadata = Arc::new(BankMetadataCache::new(config.bank_metadata_url.clone()));
    if let Err(e) = metadata.refresh().await {
        warn!("Initial bank metadata load failed: {}", e);
    }
    let metadata_task = metadata.spawn_refresh(config.metadata_refresh_interval());

    let notifier = Arc::new(Mutex::new(HealthNotifier::new(
        config.notification_thresholds(),
    )));
    let snapshot_path = config.market_snapshot_path.clone();
    let monitor_task = ScheduledTask::spawn("health-monitor", config.monitor_interval(), {
        let metadata = metadata.clone();
        move || {
            let metadata = metadata.clone();
            let notifier = notifier.clone();
            let snapshot_path = snapshot_path.clone();
            async move {
                let snapshot = MarketSnapshot::load(&snapshot_path).await?;
                let accounts = snapshot.watched_accounts();

                let mut market = snapshot.market;
                market.set_metadata(metadata.snapshot().await);
                market.accrue_interest(chrono::Utc::now().timestamp());

                let mut notifier = notifier.lock().await;
                let notifications = notifier.evaluate(&market, &accounts);
                for notification in &notifications {
                    info!(
                        "[{}] {}: {}",
                        notification.wallet,
                        notification.title(notifier.thresholds()),
                        notification.message(notifier.thresholds())
                    );
                }
                info!(
                    "Checked {} accounts, {} notifications",
                    accounts.len(),
                    notifications.len()
                );

                Ok(())
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    monitor_task.shutdown().await;
    metadata_task.shutdown().await;

    Ok(())
}
