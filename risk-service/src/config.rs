use std::time::Duration;

use envconfig::Envconfig;

use crate::notifier::{NotificationThresholds, Thresholds};

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "RPC_ENDPOINT")]
    pub rpc_endpoint: String,
    #[envconfig(from = "JUPITER_API_URL", default = "https://lite-api.jup.ag/swap/v1")]
    pub jupiter_api_url: String,
    #[envconfig(
        from = "BANK_METADATA_URL",
        default = "https://storage.googleapis.com/mrgn-public/mrgn-bank-metadata-cache.json"
    )]
    pub bank_metadata_url: String,
    #[envconfig(from = "METADATA_REFRESH_SECONDS", default = "300")]
    pub metadata_refresh_seconds: u64,
    #[envconfig(from = "SESSION_TTL_SECONDS", default = "86400")]
    pub session_ttl_seconds: i64,
    #[envconfig(from = "SIMULATION_DEBOUNCE_MS", default = "300")]
    pub simulation_debounce_ms: u64,
    #[envconfig(from = "MONITOR_INTERVAL", default = "60")]
    pub monitor_interval: u64,
    /// JSON file holding the market state and the accounts to watch.
    #[envconfig(from = "MARKET_SNAPSHOT_PATH")]
    pub market_snapshot_path: String,
    #[envconfig(from = "NOTIFICATION_HEALTH_THRESHOLD_ACTIVATE", default = "0.25")]
    pub health_threshold_activate: f64,
    #[envconfig(from = "NOTIFICATION_HEALTH_THRESHOLD_DEACTIVATE", default = "0.30")]
    pub health_threshold_deactivate: f64,
    #[envconfig(from = "NOTIFICATION_LIQUIDATION_THRESHOLD_ACTIVATE", default = "0.0")]
    pub liquidation_threshold_activate: f64,
    #[envconfig(from = "NOTIFICATION_LIQUIDATION_THRESHOLD_DEACTIVATE", default = "0.05")]
    pub liquidation_threshold_deactivate: f64,
    #[envconfig(from = "PRETTY_LOGS")]
    pub pretty_logs: Option<bool>,
}

impl Config {
    pub fn metadata_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.metadata_refresh_seconds)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval)
    }

    pub fn simulation_debounce(&self) -> Duration {
        Duration::from_millis(self.simulation_debounce_ms)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_seconds)
    }

    pub fn notification_thresholds(&self) -> NotificationThresholds {
        NotificationThresholds {
            dangerous_health: Thresholds {
                activate: self.health_threshold_activate,
                deactivate: self.health_threshold_deactivate,
            },
            liquidatable: Thresholds {
                activate: self.liquidation_threshold_activate,
                deactivate: self.liquidation_threshold_deactivate,
            },
        }
    }
}
