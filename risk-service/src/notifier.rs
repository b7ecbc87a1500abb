//! Maintenance-health alerts for watched accounts.
//!
//! Each alert kind fires once when the health factor crosses below its activate threshold and
//! re-arms only after health recovers to its deactivate threshold.

use std::collections::HashMap;

use marginfi_risk_engine::{
    compute::{compute_health_components, compute_health_factor, HealthComponents},
    prelude::{MarketState, RequirementType},
    utils::percent_formatter,
    RiskResult,
};
use marginfi_risk_types::types::Pubkey;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::snapshot::WatchedAccount;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub activate: f64,
    pub deactivate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotificationThresholds {
    pub dangerous_health: Thresholds,
    pub liquidatable: Thresholds,
}

impl Default for NotificationThresholds {
    fn default() -> Self {
        Self {
            dangerous_health: Thresholds {
                activate: 0.25,
                deactivate: 0.30,
            },
            liquidatable: Thresholds {
                activate: 0.0,
                deactivate: 0.05,
            },
        }
    }
}

impl NotificationThresholds {
    fn for_kind(&self, kind: NotificationKind) -> Thresholds {
        match kind {
            NotificationKind::DangerousHealth => self.dangerous_health,
            NotificationKind::Liquidatable => self.liquidatable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DangerousHealth,
    Liquidatable,
}

impl NotificationKind {
    const ALL: [NotificationKind; 2] = [
        NotificationKind::DangerousHealth,
        NotificationKind::Liquidatable,
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Active,
    #[default]
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub account: Pubkey,
    pub wallet: Pubkey,
    pub health: f64,
}

impl Notification {
    pub fn title(&self, thresholds: &NotificationThresholds) -> String {
        format!(
            "Your health factor fell below {}",
            percent_formatter(thresholds.for_kind(self.kind).activate)
        )
    }

    pub fn message(&self, thresholds: &NotificationThresholds) -> String {
        match self.kind {
            NotificationKind::DangerousHealth => format!(
                "The value of your health factor just dropped under {}. It is now {}.",
                percent_formatter(thresholds.dangerous_health.activate),
                percent_formatter(self.health)
            ),
            NotificationKind::Liquidatable => self.title(thresholds),
        }
    }
}

#[derive(Debug, Default)]
pub struct HealthNotifier {
    thresholds: NotificationThresholds,
    statuses: HashMap<(Pubkey, NotificationKind), NotificationStatus>,
}

impl HealthNotifier {
    pub fn new(thresholds: NotificationThresholds) -> Self {
        Self {
            thresholds,
            statuses: HashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &NotificationThresholds {
        &self.thresholds
    }

    pub fn status(&self, account: &Pubkey, kind: NotificationKind) -> NotificationStatus {
        self.statuses
            .get(&(*account, kind))
            .copied()
            .unwrap_or_default()
    }

    /// Notifications due for `accounts` against `state`. Statuses flip as if every returned
    /// notification gets delivered.
    pub fn evaluate(
        &mut self,
        state: &MarketState,
        accounts: &[WatchedAccount],
    ) -> Vec<Notification> {
        let mut notifications = vec![];

        for watched in accounts {
            let health = match maintenance_health(state, watched) {
                Ok(health) => health,
                Err(e) => {
                    warn!("Skipping account {}: {}", watched.address, e);
                    continue;
                }
            };

            for kind in NotificationKind::ALL {
                if let Some(notification) = self.check(watched, kind, health) {
                    info!(
                        "Notifying {} for account {} at health {}",
                        notification.wallet,
                        notification.account,
                        percent_formatter(health)
                    );
                    notifications.push(notification);
                }
            }
        }

        notifications
    }

    fn check(
        &mut self,
        watched: &WatchedAccount,
        kind: NotificationKind,
        health: f64,
    ) -> Option<Notification> {
        let Thresholds {
            activate,
            deactivate,
        } = self.thresholds.for_kind(kind);
        let status = self.statuses.entry((watched.address, kind)).or_default();

        match *status {
            NotificationStatus::Inactive if health < activate => {
                *status = NotificationStatus::Active;
                Some(Notification {
                    kind,
                    account: watched.address,
                    wallet: watched.account.authority,
                    health,
                })
            }
            NotificationStatus::Active if health >= deactivate => {
                *status = NotificationStatus::Inactive;
                None
            }
            _ => None,
        }
    }
}

fn maintenance_health(state: &MarketState, watched: &WatchedAccount) -> RiskResult<f64> {
    let HealthComponents {
        assets,
        liabilities,
    } = compute_health_components(
        &watched.account,
        &state.banks,
        &state.oracle_prices,
        RequirementType::Maintenance,
        &[],
    )?;

    Ok(compute_health_factor(assets, liabilities)?.to_num::<f64>())
}
