//! The autoscaler control loop.

use std::time::Duration;

use storm_core::{AutoscalerConfig, ScaleRecommendation, ScalingAction, epoch_secs};
use storm_scheduler::Scheduler;
use storm_state::KvStore;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Epoch seconds of the last non-NONE recommendation.
pub const LAST_ACTION_KEY: &str = "autoscaler:last-action";

/// Latest recommendation, kept for the dashboard overview.
const LAST_RECOMMENDATION_KEY: &str = "autoscaler:last-recommendation";

const GROW_FACTOR: f64 = 1.5;
const SHRINK_FACTOR: f64 = 0.75;

/// Errors from an autoscaler evaluation.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error(transparent)]
    Scheduler(#[from] storm_scheduler::SchedulerError),

    #[error("autoscaler state unreadable: {0}")]
    State(#[from] storm_state::StateError),
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

/// Emits fleet-size recommendations against saturation thresholds.
pub struct Autoscaler {
    scheduler: Scheduler,
    store: KvStore,
    config: AutoscalerConfig,
}

impl Autoscaler {
    pub fn new(scheduler: Scheduler, store: KvStore, config: AutoscalerConfig) -> Self {
        Self {
            scheduler,
            store,
            config,
        }
    }

    /// One evaluation tick. Pure with respect to the fleet: the only writes
    /// are the cooldown timestamp and the recommendation itself.
    pub fn evaluate(&self) -> AutoscaleResult<ScaleRecommendation> {
        let now = epoch_secs();
        let current = self.scheduler.healthy_node_count()?;
        let saturation = self.scheduler.cluster_saturation()?;
        let cfg = &self.config;

        // An under-provisioned fleet scales up regardless of cooldown.
        let below_minimum = current < cfg.min_nodes;
        let mut rec = if below_minimum {
            ScaleRecommendation {
                action: ScalingAction::ScaleUp,
                current_nodes: current,
                target_nodes: cfg.min_nodes,
                saturation,
                reason: "below minimum".to_string(),
                produced_at: now,
            }
        } else if saturation >= cfg.scale_up_threshold {
            let target = grow_target(current, cfg.max_nodes);
            ScaleRecommendation {
                action: if target > current {
                    ScalingAction::ScaleUp
                } else {
                    ScalingAction::None
                },
                current_nodes: current,
                target_nodes: target,
                saturation,
                reason: format!("saturation {saturation:.2} at or above scale-up threshold"),
                produced_at: now,
            }
        } else if saturation <= cfg.scale_down_threshold {
            let target = shrink_target(current, cfg.min_nodes);
            ScaleRecommendation {
                action: if target < current {
                    ScalingAction::ScaleDown
                } else {
                    ScalingAction::None
                },
                current_nodes: current,
                target_nodes: target,
                saturation,
                reason: format!("saturation {saturation:.2} at or below scale-down threshold"),
                produced_at: now,
            }
        } else {
            ScaleRecommendation {
                action: ScalingAction::None,
                current_nodes: current,
                target_nodes: current,
                saturation,
                reason: "within thresholds".to_string(),
                produced_at: now,
            }
        };

        // Cooldown gates every non-NONE action except the minimum-fleet floor.
        if rec.action != ScalingAction::None && !below_minimum {
            let last = self
                .store
                .get::<u64>(LAST_ACTION_KEY)?
                .map(|e| e.value)
                .unwrap_or(0);
            if now.saturating_sub(last) < cfg.cooldown_seconds {
                rec = ScaleRecommendation {
                    action: ScalingAction::None,
                    target_nodes: rec.current_nodes,
                    reason: "cooldown".to_string(),
                    ..rec
                };
            }
        }

        if rec.action != ScalingAction::None {
            self.store.put(LAST_ACTION_KEY, &now)?;
            info!(
                action = ?rec.action,
                current = rec.current_nodes,
                target = rec.target_nodes,
                saturation = rec.saturation,
                reason = %rec.reason,
                "scale recommendation"
            );
        } else {
            debug!(saturation = rec.saturation, reason = %rec.reason, "no scaling action");
        }
        self.store.put(LAST_RECOMMENDATION_KEY, &rec)?;
        Ok(rec)
    }

    /// Latest recommendation, for the dashboard overview.
    pub fn last_recommendation(store: &KvStore) -> Option<ScaleRecommendation> {
        store
            .get::<ScaleRecommendation>(LAST_RECOMMENDATION_KEY)
            .ok()
            .flatten()
            .map(|e| e.value)
    }

    /// Run the periodic evaluation loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_seconds);
        info!(interval_secs = interval.as_secs(), "autoscaler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate() {
                        error!(error = %e, "autoscaler evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

fn grow_target(current: u32, max_nodes: u32) -> u32 {
    let desired = (f64::from(current) * GROW_FACTOR).ceil() as u32;
    desired.min(max_nodes)
}

fn shrink_target(current: u32, min_nodes: u32) -> u32 {
    let desired = (f64::from(current) * SHRINK_FACTOR).ceil() as u32;
    desired.max(min_nodes)
}
