//! storm-autoscale — fleet-size recommendations from cluster saturation.
//!
//! A pure control loop: each tick observes the HEALTHY fleet and the
//! scheduler's saturation signal and emits a [`ScaleRecommendation`].
//! Applying recommendations is an external executor's job. The cooldown
//! timestamp and the latest recommendation are persisted in the shared
//! state store so a restarted control plane keeps its cadence.

mod scaler;

pub use scaler::{Autoscaler, AutoscaleError, AutoscaleResult, LAST_ACTION_KEY};
