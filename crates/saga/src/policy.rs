//! Lifecycle timings.

use chrono::Duration;
use domain::FeeRate;

/// Time windows and defaults the saga enforces.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Unpaid orders older than this are abandoned.
    pub checkout_timeout: Duration,
    pub return_window: Duration,
    /// Hold after delivery before a payout becomes eligible.
    pub payout_hold: Duration,
    /// Delay before a confirmed order moves to processing.
    pub processing_grace: Duration,
    pub verification_lease: Duration,
    pub default_fee_rate: FeeRate,
    /// Where sellers hand parcels to the carrier.
    pub pickup_location: String,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            checkout_timeout: Duration::seconds(1800),
            return_window: Duration::days(7),
            payout_hold: Duration::days(7),
            processing_grace: Duration::seconds(30),
            verification_lease: Duration::seconds(60),
            default_fee_rate: FeeRate::from_bps(500).unwrap_or_default(),
            pickup_location: "Primary".to_string(),
        }
    }
}
