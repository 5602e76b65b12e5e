//! Platform settings: a singleton aggregate holding the current platform fee.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AggregateId, Clock, SharedClock, SystemClock};
use event_store::{EventStore, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::command::{CommandHandler, CommandResult, EventContext};
use crate::error::DomainError;
use crate::order::FeeRate;

const SETTINGS_UUID: Uuid = Uuid::from_u128(0x0b5e_77a1_2c44_4f1e_8d3a_5e6f_1a2b_3c4d);

/// The one settings aggregate.
pub fn platform_settings_id() -> AggregateId {
    AggregateId::from_uuid(SETTINGS_UUID)
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Platform fee must be between 0 and {max} basis points, got {bps}")]
    InvalidFee { bps: u32, max: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SettingsEvent {
    PlatformFeeUpdated(PlatformFeeUpdatedData),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformFeeUpdatedData {
    pub rate: FeeRate,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl DomainEvent for SettingsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettingsEvent::PlatformFeeUpdated(_) => "PlatformFeeUpdated",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlatformSettings {
    id: Option<AggregateId>,
    version: Version,
    fee_rate: Option<FeeRate>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for PlatformSettings {
    type Event = SettingsEvent;
    type Error = SettingsError;

    fn aggregate_type() -> &'static str {
        "PlatformSettings"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SettingsEvent::PlatformFeeUpdated(data) => {
                self.id = Some(platform_settings_id());
                self.fee_rate = Some(data.rate);
                self.updated_at = Some(data.updated_at);
            }
        }
    }
}

impl PlatformSettings {
    /// `None` until a fee has been set.
    pub fn fee_rate(&self) -> Option<FeeRate> {
        self.fee_rate
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn update_fee(
        &self,
        bps: u32,
        updated_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<SettingsEvent>, SettingsError> {
        let rate = FeeRate::from_bps(bps).ok_or(SettingsError::InvalidFee {
            bps,
            max: FeeRate::MAX_BPS,
        })?;
        if self.fee_rate == Some(rate) {
            return Ok(vec![]);
        }
        Ok(vec![SettingsEvent::PlatformFeeUpdated(PlatformFeeUpdatedData {
            rate,
            updated_by: updated_by.into(),
            updated_at: now,
        })])
    }
}

pub struct SettingsService<S: EventStore> {
    handler: CommandHandler<S, PlatformSettings>,
    default_fee: FeeRate,
    clock: SharedClock,
}

impl<S: EventStore + Clone> Clone for SettingsService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            default_fee: self.default_fee,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: EventStore> SettingsService<S> {
    pub fn new(store: S, default_fee: FeeRate) -> Self {
        Self::with_clock(store, default_fee, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, default_fee: FeeRate, clock: SharedClock) -> Self {
        Self {
            handler: CommandHandler::new(store),
            default_fee,
            clock,
        }
    }

    /// The fee in force right now; the configured default until one is set.
    pub async fn current_fee_rate(&self) -> Result<FeeRate, DomainError> {
        let settings = self.handler.load(platform_settings_id()).await?;
        Ok(settings.fee_rate().unwrap_or(self.default_fee))
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_fee(
        &self,
        bps: u32,
        updated_by: &str,
    ) -> Result<CommandResult<PlatformSettings>, DomainError> {
        let now = self.clock.now();
        let result = self
            .handler
            .execute_with(platform_settings_id(), EventContext::at(now), |settings| {
                settings.update_fee(bps, updated_by, now)
            })
            .await?;
        tracing::info!(bps, "platform fee updated");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;

    #[tokio::test]
    async fn default_applies_until_set() {
        let service =
            SettingsService::new(InMemoryEventStore::new(), FeeRate::from_bps(500).unwrap());
        assert_eq!(service.current_fee_rate().await.unwrap().bps(), 500);

        service.update_fee(750, "admin-1").await.unwrap();
        assert_eq!(service.current_fee_rate().await.unwrap().bps(), 750);
    }

    #[tokio::test]
    async fn fee_above_hundred_percent_is_rejected() {
        let service = SettingsService::new(InMemoryEventStore::new(), FeeRate::default());
        assert!(matches!(
            service.update_fee(10_001, "admin-1").await,
            Err(DomainError::Settings(SettingsError::InvalidFee { .. }))
        ));
    }

    #[test]
    fn same_fee_is_a_no_op() {
        let mut settings = PlatformSettings::default();
        let events = settings.update_fee(500, "a", Utc::now()).unwrap();
        settings.apply_events(events);
        assert!(settings.update_fee(500, "a", Utc::now()).unwrap().is_empty());
    }
}
