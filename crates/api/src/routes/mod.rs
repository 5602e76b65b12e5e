//! HTTP handlers, grouped by the part of the lifecycle they drive.

pub mod checkout;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod payouts;
pub mod settings;
pub mod shipments;

use common::AggregateId;

use crate::error::ApiError;

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(AggregateId::from(uuid))
}
