//! Shipment carrier contract, carrier status vocabulary and an in-memory carrier.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::AggregateId;
use domain::{Aggregate, Order, OrderStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::SagaError;

/// Courier booked for a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierAssignment {
    pub awb_code: String,
    pub courier_name: String,
    pub tracking_url: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CarrierAdapter: Send + Sync {
    async fn authenticate(&self) -> Result<String, SagaError>;

    /// Books a forward shipment and returns the carrier's shipment id.
    async fn create_shipment(
        &self,
        token: &str,
        order: &Order,
        pickup_location: &str,
    ) -> Result<String, SagaError>;

    async fn assign_courier(&self, token: &str, shipment_id: &str) -> Result<CourierAssignment, SagaError>;

    /// Books a reverse pickup for a return; returns when it is scheduled.
    async fn schedule_return_pickup(
        &self,
        token: &str,
        order: &Order,
    ) -> Result<DateTime<Utc>, SagaError>;
}

pub type SharedCarrierAdapter = Arc<dyn CarrierAdapter>;

/// Maps a carrier's status string onto an order status.
///
/// Matching ignores case and treats `_`/`-` as spaces. Statuses with no
/// meaning for the order (manifested, pickup scheduled, ...) map to `None`.
pub fn map_carrier_status(raw: &str) -> Option<OrderStatus> {
    let normalized = raw
        .trim()
        .to_ascii_uppercase()
        .replace(['_', '-'], " ");

    match normalized.as_str() {
        "PICKED UP" | "SHIPPED" | "IN TRANSIT" => Some(OrderStatus::InTransit),
        "OUT FOR DELIVERY" => Some(OrderStatus::OutForDelivery),
        "DELIVERED" => Some(OrderStatus::Delivered),
        "UNDELIVERED" | "DELIVERY FAILED" | "RTO INITIATED" => Some(OrderStatus::DeliveryFailed),
        "RTO DELIVERED" => Some(OrderStatus::Returned),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct CarrierState {
    shipments: HashMap<String, AggregateId>,
    pickups: Vec<AggregateId>,
    next_id: u32,
    fail_on_create: bool,
}

/// Carrier double that books instantly.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCarrier {
    state: Arc<Mutex<CarrierState>>,
}

impl InMemoryCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.lock().await.fail_on_create = fail;
    }

    pub async fn shipment_count(&self) -> usize {
        self.state.lock().await.shipments.len()
    }

    pub async fn pickups(&self) -> Vec<AggregateId> {
        self.state.lock().await.pickups.clone()
    }
}

#[async_trait]
impl CarrierAdapter for InMemoryCarrier {
    async fn authenticate(&self) -> Result<String, SagaError> {
        Ok("carrier-token".to_string())
    }

    async fn create_shipment(
        &self,
        _token: &str,
        order: &Order,
        pickup_location: &str,
    ) -> Result<String, SagaError> {
        let mut state = self.state.lock().await;
        if state.fail_on_create {
            return Err(SagaError::external("carrier", "shipment booking rejected"));
        }
        let order_id = order
            .id()
            .ok_or_else(|| SagaError::Validation("order has not been placed".to_string()))?;

        state.next_id += 1;
        let shipment_id = format!("SHP-{:04}", state.next_id);
        state.shipments.insert(shipment_id.clone(), order_id);
        tracing::debug!(%shipment_id, %order_id, %pickup_location, "shipment booked");
        Ok(shipment_id)
    }

    async fn assign_courier(&self, _token: &str, shipment_id: &str) -> Result<CourierAssignment, SagaError> {
        if !self.state.lock().await.shipments.contains_key(shipment_id) {
            return Err(SagaError::external("carrier", format!("unknown shipment {shipment_id}")));
        }
        let awb_code = format!("AWB{}", shipment_id.trim_start_matches("SHP-"));
        Ok(CourierAssignment {
            tracking_url: Some(format!("https://track.example.test/{awb_code}")),
            awb_code,
            courier_name: "Local Express".to_string(),
            estimated_delivery: Some(Utc::now() + Duration::days(3)),
        })
    }

    async fn schedule_return_pickup(
        &self,
        _token: &str,
        order: &Order,
    ) -> Result<DateTime<Utc>, SagaError> {
        let mut state = self.state.lock().await;
        if let Some(order_id) = order.id() {
            state.pickups.push(order_id);
        }
        Ok(Utc::now() + Duration::days(1))
    }
}
