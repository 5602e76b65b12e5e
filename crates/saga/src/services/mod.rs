//! Collaborators the saga talks to, each behind a trait with an in-memory implementation.

pub mod cart;
pub mod inventory;
pub mod inventory_pg;
pub mod notification;
pub mod payment;
pub mod shipping;

pub use cart::{Cart, CartLine, CartStore, InMemoryCartStore, SharedCartStore};
pub use inventory::{
    InMemoryInventoryLedger, InventoryLedger, ProductListing, SharedInventoryLedger, StockLevel,
};
pub use inventory_pg::PostgresInventoryLedger;
pub use notification::{
    Notification, NotificationSink, RecordingNotificationSink, SharedNotificationSink,
    TracingNotificationSink, notify_best_effort,
};
pub use payment::{
    GatewayPaymentStatus, InMemoryPaymentGateway, IssuedRefund, PaymentDetails, PaymentGateway,
    SharedPaymentGateway,
};
pub use shipping::{
    CarrierAdapter, CourierAssignment, InMemoryCarrier, SharedCarrierAdapter, map_carrier_status,
};
