//! Domain layer for the marketplace order lifecycle.
//!
//! - [`Aggregate`] and [`DomainEvent`] traits for event-sourced entities
//! - [`CommandHandler`] for optimistic, version-checked command execution
//! - the [`Order`] aggregate and its state machine
//! - the settlement ledger ([`Transaction`]) and [`PlatformSettings`]

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;
pub mod settings;
pub mod settlement;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{CommandHandler, CommandResult, EventContext};
pub use error::DomainError;
pub use order::{
    Actor, BuyerId, CartId, ConfirmPayment, FeeRate, LineItem, Money, Order, OrderError,
    OrderEvent, OrderService, OrderStatus, PaymentStatus, PlaceOrder, ProductId, RefundDue,
    RefundObligation, RequestInfo, SellerId, ShipmentDetails, StatusEntry,
};
pub use settings::{PlatformSettings, SettingsError, SettingsEvent, SettingsService};
pub use settlement::{
    PayoutStatus, RecordTransaction, SettlementError, SettlementService, Transaction,
    TransactionEvent, TransactionStatus, transaction_id_for,
};
