//! Order lifecycle saga for a multi-seller marketplace.
//!
//! A checkout becomes one order per seller under a shared payment intent.
//! Payment verification reserves stock and records the seller's Transaction
//! exactly once per order, however many callbacks and webhooks arrive.
//! Failures, abandonment, cancellations and returns run through the same
//! compensation path, and delivered orders feed the payout scheduler.
//!
//! External systems sit behind traits in [`services`], each with an
//! in-memory implementation.

pub mod checkout;
pub mod compensation;
pub mod coordinator;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod payout;
pub mod policy;
pub mod retry;
pub mod services;
pub mod signature;
pub mod sweeper;
pub mod verification;

pub use checkout::{CheckoutLine, CheckoutReceipt, CheckoutRequest, PlacedOrder};
pub use compensation::CompensationOutcome;
pub use coordinator::{Collaborators, OrderSaga};
pub use error::{InventoryError, PaymentError, Result, SagaError};
pub use jobs::{DeferredJob, DeferredJobs, ScheduledJob};
pub use lifecycle::{CarrierWebhook, ShipmentUpdate};
pub use payout::{PayoutBatch, PayoutRun};
pub use policy::LifecyclePolicy;
pub use retry::RetryPolicy;
pub use signature::SignatureVerifier;
pub use sweeper::SweepReport;
pub use verification::{PaymentWebhook, VerificationOutcome, WebhookOutcome, WebhookPayload};
