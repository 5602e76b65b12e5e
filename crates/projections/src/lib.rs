//! Query side of the marketplace order lifecycle.
//!
//! - [`Projection`] folds log events into a read model
//! - [`ProjectionProcessor`] feeds the log to registered projections
//! - [`OrderDirectoryView`] indexes orders by status, age, intent and refunds
//! - [`PayoutLedgerView`] groups settled transactions per seller

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{OrderDirectoryView, OrderSummary, PayoutEntry, PayoutLedgerView, SellerPayout};
