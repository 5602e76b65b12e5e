//! Read model views.

pub mod order_directory;
pub mod payout_ledger;

pub use order_directory::{OrderDirectoryView, OrderSummary};
pub use payout_ledger::{PayoutEntry, PayoutLedgerView, SellerPayout};
