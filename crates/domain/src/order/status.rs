//! Order status machine.
//!
//! ```text
//! PaymentPending ─► Confirmed ─► Processing ─► Packed ─► Shipped ─► InTransit ─► OutForDelivery ─► Delivered ─► Completed
//!
//! PaymentPending, Confirmed, Processing, Packed ─► Cancelled
//! Packed ─► CancellationRequested ─► Cancelled | Packed
//! Shipped, InTransit, OutForDelivery ─► DeliveryFailed ─► InTransit | OutForDelivery | Returned
//! Delivered ─► ReturnRequested ─► ReturnApproved ─► Returned ─► Refunded
//!                            └─► ReturnRejected ─► Completed
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    PaymentPending,
    Confirmed,
    Processing,
    Packed,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    Completed,
    CancellationRequested,
    Cancelled,
    DeliveryFailed,
    ReturnRequested,
    ReturnApproved,
    ReturnRejected,
    Returned,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 17] = [
        OrderStatus::PaymentPending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Packed,
        OrderStatus::Shipped,
        OrderStatus::InTransit,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::CancellationRequested,
        OrderStatus::Cancelled,
        OrderStatus::DeliveryFailed,
        OrderStatus::ReturnRequested,
        OrderStatus::ReturnApproved,
        OrderStatus::ReturnRejected,
        OrderStatus::Returned,
        OrderStatus::Refunded,
    ];

    /// The complete transition table. Every status change an [`Order`](super::Order)
    /// makes is checked against it.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match self {
            PaymentPending => matches!(next, Confirmed | Cancelled),
            Confirmed => matches!(next, Processing | Packed | Shipped | Cancelled),
            Processing => matches!(next, Packed | Shipped | Cancelled),
            Packed => matches!(next, Shipped | CancellationRequested | Cancelled),
            CancellationRequested => matches!(next, Cancelled | Packed),
            Shipped => matches!(next, InTransit | OutForDelivery | Delivered | DeliveryFailed),
            InTransit => matches!(next, OutForDelivery | Delivered | DeliveryFailed),
            OutForDelivery => matches!(next, Delivered | DeliveryFailed),
            DeliveryFailed => matches!(next, InTransit | OutForDelivery | Returned),
            Delivered => matches!(next, ReturnRequested | Completed),
            ReturnRequested => matches!(next, ReturnApproved | ReturnRejected),
            ReturnApproved => matches!(next, Returned),
            ReturnRejected => matches!(next, Completed),
            Returned => matches!(next, Refunded),
            Completed | Cancelled | Refunded => false,
        }
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::PaymentPending
                | OrderStatus::Confirmed
                | OrderStatus::Processing
                | OrderStatus::Packed
        )
    }

    pub fn can_return(&self) -> bool {
        matches!(self, OrderStatus::Delivered)
    }

    /// A buyer cancel from here needs seller or admin approval.
    pub fn cancel_needs_approval(&self) -> bool {
        matches!(self, OrderStatus::Packed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Carrier has the parcel.
    pub fn is_in_transit(&self) -> bool {
        matches!(
            self,
            OrderStatus::Shipped | OrderStatus::InTransit | OrderStatus::OutForDelivery
        )
    }

    /// Why a cancellation is refused, if it is.
    pub fn cancel_refusal(&self) -> Option<&'static str> {
        use OrderStatus::*;

        match self {
            PaymentPending | Confirmed | Processing | Packed => None,
            CancellationRequested => Some("a cancellation request is already awaiting approval"),
            Shipped | InTransit | OutForDelivery | DeliveryFailed => {
                Some("the order has already been handed to the carrier")
            }
            Delivered | ReturnRequested | ReturnApproved | ReturnRejected | Returned => {
                Some("the order has been delivered; request a return instead")
            }
            Completed | Cancelled | Refunded => Some("the order is closed"),
        }
    }

    /// Why a return is refused, if it is. The return window is checked separately.
    pub fn return_refusal(&self) -> Option<&'static str> {
        use OrderStatus::*;

        match self {
            Delivered => None,
            ReturnRequested | ReturnApproved => Some("a return is already in progress"),
            ReturnRejected => Some("the return request was rejected"),
            Returned | Refunded => Some("the order has already been returned"),
            Completed => Some("the return window has closed"),
            Cancelled => Some("the order was cancelled"),
            _ => Some("the order has not been delivered yet"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PaymentPending => "PaymentPending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Processing => "Processing",
            OrderStatus::Packed => "Packed",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::InTransit => "InTransit",
            OrderStatus::OutForDelivery => "OutForDelivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Completed => "Completed",
            OrderStatus::CancellationRequested => "CancellationRequested",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::DeliveryFailed => "DeliveryFailed",
            OrderStatus::ReturnRequested => "ReturnRequested",
            OrderStatus::ReturnApproved => "ReturnApproved",
            OrderStatus::ReturnRejected => "ReturnRejected",
            OrderStatus::Returned => "Returned",
            OrderStatus::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    RefundProcessing,
    PartiallyRefunded,
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::RefundProcessing => "RefundProcessing",
            PaymentStatus::PartiallyRefunded => "PartiallyRefunded",
            PaymentStatus::Refunded => "Refunded",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for status in OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for next in OrderStatus::ALL {
                assert!(!status.can_transition_to(next), "{status} -> {next}");
            }
        }
    }

    #[test]
    fn no_self_transitions() {
        for status in OrderStatus::ALL {
            assert!(!status.can_transition_to(status), "{status}");
        }
    }

    #[test]
    fn every_non_terminal_status_has_an_exit() {
        for status in OrderStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(
                OrderStatus::ALL.iter().any(|n| status.can_transition_to(*n)),
                "{status} is a dead end"
            );
        }
    }

    #[test]
    fn capability_flags_follow_status() {
        let cancellable: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(|s| s.can_cancel())
            .collect();
        assert_eq!(cancellable, vec![PaymentPending, Confirmed, Processing, Packed]);

        let returnable: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(|s| s.can_return())
            .collect();
        assert_eq!(returnable, vec![Delivered]);
    }

    #[test]
    fn refusal_reasons_agree_with_capabilities() {
        for status in OrderStatus::ALL {
            assert_eq!(status.cancel_refusal().is_none(), status.can_cancel());
            assert_eq!(status.return_refusal().is_none(), status.can_return());
        }
    }

    #[test]
    fn shipping_closes_cancellation() {
        assert!(Packed.can_transition_to(Shipped));
        assert!(!Shipped.can_cancel());
        assert!(!Shipped.can_transition_to(Cancelled));
    }

    #[test]
    fn status_serializes_as_name() {
        assert_eq!(
            serde_json::to_string(&OutForDelivery).unwrap(),
            "\"OutForDelivery\""
        );
    }
}
