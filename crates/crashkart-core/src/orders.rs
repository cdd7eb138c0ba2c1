use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

text_enum! {
    OrderStatus, "order status" {
        Pending => "pending",
        Confirmed => "confirmed",
        Processing => "processing",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
        Returned => "returned",
    }
}

impl OrderStatus {
    /// Whether an admin may move an order from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::{Cancelled, Confirmed, Delivered, Pending, Processing, Returned, Shipped};
        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled)
                | (Confirmed, Processing | Shipped | Cancelled)
                | (Processing, Shipped | Cancelled)
                | (Shipped, Delivered)
                | (Delivered, Returned)
        )
    }

    /// Whether a captured payment may still confirm and reward the order.
    /// Cancelled and returned orders have already been unwound.
    #[must_use]
    pub fn accepts_payment(self) -> bool {
        !matches!(self, OrderStatus::Cancelled | OrderStatus::Returned)
    }

    /// Validate a transition, returning a typed error when it is not allowed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTransition`] for disallowed moves.
    pub fn transition(self, next: OrderStatus) -> Result<OrderStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                kind: "order",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

text_enum! {
    /// Normalized payment method. `online` marks an order awaiting a gateway
    /// payment whose instrument is not yet known.
    PaymentMethod, "payment method" {
        Cod => "cod",
        Card => "card",
        Upi => "upi",
        Netbanking => "netbanking",
        Wallet => "wallet",
        Online => "online",
    }
}

impl PaymentMethod {
    /// Map the free-form method string reported by the gateway (or typed by a
    /// client) onto a stored method. Unknown values collapse to `Online`.
    #[must_use]
    pub fn normalize(raw: &str) -> PaymentMethod {
        match raw.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "cod" | "cashondelivery" => PaymentMethod::Cod,
            "card" | "creditcard" | "debitcard" | "emi" => PaymentMethod::Card,
            "upi" => PaymentMethod::Upi,
            "netbanking" | "nb" => PaymentMethod::Netbanking,
            "wallet" | "paylater" => PaymentMethod::Wallet,
            _ => PaymentMethod::Online,
        }
    }
}

/// Payment and session metadata kept on an order in a `JSONB` column.
///
/// Keys are camelCase on the wire; unknown keys written by older code paths
/// are preserved in `extra` so a read-modify-write never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_payment_id: Option<String>,
    #[serde(default)]
    pub payment_received: bool,
    #[serde(default)]
    pub payment_failed: bool,
    #[serde(default)]
    pub skip_scratch_card: bool,
    #[serde(default)]
    pub confirmation_sent: bool,
    #[serde(default)]
    pub reward_granted: bool,
    /// Money was captured after the order had been cancelled or returned and
    /// needs a manual refund.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paid_after_cancel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_payment_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OrderNotes {
    /// Notes for a fresh order awaiting gateway payment.
    #[must_use]
    pub fn for_gateway_order(gateway_order_id: impl Into<String>) -> Self {
        Self {
            gateway_order_id: Some(gateway_order_id.into()),
            ..Self::default()
        }
    }

    /// Record a successful payment. Returns `false` if the payment had
    /// already been recorded, leaving the notes unchanged.
    pub fn mark_paid(&mut self, payment_id: Option<&str>, at: DateTime<Utc>) -> bool {
        if self.payment_received {
            return false;
        }
        self.payment_received = true;
        self.payment_failed = false;
        self.skip_scratch_card = true;
        self.last_payment_error = None;
        self.paid_at = Some(at);
        if let Some(id) = payment_id {
            self.gateway_payment_id = Some(id.to_string());
        }
        true
    }

    /// Record a payment that arrived after the order was unwound. Returns
    /// `false` if a payment had already been recorded.
    pub fn mark_paid_after_cancel(&mut self, payment_id: Option<&str>, at: DateTime<Utc>) -> bool {
        if !self.mark_paid(payment_id, at) {
            return false;
        }
        self.paid_after_cancel = true;
        true
    }

    /// Record a failed payment attempt. Ignored once a payment has succeeded.
    pub fn mark_failed(&mut self, payment_id: Option<&str>, reason: &str) {
        if self.payment_received {
            return;
        }
        self.payment_failed = true;
        self.last_payment_error = Some(reason.to_string());
        if let Some(id) = payment_id {
            self.gateway_payment_id = Some(id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let path = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Returned,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn terminal_states_do_not_move() {
        for next in OrderStatus::ALL {
            assert!(!OrderStatus::Cancelled.can_transition_to(*next));
            assert!(!OrderStatus::Returned.can_transition_to(*next));
        }
    }

    #[test]
    fn shipped_order_cannot_be_cancelled() {
        let err = OrderStatus::Shipped
            .transition(OrderStatus::Cancelled)
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                kind: "order",
                from: "shipped".to_string(),
                to: "cancelled".to_string(),
            }
        );
    }

    #[test]
    fn payment_method_normalization() {
        assert_eq!(PaymentMethod::normalize("UPI"), PaymentMethod::Upi);
        assert_eq!(PaymentMethod::normalize("net-banking"), PaymentMethod::Netbanking);
        assert_eq!(PaymentMethod::normalize("card"), PaymentMethod::Card);
        assert_eq!(PaymentMethod::normalize("Cash on Delivery"), PaymentMethod::Cod);
        assert_eq!(PaymentMethod::normalize("crypto"), PaymentMethod::Online);
    }

    #[test]
    fn notes_use_camel_case_keys() {
        let mut notes = OrderNotes::for_gateway_order("order_abc");
        notes.mark_paid(Some("pay_1"), Utc::now());
        let json = serde_json::to_value(&notes).unwrap();
        assert_eq!(json["gatewayOrderId"], "order_abc");
        assert_eq!(json["gatewayPaymentId"], "pay_1");
        assert_eq!(json["paymentReceived"], true);
        assert_eq!(json["skipScratchCard"], true);
    }

    #[test]
    fn notes_preserve_unknown_keys() {
        let raw = serde_json::json!({
            "gatewayOrderId": "order_x",
            "couponCode": "WELCOME10",
        });
        let notes: OrderNotes = serde_json::from_value(raw).unwrap();
        assert_eq!(notes.extra["couponCode"], "WELCOME10");
        let back = serde_json::to_value(&notes).unwrap();
        assert_eq!(back["couponCode"], "WELCOME10");
    }

    #[test]
    fn mark_paid_is_one_shot() {
        let mut notes = OrderNotes::default();
        assert!(notes.mark_paid(Some("pay_1"), Utc::now()));
        assert!(!notes.mark_paid(Some("pay_2"), Utc::now()));
        assert_eq!(notes.gateway_payment_id.as_deref(), Some("pay_1"));
    }

    #[test]
    fn only_live_orders_accept_payment() {
        assert!(OrderStatus::Pending.accepts_payment());
        assert!(OrderStatus::Delivered.accepts_payment());
        assert!(!OrderStatus::Cancelled.accepts_payment());
        assert!(!OrderStatus::Returned.accepts_payment());
    }

    #[test]
    fn late_payment_is_flagged_once() {
        let mut notes = OrderNotes::default();
        assert!(notes.mark_paid_after_cancel(Some("pay_late"), Utc::now()));
        assert!(notes.paid_after_cancel);
        assert!(notes.payment_received);
        assert!(!notes.mark_paid_after_cancel(Some("pay_other"), Utc::now()));
        let json = serde_json::to_value(&notes).unwrap();
        assert_eq!(json["paidAfterCancel"], true);
        assert!(serde_json::to_value(OrderNotes::default())
            .unwrap()
            .get("paidAfterCancel")
            .is_none());
    }

    #[test]
    fn failure_after_success_is_ignored() {
        let mut notes = OrderNotes::default();
        notes.mark_paid(None, Utc::now());
        notes.mark_failed(Some("pay_9"), "card declined");
        assert!(!notes.payment_failed);
        assert!(notes.last_payment_error.is_none());
    }
}
