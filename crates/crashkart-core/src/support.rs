//! After-sales vocabulary: returns, complaints, notifications and seller
//! applications. Each status moves one field at a time on admin action.

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;

use crate::CoreError;

text_enum! {
    ReturnKind, "return kind" {
        Return => "return",
        Replacement => "replacement",
    }
}

text_enum! {
    ReturnStatus, "return status" {
        Requested => "requested",
        Approved => "approved",
        Rejected => "rejected",
        Received => "received",
        Completed => "completed",
    }
}

impl ReturnStatus {
    #[must_use]
    pub fn is_open(self) -> bool {
        !matches!(self, ReturnStatus::Rejected | ReturnStatus::Completed)
    }

    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTransition`] for disallowed moves.
    pub fn transition(self, next: ReturnStatus) -> Result<ReturnStatus, CoreError> {
        use ReturnStatus::{Approved, Completed, Received, Rejected, Requested};
        let allowed = matches!(
            (self, next),
            (Requested, Approved | Rejected) | (Approved, Received) | (Received, Completed)
        );
        check(allowed, "return request", self.as_str(), next.as_str()).map(|()| next)
    }
}

text_enum! {
    ComplaintStatus, "complaint status" {
        Open => "open",
        InProgress => "in_progress",
        Resolved => "resolved",
        Closed => "closed",
    }
}

impl ComplaintStatus {
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTransition`] for disallowed moves.
    pub fn transition(self, next: ComplaintStatus) -> Result<ComplaintStatus, CoreError> {
        use ComplaintStatus::{Closed, InProgress, Open, Resolved};
        let allowed = matches!(
            (self, next),
            (Open, InProgress | Closed) | (InProgress, Resolved) | (Resolved, Closed)
        );
        check(allowed, "complaint", self.as_str(), next.as_str()).map(|()| next)
    }
}

text_enum! {
    SellerApplicationStatus, "seller application status" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl SellerApplicationStatus {
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTransition`] unless moving out of `pending`.
    pub fn transition(
        self,
        next: SellerApplicationStatus,
    ) -> Result<SellerApplicationStatus, CoreError> {
        let allowed = self == SellerApplicationStatus::Pending
            && next != SellerApplicationStatus::Pending;
        check(allowed, "seller application", self.as_str(), next.as_str()).map(|()| next)
    }
}

text_enum! {
    NotificationKind, "notification kind" {
        OrderConfirmed => "order_confirmed",
        OrderStatus => "order_status",
        PaymentFailed => "payment_failed",
        CrashcashCredited => "crashcash_credited",
        ReturnUpdate => "return_update",
        ComplaintUpdate => "complaint_update",
        SellerApplication => "seller_application",
    }
}

fn check(allowed: bool, kind: &'static str, from: &str, to: &str) -> Result<(), CoreError> {
    if allowed {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            kind,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Generate a return merchandise authorization id: `RMA-YYYYMMDD-XXXXXX`
/// with six uppercase alphanumerics.
pub fn generate_rma<R: Rng + ?Sized>(at: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: String = (0..6)
        .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_uppercase())
        .collect();
    format!("RMA-{}-{suffix}", at.format("%Y%m%d"))
}
