//! CrashCash reward vocabulary and accrual math.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::app_config::RewardPolicy;

text_enum! {
    /// Where a reward grant came from.
    RewardSource, "reward source" {
        Order => "order",
        Scratch => "scratch",
        Coupon => "coupon",
    }
}

text_enum! {
    /// Lifecycle of a single reward row. `used` and `expired` are terminal.
    RewardStatus, "reward status" {
        Active => "active",
        Used => "used",
        Expired => "expired",
    }
}

text_enum! {
    /// Kind of balance mutation recorded in the ledger journal.
    LedgerEntryKind, "ledger entry kind" {
        Grant => "grant",
        Deduct => "deduct",
        Expire => "expire",
        Adjust => "adjust",
    }
}

/// CrashCash credited for a paid order.
///
/// `total × percent / 100`, truncated to two decimal places and capped at
/// `policy.order_reward_cap`. Returns zero for non-positive totals.
#[must_use]
pub fn order_reward(total: Decimal, policy: &RewardPolicy) -> Decimal {
    if total <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = (total * policy.order_reward_percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::ToZero);
    raw.min(policy.order_reward_cap).max(Decimal::ZERO)
}

/// Draw a whole-unit scratch-card amount uniformly from the policy range.
pub fn scratch_reward<R: Rng + ?Sized>(policy: &RewardPolicy, rng: &mut R) -> Decimal {
    let (lo, hi) = if policy.scratch_min <= policy.scratch_max {
        (policy.scratch_min, policy.scratch_max)
    } else {
        (policy.scratch_max, policy.scratch_min)
    };
    Decimal::from(rng.random_range(lo..=hi))
}

/// Expiry instant for a reward granted at `granted_at`.
#[must_use]
pub fn expires_at(granted_at: DateTime<Utc>, policy: &RewardPolicy) -> DateTime<Utc> {
    granted_at + Duration::days(i64::from(policy.expiry_days))
}
