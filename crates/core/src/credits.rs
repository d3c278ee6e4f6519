//! Credit ledger vocabulary and the consumption planner.
//!
//! The planner is pure: given a user's drawable grants it decides which ones
//! to draw down and by how much. The database layer is responsible for
//! loading and locking the grants and for applying the plan.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Transaction types and statuses
// ---------------------------------------------------------------------------

/// Ledger row that adds spendable credits.
pub const TX_TYPE_GRANT: &str = "grant";
/// Ledger row that records a debit and its draw-down detail.
pub const TX_TYPE_CONSUME: &str = "consume";

pub const CREDIT_STATUS_ACTIVE: &str = "active";
/// Voided rows are flagged, never removed.
pub const CREDIT_STATUS_DELETED: &str = "deleted";

// ---------------------------------------------------------------------------
// Transaction scenes
// ---------------------------------------------------------------------------

pub const SCENE_FREE_TRIAL: &str = "free_trial";
pub const SCENE_PAYMENT: &str = "payment";
pub const SCENE_SUBSCRIPTION: &str = "subscription";
pub const SCENE_RENEWAL: &str = "renewal";
pub const SCENE_REFUND: &str = "refund";
pub const SCENE_GIFT: &str = "gift";
/// Scene of consume rows created for AI generation.
pub const SCENE_GENERATION: &str = "generation";

/// Scenes a user may receive at most once.
pub const ONE_TIME_SCENES: &[&str] = &[SCENE_FREE_TRIAL];

/// Scenes that prove the user has paid at some point.
pub const PAID_SCENES: &[&str] = &[SCENE_PAYMENT, SCENE_SUBSCRIPTION, SCENE_RENEWAL];

/// Scenes an administrator may grant directly.
pub const ADMIN_GRANT_SCENES: &[&str] = &[
    SCENE_PAYMENT,
    SCENE_SUBSCRIPTION,
    SCENE_RENEWAL,
    SCENE_REFUND,
    SCENE_GIFT,
];

/// Free trial amount.
pub const FREE_TRIAL_CREDITS: i32 = 30;
/// Free trial validity window.
pub const FREE_TRIAL_VALID_DAYS: i64 = 30;

pub fn is_one_time_scene(scene: &str) -> bool {
    ONE_TIME_SCENES.contains(&scene)
}

/// Validate a scene for an administrative grant.
pub fn validate_admin_grant_scene(scene: &str) -> Result<(), CoreError> {
    if ADMIN_GRANT_SCENES.contains(&scene) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid grant scene '{scene}'. Must be one of: {}",
            ADMIN_GRANT_SCENES.join(", ")
        )))
    }
}

/// Validate a credit amount for a grant or a consumption.
pub fn validate_amount(amount: i64) -> Result<(), CoreError> {
    if amount > 0 && amount <= i32::MAX as i64 {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Credit amount must be a positive integer, got {amount}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Consumption planning
// ---------------------------------------------------------------------------

/// One entry of a consume record's `consumed_detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedItem {
    pub credit_id: DbId,
    pub credits_consumed: i32,
}

/// The drawable part of a grant row, as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawableGrant {
    pub credit_id: DbId,
    pub remaining_credits: i32,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// Soonest-expiring first; grants without expiry last; then oldest first.
pub fn consumption_order(a: &DrawableGrant, b: &DrawableGrant) -> Ordering {
    let by_expiry = match (a.expires_at, b.expires_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_expiry
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.credit_id.cmp(&b.credit_id))
}

/// Decide how to draw `amount` credits from `grants`.
///
/// Grants are walked in [`consumption_order`]; each contributes up to what is
/// still owed. Grants with nothing remaining are skipped and never appear in
/// the plan. Fails with [`CoreError::InsufficientCredits`] when the grants
/// cannot cover `amount` in full.
pub fn plan_consumption(
    grants: &[DrawableGrant],
    amount: i64,
) -> Result<Vec<ConsumedItem>, CoreError> {
    validate_amount(amount)?;

    let available: i64 = grants
        .iter()
        .map(|g| i64::from(g.remaining_credits.max(0)))
        .sum();
    if available < amount {
        return Err(CoreError::InsufficientCredits {
            required: amount,
            available,
        });
    }

    let mut ordered: Vec<&DrawableGrant> = grants.iter().collect();
    ordered.sort_by(|a, b| consumption_order(a, b));

    let mut owed = amount;
    let mut plan = Vec::new();
    for grant in ordered {
        if owed == 0 {
            break;
        }
        if grant.remaining_credits <= 0 {
            continue;
        }
        let take = owed.min(i64::from(grant.remaining_credits));
        plan.push(ConsumedItem {
            credit_id: grant.credit_id,
            // `take` is bounded by an i32 remaining balance.
            credits_consumed: take as i32,
        });
        owed -= take;
    }

    Ok(plan)
}
