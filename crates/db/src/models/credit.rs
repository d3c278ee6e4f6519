//! Credit ledger entity model and DTOs.

use banana_core::credits::{ConsumedItem, CREDIT_STATUS_ACTIVE, TX_TYPE_CONSUME, TX_TYPE_GRANT};
use banana_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `credits` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Credit {
    pub id: DbId,
    pub transaction_no: String,
    pub user_id: DbId,
    pub transaction_type: String,
    pub transaction_scene: String,
    pub status: String,
    pub description: Option<String>,
    /// Signed amount: positive for grants, negative for consumption.
    pub credits: i32,
    /// Still-spendable part of a grant. Always 0 on consume rows.
    pub remaining_credits: i32,
    /// JSON list of [`ConsumedItem`] on consume rows.
    pub consumed_detail: Option<serde_json::Value>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Credit {
    pub fn is_active(&self) -> bool {
        self.status == CREDIT_STATUS_ACTIVE
    }

    pub fn is_grant(&self) -> bool {
        self.transaction_type == TX_TYPE_GRANT
    }

    pub fn is_consume(&self) -> bool {
        self.transaction_type == TX_TYPE_CONSUME
    }

    /// Decode the draw-down detail of a consume row. Empty when absent.
    pub fn consumed_items(&self) -> Result<Vec<ConsumedItem>, serde_json::Error> {
        match &self.consumed_detail {
            Some(value) => serde_json::from_value(value.clone()),
            None => Ok(Vec::new()),
        }
    }
}

/// Input for creating an ACTIVE grant.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantCredits {
    pub user_id: DbId,
    pub credits: i32,
    pub scene: String,
    pub description: Option<String>,
    pub expires_at: Option<Timestamp>,
}

/// Input for debiting credits from a user's drawable grants.
#[derive(Debug, Clone)]
pub struct ConsumeCredits {
    pub user_id: DbId,
    pub amount: i32,
    pub scene: String,
    pub description: Option<String>,
}

/// Outcome of reversing a consume record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reversal {
    /// Credits were restored to the grants the record drew from.
    Reversed { restored: i64 },
    /// The record had already been reversed; nothing changed.
    AlreadyReversed,
}

/// Query parameters for `GET /api/v1/credits`.
#[derive(Debug, Default, Deserialize)]
pub struct CreditListQuery {
    /// Filter by transaction type (`grant` or `consume`).
    pub transaction_type: Option<String>,
    /// Filter by transaction scene.
    pub scene: Option<String>,
    /// 1-based page number. Defaults to 1.
    pub page: Option<i64>,
    /// Page size. Defaults to 30, capped at 100.
    pub limit: Option<i64>,
}
