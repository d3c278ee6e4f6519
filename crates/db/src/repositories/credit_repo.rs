//! Repository for the `credits` ledger table.
//!
//! Grants and consume records are append-only. Balances change only through
//! [`CreditRepo::consume_in_tx`] (draw-down) and [`CreditRepo::reverse_in_tx`]
//! (restore), both of which lock the rows they touch in consumption order so
//! concurrent callers for the same user serialize instead of overspending.

use banana_core::credits::{
    is_one_time_scene, plan_consumption, validate_amount, DrawableGrant, CREDIT_STATUS_ACTIVE,
    CREDIT_STATUS_DELETED, TX_TYPE_CONSUME, TX_TYPE_GRANT,
};
use banana_core::error::CoreError;
use banana_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use super::page_bounds;
use crate::error::LedgerError;
use crate::models::credit::{ConsumeCredits, Credit, CreditListQuery, GrantCredits, Reversal};

/// Column list for `credits` queries.
const COLUMNS: &str = "\
    id, transaction_no, user_id, transaction_type, transaction_scene, status, \
    description, credits, remaining_credits, consumed_detail, expires_at, \
    created_at, updated_at";

/// Partial unique index backing one-time grant scenes.
const ONE_TIME_SCENE_CONSTRAINT: &str = "uq_credits_one_time_scene";

/// Shared predicate for grants that can still be drawn from.
const DRAWABLE: &str = "\
    transaction_type = 'grant' AND status = 'active' \
    AND (expires_at IS NULL OR expires_at > NOW())";

/// Lock order shared by consumption and reversal.
const CONSUMPTION_ORDER: &str = "expires_at ASC NULLS LAST, created_at ASC, id ASC";

/// Provides ledger operations over credit grants and consume records.
pub struct CreditRepo;

impl CreditRepo {
    // ── Grants ───────────────────────────────────────────────────────

    /// Create an ACTIVE grant with `remaining_credits = credits`.
    ///
    /// One-time scenes fail with [`CoreError::DuplicateGrant`] when the user
    /// already holds a grant for the scene.
    pub async fn grant(pool: &PgPool, input: &GrantCredits) -> Result<Credit, LedgerError> {
        let mut tx = pool.begin().await?;
        let credit = Self::grant_in_tx(&mut tx, input).await?;
        tx.commit().await?;
        Ok(credit)
    }

    /// Transactional form of [`CreditRepo::grant`].
    pub async fn grant_in_tx(
        conn: &mut PgConnection,
        input: &GrantCredits,
    ) -> Result<Credit, LedgerError> {
        validate_amount(i64::from(input.credits))?;

        if is_one_time_scene(&input.scene)
            && Self::has_grant_in_scenes_conn(&mut *conn, input.user_id, &[input.scene.as_str()])
                .await?
        {
            return Err(CoreError::DuplicateGrant {
                scene: input.scene.clone(),
            }
            .into());
        }

        let query = format!(
            "INSERT INTO credits \
                 (transaction_no, user_id, transaction_type, transaction_scene, status, \
                  description, credits, remaining_credits, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8) \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Credit>(&query)
            .bind(new_transaction_no())
            .bind(input.user_id)
            .bind(TX_TYPE_GRANT)
            .bind(&input.scene)
            .bind(CREDIT_STATUS_ACTIVE)
            .bind(&input.description)
            .bind(input.credits)
            .bind(input.expires_at)
            .fetch_one(&mut *conn)
            .await;

        match inserted {
            Ok(credit) => {
                tracing::info!(
                    credit_id = credit.id,
                    user_id = credit.user_id,
                    scene = %credit.transaction_scene,
                    credits = credit.credits,
                    "Credits granted",
                );
                Ok(credit)
            }
            // A concurrent claim won the race past the existence check.
            Err(e) if violates_constraint(&e, ONE_TIME_SCENE_CONSTRAINT) => {
                Err(CoreError::DuplicateGrant {
                    scene: input.scene.clone(),
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the user holds any grant in one of `scenes`, regardless of
    /// status or expiry. Used as proof of purchase for gated tiers.
    pub async fn has_grant_in_scenes(
        pool: &PgPool,
        user_id: DbId,
        scenes: &[&str],
    ) -> Result<bool, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        Self::has_grant_in_scenes_conn(&mut conn, user_id, scenes).await
    }

    async fn has_grant_in_scenes_conn(
        conn: &mut PgConnection,
        user_id: DbId,
        scenes: &[&str],
    ) -> Result<bool, sqlx::Error> {
        let scenes: Vec<String> = scenes.iter().map(|s| s.to_string()).collect();
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS( \
                 SELECT 1 FROM credits \
                 WHERE user_id = $1 AND transaction_type = $2 \
                   AND transaction_scene = ANY($3) \
             )",
        )
        .bind(user_id)
        .bind(TX_TYPE_GRANT)
        .bind(&scenes)
        .fetch_one(&mut *conn)
        .await
    }

    // ── Balance ──────────────────────────────────────────────────────

    /// Sum of `remaining_credits` over the user's ACTIVE, non-expired grants.
    pub async fn remaining_balance(pool: &PgPool, user_id: DbId) -> Result<i64, sqlx::Error> {
        let query = format!(
            "SELECT COALESCE(SUM(remaining_credits), 0)::BIGINT FROM credits \
             WHERE user_id = $1 AND {DRAWABLE}"
        );
        sqlx::query_scalar::<_, i64>(&query)
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    // ── Consumption ──────────────────────────────────────────────────

    /// Debit `amount` credits from the user's drawable grants, soonest
    /// expiry first, and record a single consume row carrying the draw-down
    /// detail.
    ///
    /// Fails with [`CoreError::InsufficientCredits`] without touching any row
    /// when the drawable balance is too small.
    pub async fn consume(pool: &PgPool, input: &ConsumeCredits) -> Result<Credit, LedgerError> {
        let mut tx = pool.begin().await?;
        let record = Self::consume_in_tx(&mut tx, input).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Transactional form of [`CreditRepo::consume`].
    ///
    /// The caller's transaction must be rolled back on error; no partial
    /// debit is ever committed by this function on its own.
    pub async fn consume_in_tx(
        conn: &mut PgConnection,
        input: &ConsumeCredits,
    ) -> Result<Credit, LedgerError> {
        let amount = i64::from(input.amount);
        validate_amount(amount)?;

        // Row locks make the sum-then-debit sequence linearizable per user.
        let query = format!(
            "SELECT id, remaining_credits, expires_at, created_at FROM credits \
             WHERE user_id = $1 AND {DRAWABLE} AND remaining_credits > 0 \
             ORDER BY {CONSUMPTION_ORDER} \
             FOR UPDATE"
        );
        let grants: Vec<DrawableGrant> =
            sqlx::query_as::<_, (DbId, i32, Option<Timestamp>, Timestamp)>(&query)
                .bind(input.user_id)
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .map(
                    |(credit_id, remaining_credits, expires_at, created_at)| DrawableGrant {
                        credit_id,
                        remaining_credits,
                        expires_at,
                        created_at,
                    },
                )
                .collect();

        let plan = plan_consumption(&grants, amount)?;

        for item in &plan {
            sqlx::query(
                "UPDATE credits SET remaining_credits = remaining_credits - $2 WHERE id = $1",
            )
            .bind(item.credit_id)
            .bind(item.credits_consumed)
            .execute(&mut *conn)
            .await?;
        }

        let query = format!(
            "INSERT INTO credits \
                 (transaction_no, user_id, transaction_type, transaction_scene, status, \
                  description, credits, remaining_credits, consumed_detail) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8) \
             RETURNING {COLUMNS}"
        );
        let record = sqlx::query_as::<_, Credit>(&query)
            .bind(new_transaction_no())
            .bind(input.user_id)
            .bind(TX_TYPE_CONSUME)
            .bind(&input.scene)
            .bind(CREDIT_STATUS_ACTIVE)
            .bind(&input.description)
            .bind(-input.amount)
            .bind(Json(&plan))
            .fetch_one(&mut *conn)
            .await?;

        tracing::debug!(
            credit_id = record.id,
            user_id = input.user_id,
            amount,
            grants_touched = plan.len(),
            "Credits consumed",
        );

        Ok(record)
    }

    // ── Reversal ─────────────────────────────────────────────────────

    /// Restore the credits drawn by an ACTIVE consume record and mark it
    /// DELETED. Reversing an already DELETED record is a no-op.
    pub async fn reverse(pool: &PgPool, consume_id: DbId) -> Result<Reversal, LedgerError> {
        let mut tx = pool.begin().await?;
        let outcome = Self::reverse_in_tx(&mut tx, consume_id).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Transactional form of [`CreditRepo::reverse`].
    pub async fn reverse_in_tx(
        conn: &mut PgConnection,
        consume_id: DbId,
    ) -> Result<Reversal, LedgerError> {
        let query = format!("SELECT {COLUMNS} FROM credits WHERE id = $1 FOR UPDATE");
        let record = sqlx::query_as::<_, Credit>(&query)
            .bind(consume_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Credit",
                id: consume_id,
            })?;

        if !record.is_consume() {
            return Err(CoreError::Validation(format!(
                "Credit {consume_id} is not a consumption record"
            ))
            .into());
        }

        if record.status == CREDIT_STATUS_DELETED {
            tracing::debug!(credit_id = consume_id, "Consumption already reversed");
            return Ok(Reversal::AlreadyReversed);
        }

        let items: Vec<_> = record
            .consumed_items()
            .map_err(|source| LedgerError::CorruptDetail {
                credit_id: consume_id,
                source,
            })?
            .into_iter()
            .filter(|item| item.credits_consumed > 0)
            .collect();

        // Take grant locks in the same order consumers do.
        let grant_ids: Vec<DbId> = items.iter().map(|item| item.credit_id).collect();
        let lock_query = format!(
            "SELECT id FROM credits WHERE id = ANY($1) ORDER BY {CONSUMPTION_ORDER} FOR UPDATE"
        );
        sqlx::query_scalar::<_, DbId>(&lock_query)
            .bind(&grant_ids)
            .fetch_all(&mut *conn)
            .await?;

        let mut restored: i64 = 0;
        for item in &items {
            sqlx::query(
                "UPDATE credits SET remaining_credits = remaining_credits + $2 \
                 WHERE id = $1 AND transaction_type = $3",
            )
            .bind(item.credit_id)
            .bind(item.credits_consumed)
            .bind(TX_TYPE_GRANT)
            .execute(&mut *conn)
            .await?;
            restored += i64::from(item.credits_consumed);
        }

        sqlx::query("UPDATE credits SET status = $2 WHERE id = $1")
            .bind(consume_id)
            .bind(CREDIT_STATUS_DELETED)
            .execute(&mut *conn)
            .await?;

        tracing::info!(
            credit_id = consume_id,
            user_id = record.user_id,
            restored,
            "Consumption reversed",
        );

        Ok(Reversal::Reversed { restored })
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Find a ledger row by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Credit>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM credits WHERE id = $1");
        sqlx::query_as::<_, Credit>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a user's ledger rows, newest first.
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: DbId,
        params: &CreditListQuery,
    ) -> Result<Vec<Credit>, sqlx::Error> {
        let (limit, offset) = page_bounds(params.page, params.limit);
        let (where_clause, next_idx) = Self::history_filter(params);

        let query = format!(
            "SELECT {COLUMNS} FROM credits \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${next_idx} OFFSET ${}",
            next_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Credit>(&query).bind(user_id);
        if let Some(tx_type) = &params.transaction_type {
            q = q.bind(tx_type);
        }
        if let Some(scene) = &params.scene {
            q = q.bind(scene);
        }
        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Count a user's ledger rows matching the same filters as
    /// [`CreditRepo::list_by_user`].
    pub async fn count_by_user(
        pool: &PgPool,
        user_id: DbId,
        params: &CreditListQuery,
    ) -> Result<i64, sqlx::Error> {
        let (where_clause, _) = Self::history_filter(params);
        let query = format!("SELECT COUNT(*) FROM credits {where_clause}");

        let mut q = sqlx::query_scalar::<_, i64>(&query).bind(user_id);
        if let Some(tx_type) = &params.transaction_type {
            q = q.bind(tx_type);
        }
        if let Some(scene) = &params.scene {
            q = q.bind(scene);
        }
        q.fetch_one(pool).await
    }

    /// Build the WHERE clause for history listings. `$1` is always the user.
    /// Returns the clause and the next free bind index.
    fn history_filter(params: &CreditListQuery) -> (String, u32) {
        let mut conditions = vec!["user_id = $1".to_string()];
        let mut bind_idx: u32 = 2;

        if params.transaction_type.is_some() {
            conditions.push(format!("transaction_type = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.scene.is_some() {
            conditions.push(format!("transaction_scene = ${bind_idx}"));
            bind_idx += 1;
        }

        (format!("WHERE {}", conditions.join(" AND ")), bind_idx)
    }
}

/// Time-ordered, globally unique transaction number.
fn new_transaction_no() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

/// Whether `err` is a unique violation on the named constraint.
fn violates_constraint(err: &sqlx::Error, constraint: &str) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.constraint())
        .is_some_and(|name| name == constraint)
}
