//! Integration tests for the credit ledger.
//!
//! Exercises grant, consume and reverse against a real database:
//! - Soonest-expiry-first draw-down across several grants
//! - Insufficient balance leaves every row untouched
//! - Reversal restores the exact pre-charge balance, once
//! - Concurrent consumers never overspend
//! - One-time scenes are enforced, also under concurrent claims

use assert_matches::assert_matches;
use banana_core::credits::{
    ConsumedItem, CREDIT_STATUS_DELETED, SCENE_FREE_TRIAL, SCENE_GENERATION, SCENE_GIFT,
    SCENE_PAYMENT, SCENE_SUBSCRIPTION,
};
use banana_core::error::CoreError;
use banana_db::error::LedgerError;
use banana_db::models::credit::{ConsumeCredits, CreditListQuery, GrantCredits, Reversal};
use banana_db::repositories::CreditRepo;
use chrono::{Duration, Utc};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const USER: i64 = 42;

fn new_grant(user_id: i64, credits: i32, valid_days: Option<i64>) -> GrantCredits {
    GrantCredits {
        user_id,
        credits,
        scene: SCENE_PAYMENT.to_string(),
        description: None,
        expires_at: valid_days.map(|days| Utc::now() + Duration::days(days)),
    }
}

fn new_consume(user_id: i64, amount: i32) -> ConsumeCredits {
    ConsumeCredits {
        user_id,
        amount,
        scene: SCENE_GENERATION.to_string(),
        description: Some("test generation".to_string()),
    }
}

async fn remaining(pool: &PgPool, credit_id: i64) -> i32 {
    CreditRepo::find_by_id(pool, credit_id)
        .await
        .unwrap()
        .unwrap()
        .remaining_credits
}

// ---------------------------------------------------------------------------
// Test: Consume within balance
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_consume_debits_single_grant(pool: PgPool) {
    let grant = CreditRepo::grant(&pool, &new_grant(USER, 30, None))
        .await
        .unwrap();
    assert_eq!(grant.remaining_credits, 30);

    let record = CreditRepo::consume(&pool, &new_consume(USER, 10))
        .await
        .unwrap();
    assert!(record.is_consume());
    assert_eq!(record.credits, -10);
    assert_eq!(record.remaining_credits, 0);
    assert_eq!(
        record.consumed_items().unwrap(),
        vec![ConsumedItem {
            credit_id: grant.id,
            credits_consumed: 10,
        }]
    );

    assert_eq!(CreditRepo::remaining_balance(&pool, USER).await.unwrap(), 20);
    assert_eq!(remaining(&pool, grant.id).await, 20);
}

// ---------------------------------------------------------------------------
// Test: Insufficient balance is rejected without side effects
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_consume_over_balance_fails(pool: PgPool) {
    let grant = CreditRepo::grant(&pool, &new_grant(USER, 30, None))
        .await
        .unwrap();
    CreditRepo::consume(&pool, &new_consume(USER, 10))
        .await
        .unwrap();

    let err = CreditRepo::consume(&pool, &new_consume(USER, 25))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        LedgerError::Core(CoreError::InsufficientCredits {
            required: 25,
            available: 20
        })
    );

    assert_eq!(CreditRepo::remaining_balance(&pool, USER).await.unwrap(), 20);
    assert_eq!(remaining(&pool, grant.id).await, 20);

    let consumes = CreditRepo::count_by_user(
        &pool,
        USER,
        &CreditListQuery {
            transaction_type: Some("consume".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(consumes, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_consume_rejects_non_positive_amount(pool: PgPool) {
    CreditRepo::grant(&pool, &new_grant(USER, 30, None))
        .await
        .unwrap();

    let err = CreditRepo::consume(&pool, &new_consume(USER, 0))
        .await
        .unwrap_err();
    assert_matches!(err, LedgerError::Core(CoreError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Test: Soonest expiry is drawn first
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_consume_prefers_soonest_expiry(pool: PgPool) {
    let late = CreditRepo::grant(&pool, &new_grant(USER, 15, Some(30)))
        .await
        .unwrap();
    let soon = CreditRepo::grant(&pool, &new_grant(USER, 15, Some(1)))
        .await
        .unwrap();

    CreditRepo::consume(&pool, &new_consume(USER, 5))
        .await
        .unwrap();

    assert_eq!(remaining(&pool, soon.id).await, 10);
    assert_eq!(remaining(&pool, late.id).await, 15);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_consume_spans_grants_and_never_expiring_last(pool: PgPool) {
    let forever = CreditRepo::grant(&pool, &new_grant(USER, 50, None))
        .await
        .unwrap();
    let soon = CreditRepo::grant(&pool, &new_grant(USER, 10, Some(2)))
        .await
        .unwrap();

    let record = CreditRepo::consume(&pool, &new_consume(USER, 25))
        .await
        .unwrap();

    assert_eq!(
        record.consumed_items().unwrap(),
        vec![
            ConsumedItem {
                credit_id: soon.id,
                credits_consumed: 10,
            },
            ConsumedItem {
                credit_id: forever.id,
                credits_consumed: 15,
            },
        ]
    );
    assert_eq!(remaining(&pool, soon.id).await, 0);
    assert_eq!(remaining(&pool, forever.id).await, 35);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_expired_grants_are_not_drawable(pool: PgPool) {
    CreditRepo::grant(&pool, &new_grant(USER, 100, Some(-1)))
        .await
        .unwrap();
    CreditRepo::grant(&pool, &new_grant(USER, 5, None))
        .await
        .unwrap();

    assert_eq!(CreditRepo::remaining_balance(&pool, USER).await.unwrap(), 5);

    let err = CreditRepo::consume(&pool, &new_consume(USER, 6))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        LedgerError::Core(CoreError::InsufficientCredits { available: 5, .. })
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_balances_are_per_user(pool: PgPool) {
    CreditRepo::grant(&pool, &new_grant(USER, 10, None))
        .await
        .unwrap();
    CreditRepo::grant(&pool, &new_grant(USER + 1, 99, None))
        .await
        .unwrap();

    assert_eq!(CreditRepo::remaining_balance(&pool, USER).await.unwrap(), 10);
    assert_eq!(
        CreditRepo::remaining_balance(&pool, USER + 1).await.unwrap(),
        99
    );
    assert_eq!(
        CreditRepo::remaining_balance(&pool, USER + 2).await.unwrap(),
        0
    );
}

// ---------------------------------------------------------------------------
// Test: Reversal
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_reverse_restores_exact_balance_once(pool: PgPool) {
    let a = CreditRepo::grant(&pool, &new_grant(USER, 8, Some(3)))
        .await
        .unwrap();
    let b = CreditRepo::grant(&pool, &new_grant(USER, 20, Some(10)))
        .await
        .unwrap();
    let before = CreditRepo::remaining_balance(&pool, USER).await.unwrap();

    let record = CreditRepo::consume(&pool, &new_consume(USER, 12))
        .await
        .unwrap();
    assert_eq!(
        CreditRepo::remaining_balance(&pool, USER).await.unwrap(),
        before - 12
    );

    let outcome = CreditRepo::reverse(&pool, record.id).await.unwrap();
    assert_eq!(outcome, Reversal::Reversed { restored: 12 });
    assert_eq!(
        CreditRepo::remaining_balance(&pool, USER).await.unwrap(),
        before
    );
    assert_eq!(remaining(&pool, a.id).await, 8);
    assert_eq!(remaining(&pool, b.id).await, 20);

    let reversed = CreditRepo::find_by_id(&pool, record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reversed.status, CREDIT_STATUS_DELETED);

    // A retried refund changes nothing.
    let again = CreditRepo::reverse(&pool, record.id).await.unwrap();
    assert_eq!(again, Reversal::AlreadyReversed);
    assert_eq!(
        CreditRepo::remaining_balance(&pool, USER).await.unwrap(),
        before
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_reverse_rejects_unknown_and_grant_records(pool: PgPool) {
    let grant = CreditRepo::grant(&pool, &new_grant(USER, 10, None))
        .await
        .unwrap();

    let err = CreditRepo::reverse(&pool, 999_999).await.unwrap_err();
    assert_matches!(err, LedgerError::Core(CoreError::NotFound { .. }));

    let err = CreditRepo::reverse(&pool, grant.id).await.unwrap_err();
    assert_matches!(err, LedgerError::Core(CoreError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Test: Concurrent consumption never overspends
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_consumes_never_overspend(pool: PgPool) {
    CreditRepo::grant(&pool, &new_grant(USER, 30, Some(5)))
        .await
        .unwrap();
    CreditRepo::grant(&pool, &new_grant(USER, 20, None))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            CreditRepo::consume(&pool, &new_consume(USER, 7)).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert_matches!(
                err,
                LedgerError::Core(CoreError::InsufficientCredits { .. })
            ),
        }
    }

    // 50 credits cover exactly seven debits of 7.
    assert_eq!(succeeded, 7);
    assert_eq!(CreditRepo::remaining_balance(&pool, USER).await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Test: One-time scenes and proof of purchase
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_free_trial_granted_once(pool: PgPool) {
    let trial = GrantCredits {
        scene: SCENE_FREE_TRIAL.to_string(),
        ..new_grant(USER, 30, Some(30))
    };

    CreditRepo::grant(&pool, &trial).await.unwrap();
    let err = CreditRepo::grant(&pool, &trial).await.unwrap_err();
    assert_matches!(
        err,
        LedgerError::Core(CoreError::DuplicateGrant { ref scene }) if scene == SCENE_FREE_TRIAL
    );

    // Another user is unaffected.
    let other = GrantCredits {
        user_id: USER + 1,
        ..trial
    };
    CreditRepo::grant(&pool, &other).await.unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_free_trial_claims_grant_once(pool: PgPool) {
    let trial = GrantCredits {
        scene: SCENE_FREE_TRIAL.to_string(),
        ..new_grant(USER, 30, Some(30))
    };

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let trial = trial.clone();
        handles.push(tokio::spawn(async move {
            CreditRepo::grant(&pool, &trial).await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(credit) => {
                assert_eq!(credit.transaction_scene, SCENE_FREE_TRIAL);
                granted += 1;
            }
            Err(err) => assert_matches!(
                err,
                LedgerError::Core(CoreError::DuplicateGrant { ref scene })
                    if scene == SCENE_FREE_TRIAL
            ),
        }
    }
    assert_eq!(granted, 1);
    assert_eq!(CreditRepo::remaining_balance(&pool, USER).await.unwrap(), 30);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_repeatable_scenes_can_be_granted_again(pool: PgPool) {
    let gift = GrantCredits {
        scene: SCENE_GIFT.to_string(),
        ..new_grant(USER, 5, None)
    };
    CreditRepo::grant(&pool, &gift).await.unwrap();
    CreditRepo::grant(&pool, &gift).await.unwrap();

    assert_eq!(CreditRepo::remaining_balance(&pool, USER).await.unwrap(), 10);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_has_grant_in_scenes(pool: PgPool) {
    let scenes = [SCENE_PAYMENT, SCENE_SUBSCRIPTION];
    assert!(!CreditRepo::has_grant_in_scenes(&pool, USER, &scenes)
        .await
        .unwrap());

    let trial = GrantCredits {
        scene: SCENE_FREE_TRIAL.to_string(),
        ..new_grant(USER, 30, None)
    };
    CreditRepo::grant(&pool, &trial).await.unwrap();
    assert!(!CreditRepo::has_grant_in_scenes(&pool, USER, &scenes)
        .await
        .unwrap());

    // Proof of purchase holds even after the grant is spent.
    CreditRepo::grant(&pool, &new_grant(USER, 5, None))
        .await
        .unwrap();
    CreditRepo::consume(&pool, &new_consume(USER, 35))
        .await
        .unwrap();
    assert!(CreditRepo::has_grant_in_scenes(&pool, USER, &scenes)
        .await
        .unwrap());
}

// ---------------------------------------------------------------------------
// Test: History listing
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_list_by_user_filters_and_pages(pool: PgPool) {
    for _ in 0..3 {
        CreditRepo::grant(&pool, &new_grant(USER, 10, None))
            .await
            .unwrap();
    }
    CreditRepo::consume(&pool, &new_consume(USER, 4))
        .await
        .unwrap();
    CreditRepo::grant(&pool, &new_grant(USER + 1, 10, None))
        .await
        .unwrap();

    let all = CreditRepo::list_by_user(&pool, USER, &CreditListQuery::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.iter().all(|c| c.user_id == USER));
    assert!(all[0].is_consume(), "newest row comes first");

    let grants = CreditListQuery {
        transaction_type: Some("grant".to_string()),
        ..Default::default()
    };
    assert_eq!(CreditRepo::count_by_user(&pool, USER, &grants).await.unwrap(), 3);

    let second_page = CreditListQuery {
        page: Some(2),
        limit: Some(3),
        ..Default::default()
    };
    let page = CreditRepo::list_by_user(&pool, USER, &second_page)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
}
