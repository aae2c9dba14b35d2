//! Integration tests for gift code redemption.
//!
//! A code credits exactly one account exactly once, whatever the input
//! formatting, concurrency or partial failures along the way.

use std::sync::Arc;
use std::time::Duration;

use nst_client::{GiftCodeIssuer, PendingRedemptionSweeper, RedeemService, StoreContext};
use nst_core::{GiftCode, NstConfig, RedeemConfig, RedeemError, User, USERS_COLLECTION};
use nst_storage::{code_path, DocumentStore, DocumentWrite, TreeStore};
use nst_test_utils::generators::arb_code_input;
use nst_test_utils::{sample_user, seed_code, FlakyDocumentStore, FlakyTreeStore, MemoryStores};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// HELPERS
// ============================================================================

fn context(stores: &MemoryStores) -> StoreContext {
    StoreContext::new(
        stores.documents.clone(),
        stores.tree.clone(),
        stores.local.clone(),
        NstConfig::default(),
    )
}

async fn code_record(stores: &MemoryStores, code: &str) -> GiftCode {
    let value = stores.tree.get(&code_path(code)).await.unwrap().unwrap();
    serde_json::from_value(value).unwrap()
}

async fn store_user(stores: &MemoryStores, user: &User) {
    stores
        .documents
        .set_doc(
            USERS_COLLECTION,
            &user.id,
            DocumentWrite::from_value(serde_json::to_value(user).unwrap()),
            false,
        )
        .await
        .unwrap();
}

// ============================================================================
// EXACTLY ONCE
// ============================================================================

#[tokio::test]
async fn test_second_redeem_is_rejected_and_credits_once() {
    let stores = MemoryStores::new();
    seed_code(stores.tree.as_ref(), "DIWALI5", 5).await.unwrap();
    let service = RedeemService::new(context(&stores));

    let outcome = service.redeem(&sample_user(), "DIWALI5").await.unwrap();
    assert_eq!(outcome.user.credits, 15);
    assert_eq!(outcome.success_message(), "Success! 🎉 Added 5 Credits to your account.");

    let again = service.redeem(&outcome.user, "diwali5").await.unwrap_err();
    assert_eq!(again, RedeemError::AlreadyRedeemed { code: "DIWALI5".to_string() });
    assert_eq!(again.user_message(), "This code has already been redeemed.");

    let doc = stores.documents.get_doc(USERS_COLLECTION, "u1").await.unwrap().unwrap();
    assert_eq!(doc["credits"], json!(15));
    assert_eq!(doc["redeemedCodes"], json!(["DIWALI5"]));

    let record = code_record(&stores, "DIWALI5").await;
    assert!(record.is_redeemed);
    assert!(record.pending_claim.is_none());
    assert_eq!(record.redeemed_by_name.as_deref(), Some("Asha"));
}

#[tokio::test]
async fn test_concurrent_redemptions_have_one_winner() {
    let stores = MemoryStores::new();
    seed_code(stores.tree.as_ref(), "RACE10", 10).await.unwrap();
    let service = Arc::new(RedeemService::new(context(&stores)));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let user = User::new(format!("student-{}", i), format!("Student {}", i));
                service.redeem(&user, "RACE10").await
            })
        })
        .collect();

    let mut winners = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) => winners.push(outcome.user.id),
            Err(e) => assert!(matches!(e, RedeemError::AlreadyRedeemed { .. }), "unexpected {:?}", e),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(code_record(&stores, "RACE10").await.redeemed_by.as_deref(), Some(winners[0].as_str()));
}

#[tokio::test]
async fn test_unknown_code_reports_not_found() {
    let stores = MemoryStores::new();
    let err = RedeemService::new(context(&stores))
        .redeem(&sample_user(), "NOPE")
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Invalid Code. Please check and try again.");
}

#[tokio::test]
async fn test_issued_code_redeems_once_across_devices() {
    let stores = MemoryStores::new();
    let issued = GiftCodeIssuer::new(context(&stores)).issue_generated(20).await.unwrap();

    // Two devices share the stores but not their local caches.
    let other_device = MemoryStores {
        local: Arc::default(),
        ..stores.clone()
    };
    let first = RedeemService::new(context(&stores)).redeem(&sample_user(), &issued.code).await;
    let second = RedeemService::new(context(&other_device))
        .redeem(&sample_user(), &issued.code)
        .await;

    assert_eq!(first.unwrap().amount_added, 20);
    assert!(matches!(second, Err(RedeemError::AlreadyRedeemed { .. })));
}

// ============================================================================
// PARTIAL FAILURES
// ============================================================================

#[tokio::test]
async fn test_sweeper_completes_redeem_interrupted_after_claim() {
    let stores = MemoryStores::new();
    seed_code(stores.tree.as_ref(), "LATE7", 7).await.unwrap();
    store_user(&stores, &sample_user()).await;

    let documents = Arc::new(FlakyDocumentStore::new(stores.documents.clone()));
    let ctx = StoreContext::new(
        documents.clone(),
        stores.tree.clone(),
        stores.local.clone(),
        NstConfig::default(),
    );
    documents.fail_all(true);
    let err = RedeemService::new(ctx.clone())
        .redeem(&sample_user(), "LATE7")
        .await
        .unwrap_err();
    assert!(matches!(err, RedeemError::ConnectionFailed { .. }));
    assert!(code_record(&stores, "LATE7").await.pending_claim.is_some());

    documents.fail_all(false);
    let sweeper = PendingRedemptionSweeper::new(
        ctx,
        RedeemConfig {
            stuck_threshold: Duration::ZERO,
            ..RedeemConfig::default()
        },
    );
    assert_eq!(sweeper.sweep_once().await, 1);

    let doc = stores.documents.get_doc(USERS_COLLECTION, "u1").await.unwrap().unwrap();
    assert_eq!(doc["credits"], json!(17));
    assert!(code_record(&stores, "LATE7").await.is_redeemed);

    // The user retrying afterwards is told the code is spent.
    let retry = RedeemService::new(context(&stores)).redeem(&sample_user(), "LATE7").await;
    assert!(matches!(retry, Err(RedeemError::AlreadyRedeemed { .. })));
}

#[tokio::test]
async fn test_tree_outage_fails_without_touching_user() {
    let stores = MemoryStores::new();
    seed_code(stores.tree.as_ref(), "GIFT5", 5).await.unwrap();
    let tree = Arc::new(FlakyTreeStore::new(stores.tree.clone()));
    tree.fail_next(1);
    let service = RedeemService::new(StoreContext::new(
        stores.documents.clone(),
        tree.clone(),
        stores.local.clone(),
        NstConfig::default(),
    ));

    let err = service.redeem(&sample_user(), "GIFT5").await.unwrap_err();
    assert!(matches!(err, RedeemError::ConnectionFailed { .. }));
    assert!(stores.documents.is_empty());

    let outcome = service.redeem(&sample_user(), "GIFT5").await.unwrap();
    assert_eq!(outcome.user.credits, 15);
}

// ============================================================================
// PROPERTIES
// ============================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// However the code is typed, it redeems once and is then spent.
    #[test]
    fn prop_typed_code_redeems_exactly_once((code, typed) in arb_code_input(), amount in 1u64..500) {
        let stores = MemoryStores::new();
        let service = RedeemService::new(context(&stores));

        let (first, second) = runtime().block_on(async {
            seed_code(stores.tree.as_ref(), &code, amount).await.unwrap();
            let first = service.redeem(&sample_user(), &typed).await;
            let second = service.redeem(&sample_user(), &typed).await;
            (first, second)
        });

        let first = first.unwrap();
        prop_assert_eq!(first.amount_added, amount);
        prop_assert_eq!(first.user.credits, 10 + amount);
        prop_assert_eq!(
            first.user.redeemed_codes.iter().filter(|c| **c == code).count(),
            1
        );
        prop_assert_eq!(second.unwrap_err(), RedeemError::AlreadyRedeemed { code });
    }

    /// Blank input is rejected before any store is contacted.
    #[test]
    fn prop_blank_input_makes_no_remote_call(input in "[ \\t\\n]{0,6}") {
        let stores = MemoryStores::new();
        let documents = Arc::new(FlakyDocumentStore::new(stores.documents.clone()));
        let tree = Arc::new(FlakyTreeStore::new(stores.tree.clone()));
        let service = RedeemService::new(StoreContext::new(
            documents.clone(),
            tree.clone(),
            stores.local.clone(),
            NstConfig::default(),
        ));

        let result = runtime().block_on(service.redeem(&sample_user(), &input));
        prop_assert_eq!(result.unwrap_err(), RedeemError::EmptyCode);
        prop_assert_eq!(documents.calls(), 0);
        prop_assert_eq!(tree.calls(), 0);
    }
}
