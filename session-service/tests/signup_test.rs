//! Invite-gated signup: reservation, confirmation and the invite limit under
//! concurrency.

mod common;

use chrono::Duration;
use common::TestContext;
use session_service::models::Language;
use session_service::services::{
    sweep::sweep_once, BadParam, IdentityStore, ServiceError, SignupInput,
};
use std::sync::Arc;

#[tokio::test]
async fn signup_reserves_invite_and_confirm_issues_it() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 1);

    ctx.signup("a@x.com", Some("INV1")).await.unwrap();

    assert_eq!(ctx.store.reserved_count(), 1);
    assert_eq!(ctx.store.invite_usage("INV1"), 1);
    let mail = ctx.notifier.sent_to("a@x.com");
    assert_eq!(mail.len(), 1);
    assert!(mail[0].body.contains("/signup/confirm?key="));

    let key = ctx.last_key_for("a@x.com");
    let message = ctx.service.signup_confirm(&key).await.unwrap();
    assert!(message.contains("a@x.com"));

    assert_eq!(ctx.store.reserved_count(), 0);
    assert_eq!(ctx.store.issued_count(), 1);
    assert_eq!(ctx.store.invite_usage("INV1"), 1);

    let confirmation = ctx
        .store
        .confirmations()
        .into_iter()
        .find(|c| c.confirmation_key == key)
        .unwrap();
    assert!(confirmation.deleted_utc.is_some());

    // The mailed password logs in.
    let password = ctx.last_password_for("a@x.com");
    assert_eq!(password.len(), 16);
    assert!(ctx.login("a@x.com", &password).await.is_ok());
}

#[tokio::test]
async fn second_signup_on_single_use_invite_has_ended() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 1);

    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    let err = ctx.signup("b@x.com", Some("INV1")).await.unwrap_err();

    assert!(matches!(err, ServiceError::InviteHasEnded));
    assert_eq!(ctx.store.invite_usage("INV1"), 1);
    assert!(ctx.notifier.sent_to("b@x.com").is_empty());
}

#[tokio::test]
async fn exhausted_invite_is_skipped_when_optional() {
    let ctx = TestContext::with_optional_invites();
    ctx.seed_invite("INV1", 1);

    let first = ctx
        .service
        .signup_request(SignupInput {
            email: "a@x.com".to_string(),
            language: "en".to_string(),
            invite_code: Some("INV1".to_string()),
            remote_addr: common::REMOTE_ADDR.to_string(),
        })
        .await
        .unwrap();
    let second = ctx
        .service
        .signup_request(SignupInput {
            email: "b@x.com".to_string(),
            language: "ja".to_string(),
            invite_code: Some("INV1".to_string()),
            remote_addr: common::REMOTE_ADDR.to_string(),
        })
        .await
        .unwrap();

    assert!(first.invite_reserved);
    assert!(!second.invite_reserved);
    assert_eq!(ctx.store.reserved_count(), 1);
}

#[tokio::test]
async fn signup_without_invite_code() {
    let ctx = TestContext::with_optional_invites();

    ctx.signup("a@x.com", None).await.unwrap();
    let key = ctx.last_key_for("a@x.com");
    ctx.service.signup_confirm(&key).await.unwrap();

    assert_eq!(ctx.store.issued_count(), 0);
    assert!(ctx
        .store
        .find_user_by_email("a@x.com")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn unknown_or_unusable_invite_is_not_found() {
    let ctx = TestContext::new();

    let err = ctx.signup("a@x.com", Some("NOPE")).await.unwrap_err();
    assert!(matches!(err, ServiceError::InviteNotFound));

    // Expired code
    ctx.store
        .seed_invite_code(ctx.owner.user_id, "OLD", 5, Duration::days(-1));
    let err = ctx.signup("a@x.com", Some("OLD")).await.unwrap_err();
    assert!(matches!(err, ServiceError::InviteNotFound));

    // Code whose owner has been deleted
    let owner = ctx
        .store
        .seed_user("gone@x.com", "not-a-real-hash", Language::En);
    ctx.store
        .seed_invite_code(owner.user_id, "ORPHAN", 5, Duration::days(7));
    ctx.store.delete_user("gone@x.com");
    let err = ctx.signup("a@x.com", Some("ORPHAN")).await.unwrap_err();
    assert!(matches!(err, ServiceError::InviteNotFound));

    assert!(ctx.store.confirmations().is_empty());
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 5);

    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    let pending = ctx.signup("a@x.com", Some("INV1")).await.unwrap_err();
    assert!(matches!(pending, ServiceError::UserAlreadyExists));

    let key = ctx.last_key_for("a@x.com");
    ctx.service.signup_confirm(&key).await.unwrap();

    let confirmed = ctx.signup("a@x.com", Some("INV1")).await.unwrap_err();
    assert!(matches!(confirmed, ServiceError::UserAlreadyExists));
    assert_eq!(ctx.store.invite_usage("INV1"), 1);
}

#[tokio::test]
async fn bad_params_are_rejected_before_any_write() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 5);

    let err = ctx.signup("x", Some("INV1")).await.unwrap_err();
    assert!(matches!(err, ServiceError::BadParam(BadParam::Email)));

    let err = ctx.signup("a@x.com", Some("bad code!")).await.unwrap_err();
    assert!(matches!(err, ServiceError::BadParam(BadParam::InviteCode)));

    let err = ctx
        .service
        .signup_request(SignupInput {
            email: "a@x.com".to_string(),
            language: "klingon".to_string(),
            invite_code: Some("INV1".to_string()),
            remote_addr: common::REMOTE_ADDR.to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadParam(BadParam::Language)));
    assert_eq!(err.code(), "bad_param_language");

    let err = ctx.service.signup_confirm("not a key").await.unwrap_err();
    assert!(matches!(err, ServiceError::BadParam(BadParam::ConfirmationKey)));

    assert!(ctx.store.confirmations().is_empty());
    assert!(ctx.notifier.sent().is_empty());
}

#[tokio::test]
async fn confirmation_key_is_single_use() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 5);

    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    let key = ctx.last_key_for("a@x.com");

    ctx.service.signup_confirm(&key).await.unwrap();
    let err = ctx.service.signup_confirm(&key).await.unwrap_err();

    assert!(matches!(err, ServiceError::ConfirmationNotFound));
    assert_eq!(ctx.store.issued_count(), 1);
}

#[tokio::test]
async fn expired_confirmation_is_not_found_and_frees_the_invite() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 1);

    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    let key = ctx.last_key_for("a@x.com");
    ctx.store.expire_confirmation(&key, Duration::minutes(1));

    let err = ctx.service.signup_confirm(&key).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConfirmationNotFound));

    // The lapsed reservation no longer counts toward the limit.
    assert_eq!(ctx.store.invite_usage("INV1"), 0);
    ctx.signup("b@x.com", Some("INV1")).await.unwrap();

    // The same email may sign up again once its confirmation lapsed.
    ctx.seed_invite("INV2", 1);
    ctx.signup("a@x.com", Some("INV2")).await.unwrap();
}

#[tokio::test]
async fn notifier_failure_surfaces_on_signup_request() {
    let ctx = TestContext::with_failing_notifier();
    ctx.seed_invite("INV1", 1);

    let err = ctx.signup("a@x.com", Some("INV1")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Notify(_)));

    // Nothing was written, so the same request succeeds once mail flows.
    assert_eq!(ctx.store.invite_usage("INV1"), 0);
    assert!(ctx.store.confirmations().is_empty());

    ctx.notifier.set_failure(None);
    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    assert_eq!(ctx.store.invite_usage("INV1"), 1);
    assert_eq!(ctx.notifier.sent_to("a@x.com").len(), 1);
}

#[tokio::test]
async fn partial_commit_is_detected_and_repaired_by_sweep() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 1);

    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    let key = ctx.last_key_for("a@x.com");

    // Main committed the user, Ephemeral still holds the confirmation.
    ctx.store
        .simulate_partial_signup_commit(&key, "not-a-real-hash");
    let err = ctx.service.signup_confirm(&key).await.unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyConfirmed));

    let report = sweep_once(ctx.store.as_ref()).await.unwrap();
    assert_eq!(report.repaired_confirmations, 1);
    assert_eq!(report.released_reservations, 1);
    assert_eq!(ctx.store.reserved_count(), 0);
    assert_eq!(ctx.store.issued_count(), 1);
}

#[tokio::test]
async fn sweep_purges_old_confirmations() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 1);

    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    let key = ctx.last_key_for("a@x.com");
    ctx.store.expire_confirmation(&key, Duration::days(2));

    let report = sweep_once(ctx.store.as_ref()).await.unwrap();
    assert_eq!(report.released_reservations, 1);
    assert_eq!(report.purged_confirmations, 1);
    assert!(ctx.store.confirmations().is_empty());

    let again = sweep_once(ctx.store.as_ref()).await.unwrap();
    assert_eq!(again, Default::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_signups_never_exceed_invite_limit() {
    let ctx = Arc::new(TestContext::new());
    ctx.seed_invite("INV1", 3);

    let mut handles = Vec::new();
    for i in 0..32 {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            ctx.signup(&format!("user{}@x.com", i), Some("INV1")).await
        }));
    }

    let mut ok = 0;
    let mut ended = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(ServiceError::InviteHasEnded) => ended += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(ok, 3);
    assert_eq!(ended, 29);
    assert_eq!(ctx.store.invite_usage("INV1"), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_confirms_create_one_user() {
    let ctx = Arc::new(TestContext::new());
    ctx.seed_invite("INV1", 1);
    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    let key = ctx.last_key_for("a@x.com");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ctx = ctx.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            ctx.service.signup_confirm(&key).await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(ServiceError::ConfirmationNotFound) | Err(ServiceError::AlreadyConfirmed) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(ctx.store.issued_count(), 1);
}
