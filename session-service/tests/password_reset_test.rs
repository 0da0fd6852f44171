mod common;

use chrono::Duration;
use common::{TestContext, REMOTE_ADDR};
use session_service::models::ConfirmationKind;
use session_service::services::{NotifyError, ServiceError};

#[tokio::test]
async fn test_password_reset_flow() {
    let ctx = TestContext::new();
    let (old_password, triple) = ctx.logged_in("a@x.com").await;

    ctx.service.reset_request("a@x.com", REMOTE_ADDR).await.unwrap();

    let mail = ctx.notifier.sent_to("a@x.com");
    let link = mail.last().unwrap();
    assert!(link.body.contains("/password-reset/confirm?key="));

    let key = ctx.last_key_for("a@x.com");
    let message = ctx.service.reset_confirm(&key).await.unwrap();
    assert!(message.contains("a@x.com"));

    let new_password = ctx.last_password_for("a@x.com");
    assert_ne!(new_password, old_password);

    // Old password no longer works, the mailed one does.
    let err = ctx.login("a@x.com", &old_password).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));
    assert!(ctx.login("a@x.com", &new_password).await.is_ok());

    // Every session open before the reset is signed out.
    let err = ctx.service.refresh(&triple.refresh_token).await.unwrap_err();
    assert!(matches!(err, ServiceError::UserNotFound));
}

#[tokio::test]
async fn test_reset_for_unknown_email_writes_nothing() {
    let ctx = TestContext::new();

    let err = ctx
        .service
        .reset_request("nobody@x.com", REMOTE_ADDR)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::UserNotFound));
    assert!(ctx.store.confirmations().is_empty());
    assert!(ctx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_full_mail_queue_does_not_block_a_retry() {
    let ctx = TestContext::new();
    ctx.logged_in("a@x.com").await;

    ctx.notifier.set_failure(Some(NotifyError::QueueFull));
    let err = ctx
        .service
        .reset_request("a@x.com", REMOTE_ADDR)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Notify(NotifyError::QueueFull)));
    assert!(!ctx
        .store
        .confirmations()
        .iter()
        .any(|c| c.is_kind(ConfirmationKind::PasswordReset)));

    ctx.notifier.set_failure(None);
    ctx.service.reset_request("a@x.com", REMOTE_ADDR).await.unwrap();
    let key = ctx.last_key_for("a@x.com");
    assert!(ctx.service.reset_confirm(&key).await.is_ok());
}

#[tokio::test]
async fn test_duplicate_reset_request() {
    let ctx = TestContext::new();
    ctx.logged_in("a@x.com").await;

    ctx.service.reset_request("a@x.com", REMOTE_ADDR).await.unwrap();
    let err = ctx
        .service
        .reset_request("a@x.com", REMOTE_ADDR)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ResetAlreadyRequested));

    let live = ctx
        .store
        .confirmations()
        .into_iter()
        .filter(|c| c.is_kind(ConfirmationKind::PasswordReset) && c.deleted_utc.is_none())
        .count();
    assert_eq!(live, 1);
}

#[tokio::test]
async fn test_reset_key_is_single_use_and_expires() {
    let ctx = TestContext::new();
    ctx.logged_in("a@x.com").await;

    ctx.service.reset_request("a@x.com", REMOTE_ADDR).await.unwrap();
    let key = ctx.last_key_for("a@x.com");
    ctx.service.reset_confirm(&key).await.unwrap();

    let err = ctx.service.reset_confirm(&key).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConfirmationNotFound));

    // A fresh request is allowed once the previous one is consumed.
    ctx.service.reset_request("a@x.com", REMOTE_ADDR).await.unwrap();
    let key = ctx.last_key_for("a@x.com");
    ctx.store.expire_confirmation(&key, Duration::seconds(1));

    let err = ctx.service.reset_confirm(&key).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConfirmationNotFound));
}

#[tokio::test]
async fn test_signup_key_does_not_reset_password() {
    let ctx = TestContext::new();
    ctx.seed_invite("INV1", 1);
    ctx.signup("a@x.com", Some("INV1")).await.unwrap();
    let key = ctx.last_key_for("a@x.com");

    let err = ctx.service.reset_confirm(&key).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConfirmationNotFound));
}

#[tokio::test]
async fn test_reset_for_deleted_user() {
    let ctx = TestContext::new();
    ctx.logged_in("a@x.com").await;

    ctx.service.reset_request("a@x.com", REMOTE_ADDR).await.unwrap();
    let key = ctx.last_key_for("a@x.com");
    ctx.store.delete_user("a@x.com");

    let err = ctx.service.reset_confirm(&key).await.unwrap_err();
    assert!(matches!(err, ServiceError::UserNotFound));
}
