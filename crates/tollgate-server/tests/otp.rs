mod common;

use std::time::Duration;

use tollgate_server::{OtpStore, OtpVerification};

fn otp_store(max_attempts: u32) -> OtpStore {
    OtpStore::new(common::memory_store(), Duration::from_secs(600), max_attempts)
}

#[tokio::test]
async fn correct_code_verifies_once() {
    let gate = common::service().await;

    gate.issue_otp("alice@example.com", "login", "482913")
        .await
        .unwrap();
    assert_eq!(
        gate.verify_otp("alice@example.com", "login", "482913")
            .await
            .unwrap(),
        OtpVerification::Verified
    );
    assert_eq!(
        gate.verify_otp("alice@example.com", "login", "482913")
            .await
            .unwrap(),
        OtpVerification::Missing
    );
}

#[tokio::test]
async fn wrong_codes_exhaust_the_attempts() {
    let otp = otp_store(3);
    otp.issue("bob@example.com", "reset", "111111", None)
        .await
        .unwrap();

    assert_eq!(
        otp.verify("bob@example.com", "reset", "000000").await.unwrap(),
        OtpVerification::Invalid { remaining_attempts: 2 }
    );
    assert_eq!(
        otp.verify("bob@example.com", "reset", "000001").await.unwrap(),
        OtpVerification::Invalid { remaining_attempts: 1 }
    );
    assert_eq!(
        otp.verify("bob@example.com", "reset", "000002").await.unwrap(),
        OtpVerification::TooManyAttempts
    );

    // The correct code no longer works
    assert_eq!(
        otp.verify("bob@example.com", "reset", "111111").await.unwrap(),
        OtpVerification::Missing
    );
}

#[tokio::test]
async fn wrong_code_keeps_the_right_one_valid() {
    let otp = otp_store(5);
    otp.issue("carol@example.com", "login", "424242", None)
        .await
        .unwrap();

    assert!(matches!(
        otp.verify("carol@example.com", "login", "999999").await.unwrap(),
        OtpVerification::Invalid { .. }
    ));
    assert_eq!(
        otp.verify("carol@example.com", "login", " 424242 ").await.unwrap(),
        OtpVerification::Verified
    );
}

#[tokio::test]
async fn email_is_normalized() {
    let otp = otp_store(5);
    otp.issue("  Dave@Example.COM ", "signup", "135790", None)
        .await
        .unwrap();
    assert_eq!(
        otp.verify("dave@example.com", "signup", "135790").await.unwrap(),
        OtpVerification::Verified
    );
}

#[tokio::test]
async fn codes_are_scoped_by_purpose() {
    let otp = otp_store(5);
    otp.issue("erin@example.com", "login", "123456", None)
        .await
        .unwrap();

    assert_eq!(
        otp.verify("erin@example.com", "reset", "123456").await.unwrap(),
        OtpVerification::Missing
    );
    assert!(otp.is_pending("erin@example.com", "login").await.unwrap());
}

#[tokio::test]
async fn reissue_replaces_the_previous_code() {
    let otp = otp_store(5);
    otp.issue("frank@example.com", "login", "111111", None)
        .await
        .unwrap();
    otp.issue("frank@example.com", "login", "222222", None)
        .await
        .unwrap();

    assert!(matches!(
        otp.verify("frank@example.com", "login", "111111").await.unwrap(),
        OtpVerification::Invalid { remaining_attempts: 4 }
    ));
    assert_eq!(
        otp.verify("frank@example.com", "login", "222222").await.unwrap(),
        OtpVerification::Verified
    );
}

#[tokio::test]
async fn expired_code_is_missing() {
    let otp = otp_store(5);
    otp.issue(
        "grace@example.com",
        "login",
        "777777",
        Some(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    common::sleep_ms(150).await;
    assert_eq!(
        otp.verify("grace@example.com", "login", "777777").await.unwrap(),
        OtpVerification::Missing
    );
}

#[tokio::test]
async fn invalidate_drops_the_code() {
    let gate = common::service().await;
    gate.issue_otp("heidi@example.com", "login", "555555")
        .await
        .unwrap();

    assert!(gate.invalidate_otp("heidi@example.com", "login").await.unwrap());
    assert!(!gate.invalidate_otp("heidi@example.com", "login").await.unwrap());
    assert!(!gate.otp().is_pending("heidi@example.com", "login").await.unwrap());
}
