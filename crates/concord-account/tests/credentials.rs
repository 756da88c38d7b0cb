//! User credential handling across devices.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use assert_matches::assert_matches;
use common::{circle, device, found, last_posted, local_id, PASSWORD};
use concord_account::{CircleStatus, KeyParametersRecord};
use concord_core::{CircleName, ConcordError};
use concord_testkit::{relay_circle, relay_key_parameters};

const KEYCHAIN: &str = "keychain";

#[tokio::test]
async fn try_credentials_without_parameters_is_false() {
    let alpha = device("alpha", &[KEYCHAIN]);
    assert!(!alpha.service.try_user_credentials(PASSWORD).await.unwrap());
    assert!(!alpha.service.has_private_key().await);
}

#[tokio::test]
async fn wrong_password_changes_nothing() {
    let alpha = device("alpha", &[KEYCHAIN]);
    assert!(alpha.service.assert_user_credentials(PASSWORD).await.unwrap());
    assert!(alpha.service.has_private_key().await);

    assert!(alpha.service.on_lock_state_changed(true).await);
    assert!(!alpha.service.has_private_key().await);

    let before = alpha.service.snapshot().await;
    assert!(!alpha.service.try_user_credentials("hunter2").await.unwrap());
    assert!(!alpha.service.has_private_key().await);
    assert_eq!(alpha.service.snapshot().await, before);
    assert_matches!(
        alpha.service.require_user_credentials("hunter2").await,
        Err(ConcordError::WrongPassword)
    );

    assert!(alpha.service.try_user_credentials(PASSWORD).await.unwrap());
    assert!(alpha.service.has_private_key().await);
    alpha.service.require_user_credentials(PASSWORD).await.unwrap();
}

#[tokio::test]
async fn private_key_expires_with_clock() {
    let alpha = device("alpha", &[KEYCHAIN]);
    alpha.service.assert_user_credentials(PASSWORD).await.unwrap();
    let ttl = alpha.config.private_key_ttl_secs + alpha.config.private_key_jitter_secs;
    alpha.clock.advance(ttl);
    assert!(!alpha.service.has_private_key().await);
    assert_matches!(
        alpha.service.reset_to_offering().await,
        Err(ConcordError::PrivateKeyAbsent { .. })
    );
}

#[tokio::test]
async fn reasserting_the_same_password_keeps_the_key() {
    let alpha = device("alpha", &[KEYCHAIN]);
    alpha.service.assert_user_credentials(PASSWORD).await.unwrap();
    let first = alpha.service.snapshot().await;
    alpha.service.assert_user_credentials(PASSWORD).await.unwrap();
    let second = alpha.service.snapshot().await;

    assert_eq!(
        first.credential().public_key(),
        second.credential().public_key()
    );
    assert_eq!(
        first.credential().key_parameters(),
        second.credential().key_parameters()
    );
}

#[tokio::test]
async fn new_password_rolls_the_key_over() {
    let alpha = device("alpha", &[KEYCHAIN]);
    found(&alpha).await;
    let old_key = *alpha
        .service
        .snapshot()
        .await
        .credential()
        .trusted_public_key()
        .unwrap();

    assert!(alpha.service.assert_user_credentials("new password").await.unwrap());
    let account = alpha.service.snapshot().await;
    let new_key = *account.credential().trusted_public_key().unwrap();
    assert_ne!(new_key, old_key);
    assert_eq!(account.credential().previous_public_key(), Some(&new_key));

    let record = KeyParametersRecord::decode(&alpha.transport.last_key_parameters().await.unwrap())
        .unwrap();
    assert_eq!(record.public_key, new_key);

    // The circle is re-signed in place under the new key.
    let resigned = circle(&alpha, KEYCHAIN).await;
    assert_eq!(resigned.generation(), 1);
    assert!(resigned.verify(&new_key));
    assert_eq!(last_posted(&alpha, KEYCHAIN).await, resigned);
}

#[tokio::test]
async fn password_change_sweeps_and_reapplies_stale_applications() {
    let alpha = device("alpha", &[KEYCHAIN]);
    let beta = device("beta", &[KEYCHAIN]);
    found(&alpha).await;
    relay_key_parameters(&alpha, &beta).await.unwrap();
    beta.service.assert_user_credentials(PASSWORD).await.unwrap();
    relay_circle(&alpha, &beta, KEYCHAIN).await.unwrap();
    beta.service.join_circle(false).await.unwrap();
    relay_circle(&beta, &alpha, KEYCHAIN).await.unwrap();
    let beta_id = local_id(&beta, KEYCHAIN).await;
    assert_eq!(circle(&alpha, KEYCHAIN).await.count_applicants(), 1);

    // Alpha changes the password; beta's application no longer verifies.
    alpha.service.assert_user_credentials("new password").await.unwrap();
    assert_eq!(circle(&alpha, KEYCHAIN).await.count_applicants(), 0);

    // Beta only observes the new key; the re-signed circle waits.
    assert!(relay_key_parameters(&alpha, &beta).await.unwrap());
    assert!(!relay_circle(&alpha, &beta, KEYCHAIN).await.unwrap());
    assert!(!beta.service.has_private_key().await);

    // Typing the new password replays it and beta applies again.
    assert!(beta.service.assert_user_credentials("new password").await.unwrap());
    assert_eq!(
        beta.service.circle_status(&CircleName::from(KEYCHAIN)).await.unwrap(),
        CircleStatus::Applicant
    );
    relay_circle(&beta, &alpha, KEYCHAIN).await.unwrap();
    assert!(circle(&alpha, KEYCHAIN).await.has_applicant(&beta_id));
}
