use std::sync::Arc;

use u2f_engine::testing::{fixtures, SoftAuthenticator};
use u2f_engine::u2f::{codec, Purpose};
use u2f_engine::{
    AuthEngine, ChallengeStore, CounterPolicy, MemoryStore, RegistrationStore, U2fSettings,
    VerifyError,
};

fn engine_with(settings: &U2fSettings) -> (AuthEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = AuthEngine::new(settings, store.clone(), store.clone())
        .expect("fixture settings are valid");
    (engine, store)
}

async fn register(engine: &AuthEngine, user: &str, device: &SoftAuthenticator) {
    let request = engine.begin_registration(user).await.unwrap();
    let response = device.register(&request.app_id, &request.challenge, fixtures::APP_ID);
    engine.finish_registration(user, &response).await.unwrap();
}

/// Register alice's device, then authenticate with counter 1
#[tokio::test]
async fn test_register_then_authenticate() {
    let (engine, _) = engine_with(&fixtures::settings());
    let device = SoftAuthenticator::new();

    let request = engine.begin_registration("alice").await.unwrap();
    assert_eq!(request.version, "U2F_V2");
    assert_eq!(request.app_id, "https://example.test");

    let response = device.register(&request.app_id, &request.challenge, "https://example.test");
    let registration = engine.finish_registration("alice", &response).await.unwrap();
    assert_eq!(registration.user_identity, "alice");
    assert_eq!(registration.counter, 0);

    let requests = engine.begin_authentication("alice").await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].key_handle, codec::encode_b64url(device.key_handle()));

    let response = device.sign(
        &requests[0].app_id,
        &requests[0].challenge,
        "https://example.test",
        1,
    );
    assert_eq!(engine.finish_authentication("alice", &response).await.unwrap(), 1);
}

#[tokio::test]
async fn test_outbound_views_serialize_with_wire_field_names() {
    let (engine, _) = engine_with(&fixtures::settings());
    let device = SoftAuthenticator::new();
    register(&engine, "alice", &device).await;

    let request = engine.begin_registration("bob").await.unwrap();
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["appId"], fixtures::APP_ID);
    assert_eq!(json["version"], "U2F_V2");

    let requests = engine.begin_authentication("alice").await.unwrap();
    let json = serde_json::to_value(&requests[0]).unwrap();
    assert!(json["keyHandle"].is_string());
    assert!(json["challenge"].is_string());
}

#[tokio::test]
async fn test_each_device_of_a_user_can_authenticate() {
    let (engine, _) = engine_with(&fixtures::settings());
    let yubikey = SoftAuthenticator::new();
    let backup = SoftAuthenticator::new();
    register(&engine, "alice", &yubikey).await;
    register(&engine, "alice", &backup).await;

    let requests = engine.begin_authentication("alice").await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].challenge, requests[1].challenge);
    assert_ne!(requests[0].key_handle, requests[1].key_handle);

    let response = backup.sign(fixtures::APP_ID, &requests[1].challenge, fixtures::APP_ID, 7);
    assert_eq!(engine.finish_authentication("alice", &response).await.unwrap(), 7);

    // The other device's counter is untouched
    let listed = engine.list_registrations("alice").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].counter, 0);
    assert!(listed[0].last_used.is_none());
    assert_eq!(listed[1].counter, 7);
    assert!(listed[1].last_used.is_some());
}

#[tokio::test]
async fn test_registrations_are_per_user() {
    let (engine, store) = engine_with(&fixtures::settings());
    let device = SoftAuthenticator::new();
    register(&engine, "alice", &device).await;

    assert!(engine.list_registrations("bob").await.unwrap().is_empty());
    assert!(engine.begin_authentication("bob").await.unwrap().is_empty());

    // Bob cannot answer his own challenge with alice's device
    let challenge = ChallengeStore::get(store.as_ref(), "bob", Purpose::Authentication)
        .await
        .unwrap()
        .expect("challenge issued even without devices")
        .encoded_nonce();
    let response = device.sign(fixtures::APP_ID, &challenge, fixtures::APP_ID, 1);
    assert!(matches!(
        engine.finish_authentication("bob", &response).await,
        Err(VerifyError::UnknownKeyHandle)
    ));
}

#[tokio::test]
async fn test_replayed_sign_response_is_rejected() {
    let (engine, _) = engine_with(&fixtures::settings());
    let device = SoftAuthenticator::new();
    register(&engine, "alice", &device).await;

    let requests = engine.begin_authentication("alice").await.unwrap();
    let response = device.sign(fixtures::APP_ID, &requests[0].challenge, fixtures::APP_ID, 1);
    engine.finish_authentication("alice", &response).await.unwrap();

    // Same response again: the challenge is gone
    assert!(matches!(
        engine.finish_authentication("alice", &response).await,
        Err(VerifyError::NoChallenge)
    ));

    // A cloned device reusing an old counter against a fresh challenge
    let requests = engine.begin_authentication("alice").await.unwrap();
    let response = device.sign(fixtures::APP_ID, &requests[0].challenge, fixtures::APP_ID, 1);
    let err = engine
        .finish_authentication("alice", &response)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VerifyError::CounterReplay {
            stored: 1,
            received: 1
        }
    ));
    assert!(err.is_security_relevant());
}

#[tokio::test]
async fn test_registration_challenge_cannot_answer_authentication() {
    let (engine, _) = engine_with(&fixtures::settings());
    let device = SoftAuthenticator::new();
    register(&engine, "alice", &device).await;

    let request = engine.begin_registration("alice").await.unwrap();
    let response = device.sign(fixtures::APP_ID, &request.challenge, fixtures::APP_ID, 1);
    assert!(matches!(
        engine.finish_authentication("alice", &response).await,
        Err(VerifyError::NoChallenge)
    ));
}

#[tokio::test]
async fn test_additional_trusted_facet() {
    let mut settings = fixtures::settings();
    settings.trusted_facets = vec![
        fixtures::APP_ID.to_string(),
        "https://login.example.test".to_string(),
    ];
    let (engine, _) = engine_with(&settings);
    let device = SoftAuthenticator::new();

    let request = engine.begin_registration("alice").await.unwrap();
    let response = device.register(
        &request.app_id,
        &request.challenge,
        "https://login.example.test",
    );
    engine.finish_registration("alice", &response).await.unwrap();

    let requests = engine.begin_authentication("alice").await.unwrap();
    let response = device.sign(
        &requests[0].app_id,
        &requests[0].challenge,
        fixtures::UNTRUSTED_ORIGIN,
        1,
    );
    assert!(matches!(
        engine.finish_authentication("alice", &response).await,
        Err(VerifyError::UntrustedFacet(_))
    ));
}

#[tokio::test]
async fn test_expired_challenge() {
    let mut settings = fixtures::settings();
    settings.challenge_timeout_seconds = 1;
    let (engine, _) = engine_with(&settings);
    let device = SoftAuthenticator::new();

    let request = engine.begin_registration("alice").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let response = device.register(&request.app_id, &request.challenge, fixtures::APP_ID);
    assert!(matches!(
        engine.finish_registration("alice", &response).await,
        Err(VerifyError::ChallengeExpired)
    ));
}

#[tokio::test]
async fn test_strict_counter_policy_rejects_initial_zero() {
    let mut settings = fixtures::settings();
    settings.counter_policy = CounterPolicy::Strict;
    let (engine, store) = engine_with(&settings);
    let device = SoftAuthenticator::new();
    register(&engine, "alice", &device).await;

    let requests = engine.begin_authentication("alice").await.unwrap();
    let response = device.sign(fixtures::APP_ID, &requests[0].challenge, fixtures::APP_ID, 0);
    assert!(matches!(
        engine.finish_authentication("alice", &response).await,
        Err(VerifyError::CounterReplay { .. })
    ));

    let stored = RegistrationStore::get(store.as_ref(), "alice", device.key_handle())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.counter, 0);
}

#[tokio::test]
async fn test_concurrent_users_do_not_interfere() {
    let (engine, _) = engine_with(&fixtures::settings());
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let user = format!("user-{i}");
            let device = SoftAuthenticator::new();
            register(&engine, &user, &device).await;

            let requests = engine.begin_authentication(&user).await.unwrap();
            let response =
                device.sign(fixtures::APP_ID, &requests[0].challenge, fixtures::APP_ID, 1);
            engine.finish_authentication(&user, &response).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_zero_counter_is_accepted_only_once() {
    let (engine, _) = engine_with(&fixtures::settings());
    let device = SoftAuthenticator::new();
    register(&engine, "alice", &device).await;

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let requests = engine.begin_authentication("alice").await.unwrap();
        let response = device.sign(fixtures::APP_ID, &requests[0].challenge, fixtures::APP_ID, 0);
        outcomes.push(engine.finish_authentication("alice", &response).await);
    }

    assert_eq!(outcomes[0].as_ref().unwrap(), &0);
    for outcome in &outcomes[1..] {
        assert!(matches!(
            outcome,
            Err(VerifyError::CounterReplay {
                stored: 0,
                received: 0
            })
        ));
    }
}
