//! U2F engine facade
//!
//! `AuthEngine` wires the challenge issuer and both verifiers to one set of
//! settings and a pair of stores. It is cheap to share behind an `Arc`; every
//! operation takes `&self` and the stores provide the atomicity.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use log::{debug, info};

use super::assertion::AssertionVerifier;
use super::challenge::ChallengeIssuer;
use super::registration::RegistrationVerifier;
use super::errors::{IssueError, VerifyError};
use super::types::{
    Purpose, RegisterRequest, RegisterResponse, Registration, RegistrationSummary, SignRequest,
    SignResponse,
};
use crate::settings::{ConfigError, U2fSettings};
use crate::store::{ChallengeStore, RegistrationStore, StoreError};

pub struct AuthEngine {
    app_id: String,
    trusted_facets: BTreeSet<String>,
    issuer: ChallengeIssuer,
    registration: RegistrationVerifier,
    assertion: AssertionVerifier,
    registrations: Arc<dyn RegistrationStore>,
}

impl AuthEngine {
    /// Build an engine over the given stores
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if the settings fail validation
    pub fn new(
        settings: &U2fSettings,
        challenges: Arc<dyn ChallengeStore>,
        registrations: Arc<dyn RegistrationStore>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let timeout: Duration = settings.challenge_timeout();
        let trusted_facets = settings.facet_set();
        info!(
            "U2F engine for {} trusting {} facet(s), attestation {:?}, counter {:?}",
            settings.app_id,
            trusted_facets.len(),
            settings.attestation_policy,
            settings.counter_policy
        );

        Ok(Self {
            app_id: settings.app_id.clone(),
            trusted_facets,
            issuer: ChallengeIssuer::new(Arc::clone(&challenges), settings.nonce_length),
            registration: RegistrationVerifier::new(
                Arc::clone(&challenges),
                Arc::clone(&registrations),
                timeout,
                settings.attestation_policy,
            ),
            assertion: AssertionVerifier::new(
                challenges,
                Arc::clone(&registrations),
                timeout,
                settings.counter_policy,
            ),
            registrations,
        })
    }

    /// The application id every challenge is issued for
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Start a registration for `user_identity`
    ///
    /// # Errors
    /// Returns an `IssueError` if the random source or the store fails
    pub async fn begin_registration(
        &self,
        user_identity: &str,
    ) -> Result<RegisterRequest, IssueError> {
        self.issuer
            .begin_challenge(
                user_identity,
                Purpose::Registration,
                &self.app_id,
                self.trusted_facets.clone(),
            )
            .await
    }

    /// Complete a registration started with `begin_registration`
    ///
    /// # Errors
    /// See [`RegistrationVerifier::finish_registration`]
    pub async fn finish_registration(
        &self,
        user_identity: &str,
        response: &RegisterResponse,
    ) -> Result<Registration, VerifyError> {
        self.registration
            .finish_registration(user_identity, response)
            .await
    }

    /// Start an authentication, producing one sign request per registered
    /// device. All requests share a single challenge.
    ///
    /// A user with no registrations gets an empty list. The challenge is
    /// still issued and simply expires unanswered.
    ///
    /// # Errors
    /// Returns an `IssueError` if the random source or a store fails
    pub async fn begin_authentication(
        &self,
        user_identity: &str,
    ) -> Result<Vec<SignRequest>, IssueError> {
        let request = self
            .issuer
            .begin_challenge(
                user_identity,
                Purpose::Authentication,
                &self.app_id,
                self.trusted_facets.clone(),
            )
            .await?;

        let registrations = self.registrations.list_for_user(user_identity).await?;
        if registrations.is_empty() {
            debug!("No U2F devices registered for {user_identity:?}");
        }

        Ok(registrations
            .iter()
            .map(|registration| request.sign_request(&registration.key_handle))
            .collect())
    }

    /// Complete an authentication started with `begin_authentication`,
    /// returning the device's new counter
    ///
    /// # Errors
    /// See [`AssertionVerifier::finish_authentication`]
    pub async fn finish_authentication(
        &self,
        user_identity: &str,
        response: &SignResponse,
    ) -> Result<u32, VerifyError> {
        self.assertion
            .finish_authentication(user_identity, response)
            .await
    }

    /// Registered devices for `user_identity`, in registration order
    ///
    /// # Errors
    /// Returns a `StoreError` if the registration store fails
    pub async fn list_registrations(
        &self,
        user_identity: &str,
    ) -> Result<Vec<RegistrationSummary>, StoreError> {
        Ok(self
            .registrations
            .list_for_user(user_identity)
            .await?
            .iter()
            .map(Registration::summary)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{fixtures, SoftAuthenticator};

    fn engine() -> (AuthEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = AuthEngine::new(&fixtures::settings(), store.clone(), store.clone()).unwrap();
        (engine, store)
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let settings = U2fSettings::for_app_id("");
        assert!(matches!(
            AuthEngine::new(&settings, store.clone(), store),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_begin_authentication_without_devices() {
        let (engine, store) = engine();
        assert!(engine.begin_authentication("nobody").await.unwrap().is_empty());
        assert!(ChallengeStore::get(store.as_ref(), "nobody", Purpose::Authentication)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_begin_registration_view() {
        let (engine, _) = engine();
        let request = engine.begin_registration("alice").await.unwrap();
        assert_eq!(request.version, "U2F_V2");
        assert_eq!(request.app_id, fixtures::APP_ID);
        assert_eq!(engine.app_id(), fixtures::APP_ID);
    }

    #[tokio::test]
    async fn test_registration_then_authentication() {
        let (engine, _) = engine();
        let device = SoftAuthenticator::new();

        let request = engine.begin_registration("alice").await.unwrap();
        let response = device.register(&request.app_id, &request.challenge, fixtures::APP_ID);
        engine.finish_registration("alice", &response).await.unwrap();

        let requests = engine.begin_authentication("alice").await.unwrap();
        assert_eq!(requests.len(), 1);
        let sign = &requests[0];
        let response = device.sign(&sign.app_id, &sign.challenge, fixtures::APP_ID, 1);
        assert_eq!(response.key_handle, sign.key_handle);
        assert_eq!(engine.finish_authentication("alice", &response).await.unwrap(), 1);

        let listed = engine.list_registrations("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].counter, 1);
        assert!(listed[0].last_used.is_some());
    }
}
