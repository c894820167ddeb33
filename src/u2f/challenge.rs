//! Challenge issuance and binding
//!
//! Challenges are single use: they are created here, and consumed (read and
//! deleted in one store operation) by the verifiers before any other check
//! runs, so a failed attempt burns the challenge just like a successful one.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use super::codec;
use super::crypto;
use super::errors::{IssueError, VerifyError};
use super::types::{Challenge, ClientData, Purpose, RegisterRequest, SignRequest, U2F_VERSION};
use crate::store::ChallengeStore;
use crate::utils::logging::LoggingHelper;

/// Creates challenges and stores them keyed by `(user_identity, purpose)`
pub struct ChallengeIssuer {
    store: Arc<dyn ChallengeStore>,
    nonce_length: usize,
}

impl ChallengeIssuer {
    #[must_use]
    pub fn new(store: Arc<dyn ChallengeStore>, nonce_length: usize) -> Self {
        Self {
            store,
            nonce_length: nonce_length.max(crypto::MIN_NONCE_LEN),
        }
    }

    /// Issue a fresh challenge, superseding any outstanding challenge of the
    /// same purpose for this user
    ///
    /// # Errors
    /// Returns an `IssueError` if the random source or the store fails
    pub async fn begin_challenge(
        &self,
        user_identity: &str,
        purpose: Purpose,
        app_id: &str,
        trusted_facets: BTreeSet<String>,
    ) -> Result<RegisterRequest, IssueError> {
        let challenge = Challenge {
            user_identity: user_identity.to_string(),
            purpose,
            nonce: crypto::generate_nonce(self.nonce_length)?,
            app_id: app_id.to_string(),
            trusted_facets,
            created_at: Utc::now(),
        };
        let request = RegisterRequest {
            version: U2F_VERSION.to_string(),
            challenge: challenge.encoded_nonce(),
            app_id: challenge.app_id.clone(),
        };

        self.store.put(challenge).await?;
        debug!("Issued {purpose:?} challenge for {user_identity:?}");

        Ok(request)
    }
}

impl RegisterRequest {
    /// Pair this challenge with one registered device
    #[must_use]
    pub fn sign_request(&self, key_handle: &[u8]) -> SignRequest {
        SignRequest {
            version: self.version.clone(),
            challenge: self.challenge.clone(),
            key_handle: codec::encode_b64url(key_handle),
            app_id: self.app_id.clone(),
        }
    }
}

/// Consume the outstanding challenge and reject it if it has expired
///
/// # Errors
/// - `NoChallenge` if nothing is outstanding
/// - `ChallengeExpired` if it is older than `timeout`
/// - `Store` if the store fails
pub async fn consume_challenge(
    store: &dyn ChallengeStore,
    user_identity: &str,
    purpose: Purpose,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<Challenge, VerifyError> {
    let challenge = store
        .take(user_identity, purpose)
        .await?
        .ok_or(VerifyError::NoChallenge)?;

    if challenge.is_expired(now, timeout) {
        debug!("{purpose:?} challenge for {user_identity:?} expired");
        return Err(VerifyError::ChallengeExpired);
    }

    Ok(challenge)
}

/// Decode client data and check it answers `challenge`: type, origin among
/// the trusted facets, and the echoed nonce
///
/// # Errors
/// - `BadClientData` if the bytes are not a client data object
/// - `WrongClientDataType` if `typ` does not match the challenge purpose
/// - `UntrustedFacet` if the origin is not trusted
/// - `ChallengeMismatch` if the echoed nonce differs
pub fn verify_client_data(challenge: &Challenge, raw: &[u8]) -> Result<ClientData, VerifyError> {
    let client_data = codec::decode_client_data(raw)?;

    let expected = challenge.purpose.client_data_type();
    if client_data.typ != expected {
        return Err(VerifyError::WrongClientDataType {
            expected,
            actual: client_data.typ,
        });
    }

    if !challenge.trusted_facets.contains(&client_data.origin) {
        LoggingHelper::log_untrusted_facet(&challenge.user_identity, &client_data.origin);
        return Err(VerifyError::UntrustedFacet(client_data.origin));
    }

    let expected_challenge = challenge.encoded_nonce();
    let received_challenge = client_data.challenge.trim_end_matches('=');
    if !crypto::constant_time_eq(expected_challenge.as_bytes(), received_challenge.as_bytes()) {
        return Err(VerifyError::ChallengeMismatch);
    }

    Ok(client_data)
}
