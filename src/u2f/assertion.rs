//! Authentication ("sign") response verification and the counter policy

use std::sync::Arc;

use chrono::{Duration, Utc};
use log::debug;

use super::challenge::{consume_challenge, verify_client_data};
use super::codec;
use super::crypto;
use super::errors::VerifyError;
use super::types::{Purpose, Registration, SignResponse};
use crate::settings::CounterPolicy;
use crate::store::{ChallengeStore, RegistrationStore};
use crate::utils::logging::LoggingHelper;

/// Checks a sign response against a stored registration and the outstanding
/// authentication challenge, then advances the registration counter
pub struct AssertionVerifier {
    challenges: Arc<dyn ChallengeStore>,
    registrations: Arc<dyn RegistrationStore>,
    challenge_timeout: Duration,
    counter_policy: CounterPolicy,
}

impl AssertionVerifier {
    #[must_use]
    pub fn new(
        challenges: Arc<dyn ChallengeStore>,
        registrations: Arc<dyn RegistrationStore>,
        challenge_timeout: Duration,
        counter_policy: CounterPolicy,
    ) -> Self {
        Self {
            challenges,
            registrations,
            challenge_timeout,
            counter_policy,
        }
    }

    /// Complete an authentication, returning the new counter
    ///
    /// # Errors
    /// Returns a `VerifyError` if:
    /// - No unexpired authentication challenge is outstanding
    /// - A response field is not base64url
    /// - The client data is malformed, of the wrong type, from an untrusted
    ///   origin, or echoes a different challenge
    /// - The user owns no registration with the key handle
    /// - The signature envelope is truncated or the signature does not verify
    /// - The user presence flag is clear
    /// - The counter did not advance (`CounterReplay`)
    /// - The store fails
    pub async fn finish_authentication(
        &self,
        user_identity: &str,
        response: &SignResponse,
    ) -> Result<u32, VerifyError> {
        let now = Utc::now();
        let challenge = consume_challenge(
            self.challenges.as_ref(),
            user_identity,
            Purpose::Authentication,
            self.challenge_timeout,
            now,
        )
        .await?;

        let client_data = codec::decode_b64url(&response.client_data)
            .map_err(|e| VerifyError::BadEncoding(format!("clientData: {e}")))?;
        verify_client_data(&challenge, &client_data)?;

        let key_handle = codec::decode_b64url(&response.key_handle)
            .map_err(|e| VerifyError::BadEncoding(format!("keyHandle: {e}")))?;
        let registration = self
            .registrations
            .get(user_identity, &key_handle)
            .await?
            .ok_or(VerifyError::UnknownKeyHandle)?;

        let signature_data = codec::decode_b64url(&response.signature_data)
            .map_err(|e| VerifyError::BadEncoding(format!("signatureData: {e}")))?;
        let envelope = codec::decode_signature_data(&signature_data)?;

        let signed = crypto::assertion_signed_bytes(
            &challenge.app_id,
            envelope.flags,
            envelope.counter,
            &client_data,
        );
        crypto::verify_es256_signature(&registration.public_key, &signed, &envelope.signature)?;

        if !envelope.user_present() {
            return Err(VerifyError::UserNotPresent);
        }

        let stored = registration.counter;
        let received = envelope.counter;
        let first_use = self.is_inaugural_zero(&registration, received);
        if !(first_use || received > stored) {
            LoggingHelper::log_counter_replay(user_identity, &key_handle, stored, received);
            return Err(VerifyError::CounterReplay { stored, received });
        }

        if !self
            .registrations
            .compare_and_swap_counter(user_identity, &key_handle, stored, first_use, received, now)
            .await?
        {
            // Another authentication moved the counter after we read it
            let current = self
                .registrations
                .get(user_identity, &key_handle)
                .await?
                .map_or(stored, |r| r.counter);
            debug!("Counter compare-and-swap lost for {user_identity:?}");
            LoggingHelper::log_counter_replay(user_identity, &key_handle, current, received);
            return Err(VerifyError::CounterReplay {
                stored: current,
                received,
            });
        }

        LoggingHelper::log_authentication_succeeded(user_identity, &key_handle, received);
        Ok(received)
    }

    /// A zero counter from a device that has never authenticated. Accepted
    /// once under `AllowInauguralZero`; the swap stamps `last_used`, which
    /// closes the window.
    fn is_inaugural_zero(&self, registration: &Registration, received: u32) -> bool {
        self.counter_policy == CounterPolicy::AllowInauguralZero
            && registration.counter == 0
            && received == 0
            && registration.last_used.is_none()
    }
}
