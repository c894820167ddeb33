//! Registration response verification

use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{debug, warn};

use super::challenge::{consume_challenge, verify_client_data};
use super::codec;
use super::crypto;
use super::errors::VerifyError;
use super::types::{Challenge, Purpose, RawRegistrationMessage, RegisterResponse, Registration};
use crate::settings::AttestationPolicy;
use crate::store::{ChallengeStore, RegistrationStore};
use crate::utils::logging::LoggingHelper;

/// Checks a registration response against the outstanding registration
/// challenge and persists the resulting `Registration`
pub struct RegistrationVerifier {
    challenges: Arc<dyn ChallengeStore>,
    registrations: Arc<dyn RegistrationStore>,
    challenge_timeout: Duration,
    attestation_policy: AttestationPolicy,
}

impl RegistrationVerifier {
    #[must_use]
    pub fn new(
        challenges: Arc<dyn ChallengeStore>,
        registrations: Arc<dyn RegistrationStore>,
        challenge_timeout: Duration,
        attestation_policy: AttestationPolicy,
    ) -> Self {
        Self {
            challenges,
            registrations,
            challenge_timeout,
            attestation_policy,
        }
    }

    /// Complete a registration
    ///
    /// The challenge is consumed first, so it cannot be retried whatever the
    /// outcome. Nothing is written unless every check passes.
    ///
    /// # Errors
    /// Returns a `VerifyError` if:
    /// - No unexpired registration challenge is outstanding
    /// - Either response field is not base64url
    /// - The client data is malformed, of the wrong type, from an untrusted
    ///   origin, or echoes a different challenge
    /// - The registration message fails to decode
    /// - The attestation policy is `verify` and the attestation signature fails
    /// - The user already owns a registration with the same key handle
    /// - The store fails
    pub async fn finish_registration(
        &self,
        user_identity: &str,
        response: &RegisterResponse,
    ) -> Result<Registration, VerifyError> {
        let now = Utc::now();
        let challenge = consume_challenge(
            self.challenges.as_ref(),
            user_identity,
            Purpose::Registration,
            self.challenge_timeout,
            now,
        )
        .await?;

        let client_data = codec::decode_b64url(&response.client_data)
            .map_err(|e| VerifyError::BadEncoding(format!("clientData: {e}")))?;
        let registration_data = codec::decode_b64url(&response.registration_data)
            .map_err(|e| VerifyError::BadEncoding(format!("registrationData: {e}")))?;

        verify_client_data(&challenge, &client_data)?;

        let message = codec::decode_registration_message(&registration_data)?;
        let attestation_certificate = self.check_attestation(&challenge, &client_data, &message)?;

        let registration = Registration {
            user_identity: user_identity.to_string(),
            key_handle: message.key_handle,
            public_key: message.public_key,
            attestation_certificate,
            counter: 0,
            created_at: now,
            last_used: None,
        };

        if !self
            .registrations
            .insert_if_absent(registration.clone())
            .await?
        {
            warn!(
                "Rejected duplicate key handle {} for {user_identity:?}",
                LoggingHelper::key_handle_tag(&registration.key_handle)
            );
            return Err(VerifyError::DuplicateKeyHandle);
        }

        LoggingHelper::log_registration_stored(user_identity, &registration.key_handle);
        Ok(registration)
    }

    /// Apply the attestation policy, returning the certificate to keep
    fn check_attestation(
        &self,
        challenge: &Challenge,
        client_data: &[u8],
        message: &RawRegistrationMessage,
    ) -> Result<Option<Vec<u8>>, VerifyError> {
        match self.attestation_policy {
            AttestationPolicy::Verify => {
                let signed = crypto::registration_signed_bytes(
                    &challenge.app_id,
                    client_data,
                    &message.key_handle,
                    &message.public_key,
                );
                crypto::verify_attestation_signature(
                    &message.certificate,
                    &signed,
                    &message.signature,
                )?;
                Ok(Some(message.certificate.clone()))
            }
            AttestationPolicy::TrustOnFirstUse => {
                debug!("Keeping attestation certificate without verification");
                Ok(Some(message.certificate.clone()))
            }
            AttestationPolicy::Ignore => Ok(None),
        }
    }
}
