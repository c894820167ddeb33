//! U2F error types
//!
//! Every decode and verify path returns one of these; the engine never
//! panics on malformed input from a device or client.

use thiserror::Error;

use crate::store::StoreError;

/// Failures while decoding wire values. Always caused by malformed caller
/// input, never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than the fixed-size prefix of the message
    #[error("message truncated")]
    Truncated,

    /// First byte of a registration message is not `0x05`
    #[error("unexpected reserved byte 0x{0:02x}")]
    BadReservedByte(u8),

    /// Public key is not a valid uncompressed P-256 point
    #[error("public key is not a valid P-256 point")]
    BadPublicKey,

    /// Declared key handle length runs past the end of the message
    #[error("key handle length {declared} exceeds {available} available bytes")]
    BadKeyHandle { declared: usize, available: usize },

    /// Attestation certificate could not be parsed
    #[error("bad attestation certificate: {0}")]
    BadCertificate(String),

    /// Client data is not the expected JSON object
    #[error("bad client data: {0}")]
    BadClientData(String),
}

/// Failures while verifying a device response against an outstanding
/// challenge or a stored registration.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("no outstanding challenge")]
    NoChallenge,

    #[error("challenge expired")]
    ChallengeExpired,

    /// A response field is not valid base64url
    #[error("bad encoding: {0}")]
    BadEncoding(String),

    #[error("bad client data: {0}")]
    BadClientData(String),

    #[error("client data type {actual:?}, expected {expected:?}")]
    WrongClientDataType {
        expected: &'static str,
        actual: String,
    },

    #[error("origin {0:?} is not a trusted facet")]
    UntrustedFacet(String),

    #[error("challenge mismatch")]
    ChallengeMismatch,

    #[error(transparent)]
    Decode(DecodeError),

    #[error("unknown key handle")]
    UnknownKeyHandle,

    #[error("key handle already registered")]
    DuplicateKeyHandle,

    #[error("signature verification failed")]
    BadSignature,

    #[error("user presence flag not set")]
    UserNotPresent,

    #[error("attestation verification failed: {0}")]
    BadAttestation(String),

    /// Counter did not advance; the authenticator has probably been cloned
    #[error("counter replay: received {received}, stored {stored}")]
    CounterReplay { stored: u32, received: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VerifyError {
    /// Whether this failure should produce a security audit record at the
    /// collaborator layer rather than a plain client error.
    #[must_use]
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            VerifyError::CounterReplay { .. }
                | VerifyError::BadSignature
                | VerifyError::UntrustedFacet(_)
                | VerifyError::BadAttestation(_)
        )
    }
}

impl From<DecodeError> for VerifyError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::BadClientData(msg) => VerifyError::BadClientData(msg),
            other => VerifyError::Decode(other),
        }
    }
}

/// Failures while issuing a challenge
#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The system random source refused to produce a nonce
    #[error("system random source unavailable")]
    Entropy,
}
