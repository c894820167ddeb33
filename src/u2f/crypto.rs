//! U2F cryptography operations
//!
//! Nonce generation, the signed-payload layouts for registration and
//! assertion, and the signature checks behind them.

use openssl::hash::MessageDigest;
use openssl::sign::Verifier as OpensslVerifier;
use openssl::x509::X509;
use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use ring::rand::SecureRandom;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::errors::{IssueError, VerifyError};

/// Minimum nonce size accepted by the settings validator
pub const MIN_NONCE_LEN: usize = 16;

/// Fill a fresh nonce from the system CSPRNG
///
/// # Errors
/// Returns `IssueError::Entropy` if the system random source fails
pub fn generate_nonce(len: usize) -> Result<Vec<u8>, IssueError> {
    let mut bytes = vec![0u8; len];
    ring::rand::SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| IssueError::Entropy)?;
    Ok(bytes)
}

#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compare two byte strings in time that depends only on the longer length.
/// Both inputs are zero-padded to that length before the `subtle` comparison,
/// so a length mismatch counts as a difference without ending the scan early.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut padded_a = vec![0u8; len];
    let mut padded_b = vec![0u8; len];
    padded_a[..a.len()].copy_from_slice(a);
    padded_b[..b.len()].copy_from_slice(b);

    let same_len = a.len().ct_eq(&b.len());
    (padded_a.as_slice().ct_eq(padded_b.as_slice()) & same_len).into()
}

/// Payload covered by the attestation signature:
/// `0x00 || SHA256(appId) || SHA256(clientData) || keyHandle || publicKey`
#[must_use]
pub fn registration_signed_bytes(
    app_id: &str,
    client_data: &[u8],
    key_handle: &[u8],
    public_key: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(1 + 32 + 32 + key_handle.len() + public_key.len());
    data.push(0x00);
    data.extend_from_slice(&sha256(app_id.as_bytes()));
    data.extend_from_slice(&sha256(client_data));
    data.extend_from_slice(key_handle);
    data.extend_from_slice(public_key);
    data
}

/// Payload covered by the assertion signature:
/// `SHA256(appId) || flags || counter (big-endian) || SHA256(clientData)`
#[must_use]
pub fn assertion_signed_bytes(app_id: &str, flags: u8, counter: u32, client_data: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(32 + 1 + 4 + 32);
    data.extend_from_slice(&sha256(app_id.as_bytes()));
    data.push(flags);
    data.extend_from_slice(&counter.to_be_bytes());
    data.extend_from_slice(&sha256(client_data));
    data
}

/// Verify an ES256 (ECDSA P-256 with SHA-256) DER signature against an
/// uncompressed SEC1 public key
///
/// # Errors
/// Returns `VerifyError::BadSignature` if the key or signature is malformed
/// or the signature does not verify
pub fn verify_es256_signature(
    public_key: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<(), VerifyError> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| VerifyError::BadSignature)?;
    let signature = Signature::from_der(signature).map_err(|_| VerifyError::BadSignature)?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| VerifyError::BadSignature)
}

/// Verify the attestation signature with the public key of the DER
/// certificate that came with it. No chain validation is performed.
///
/// # Errors
/// Returns `VerifyError::BadAttestation` if the certificate key cannot be
/// used or the signature does not verify
pub fn verify_attestation_signature(
    certificate: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<(), VerifyError> {
    let attestation_err = |e: openssl::error::ErrorStack| VerifyError::BadAttestation(e.to_string());

    let cert = X509::from_der(certificate).map_err(attestation_err)?;
    let key = cert.public_key().map_err(attestation_err)?;
    let mut verifier = OpensslVerifier::new(MessageDigest::sha256(), &key).map_err(attestation_err)?;
    verifier.update(data).map_err(attestation_err)?;

    match verifier.verify(signature) {
        Ok(true) => Ok(()),
        Ok(false) => Err(VerifyError::BadAttestation(
            "signature does not match certificate key".to_string(),
        )),
        Err(e) => Err(attestation_err(e)),
    }
}
