//! U2F wire codec
//!
//! Byte-level decoding of the raw registration message, the assertion
//! signature envelope and the client data object, plus the base64url helpers
//! used for every wire value. Pure functions, no I/O.
//!
//! Registration message layout:
//! - 1 byte: reserved, always `0x05`
//! - 65 bytes: uncompressed P-256 public key
//! - 1 byte: key handle length (L)
//! - L bytes: key handle
//! - variable: DER X.509 attestation certificate (length taken from its own header)
//! - remaining: attestation signature

use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use openssl::x509::X509;

use super::errors::DecodeError;
use super::types::{ClientData, RawRegistrationMessage, RawSignatureData};

pub const REGISTRATION_RESERVED_BYTE: u8 = 0x05;
pub const EC_POINT_SIZE: usize = 65;
pub const EC_POINT_UNCOMPRESSED: u8 = 0x04;

/// Reserved byte, public key, key handle length, and at least one byte each
/// of key handle, certificate and signature
pub const MIN_REGISTRATION_LEN: usize = 1 + EC_POINT_SIZE + 1 + 1 + 1;

/// Flags byte and big-endian counter, ahead of the DER signature
const SIGNATURE_DATA_HEADER_LEN: usize = 1 + 4;

const ASN1_SEQ_TYPE: u8 = 0x30;
const ASN1_DEFINITE_SHORT_MASK: u8 = 0x80;
const ASN1_DEFINITE_LONG_FOLLOWING_MASK: u8 = 0x7f;
// Certificates beyond 4 GiB are not a thing
const ASN1_MAX_FOLLOWING_LEN_BYTES: usize = 4;

/// URL-safe engine that accepts input with or without trailing padding
const URL_SAFE_ANY_PAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes as unpadded base64url
#[must_use]
pub fn encode_b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, accepting input with or without trailing padding
///
/// # Errors
/// Returns the underlying `base64::DecodeError` for invalid input
pub fn decode_b64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_ANY_PAD.decode(value)
}

/// Decode a raw registration message
///
/// # Errors
/// - `Truncated` if the fixed-size prefix is incomplete or no signature follows the certificate
/// - `BadReservedByte` if the first byte is not `0x05`
/// - `BadPublicKey` if the key is not a valid uncompressed P-256 point
/// - `BadKeyHandle` if the declared key handle length runs past the message
/// - `BadCertificate` if the certificate fails ASN.1 or X.509 parsing
pub fn decode_registration_message(buf: &[u8]) -> Result<RawRegistrationMessage, DecodeError> {
    if buf.len() < MIN_REGISTRATION_LEN {
        return Err(DecodeError::Truncated);
    }

    if buf[0] != REGISTRATION_RESERVED_BYTE {
        return Err(DecodeError::BadReservedByte(buf[0]));
    }

    let public_key = &buf[1..=EC_POINT_SIZE];
    validate_public_key(public_key)?;

    let declared = usize::from(buf[1 + EC_POINT_SIZE]);
    let rest = &buf[2 + EC_POINT_SIZE..];
    if declared > rest.len() {
        return Err(DecodeError::BadKeyHandle {
            declared,
            available: rest.len(),
        });
    }
    let (key_handle, rest) = rest.split_at(declared);

    let cert_len = der_element_len(rest)?;
    let (certificate, signature) = rest.split_at(cert_len);
    X509::from_der(certificate).map_err(|e| DecodeError::BadCertificate(e.to_string()))?;

    if signature.is_empty() {
        return Err(DecodeError::Truncated);
    }

    Ok(RawRegistrationMessage {
        public_key: public_key.to_vec(),
        key_handle: key_handle.to_vec(),
        certificate: certificate.to_vec(),
        signature: signature.to_vec(),
    })
}

/// Encode a registration message in the device wire layout
///
/// # Errors
/// Returns `BadKeyHandle` if the key handle does not fit the one-byte length field
pub fn encode_registration_message(message: &RawRegistrationMessage) -> Result<Vec<u8>, DecodeError> {
    let kh_len = u8::try_from(message.key_handle.len()).map_err(|_| DecodeError::BadKeyHandle {
        declared: message.key_handle.len(),
        available: usize::from(u8::MAX),
    })?;

    let mut out = Vec::with_capacity(
        2 + message.public_key.len()
            + message.key_handle.len()
            + message.certificate.len()
            + message.signature.len(),
    );
    out.push(REGISTRATION_RESERVED_BYTE);
    out.extend_from_slice(&message.public_key);
    out.push(kh_len);
    out.extend_from_slice(&message.key_handle);
    out.extend_from_slice(&message.certificate);
    out.extend_from_slice(&message.signature);
    Ok(out)
}

impl RawRegistrationMessage {
    /// # Errors
    /// See [`encode_registration_message`]
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        encode_registration_message(self)
    }
}

/// Decode the assertion envelope: flags, big-endian counter, DER signature
///
/// # Errors
/// Returns `Truncated` if the header is incomplete or the signature is empty
pub fn decode_signature_data(buf: &[u8]) -> Result<RawSignatureData, DecodeError> {
    if buf.len() <= SIGNATURE_DATA_HEADER_LEN {
        return Err(DecodeError::Truncated);
    }

    Ok(RawSignatureData {
        flags: buf[0],
        counter: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        signature: buf[SIGNATURE_DATA_HEADER_LEN..].to_vec(),
    })
}

#[must_use]
pub fn encode_signature_data(data: &RawSignatureData) -> Vec<u8> {
    let mut out = Vec::with_capacity(SIGNATURE_DATA_HEADER_LEN + data.signature.len());
    out.push(data.flags);
    out.extend_from_slice(&data.counter.to_be_bytes());
    out.extend_from_slice(&data.signature);
    out
}

/// Decode the client data JSON object
///
/// # Errors
/// Returns `BadClientData` for invalid JSON, missing fields or unknown fields
pub fn decode_client_data(buf: &[u8]) -> Result<ClientData, DecodeError> {
    serde_json::from_slice(buf).map_err(|e| DecodeError::BadClientData(e.to_string()))
}

fn validate_public_key(point: &[u8]) -> Result<(), DecodeError> {
    if point.first() != Some(&EC_POINT_UNCOMPRESSED) {
        return Err(DecodeError::BadPublicKey);
    }
    p256::PublicKey::from_sec1_bytes(point)
        .map(|_| ())
        .map_err(|_| DecodeError::BadPublicKey)
}

/// Byte span of the DER element at the start of `buf`, header included
fn der_element_len(buf: &[u8]) -> Result<usize, DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::BadCertificate(
            "certificate header truncated".to_string(),
        ));
    }
    if buf[0] != ASN1_SEQ_TYPE {
        return Err(DecodeError::BadCertificate(format!(
            "expected SEQUENCE, found tag 0x{:02x}",
            buf[0]
        )));
    }

    let (header_len, content_len) = if buf[1] & ASN1_DEFINITE_SHORT_MASK == 0 {
        (2, usize::from(buf[1]))
    } else {
        let following = usize::from(buf[1] & ASN1_DEFINITE_LONG_FOLLOWING_MASK);
        if following == 0 || following > ASN1_MAX_FOLLOWING_LEN_BYTES {
            return Err(DecodeError::BadCertificate(
                "unsupported certificate length encoding".to_string(),
            ));
        }
        if buf.len() < 2 + following {
            return Err(DecodeError::BadCertificate(
                "certificate header truncated".to_string(),
            ));
        }
        let len = buf[2..2 + following]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        (2 + following, len)
    };

    match header_len.checked_add(content_len) {
        Some(total) if total <= buf.len() => Ok(total),
        _ => Err(DecodeError::BadCertificate(
            "certificate runs past the end of the message".to_string(),
        )),
    }
}
