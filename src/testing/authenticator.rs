//! Software U2F authenticator
//!
//! Holds a P-256 device key, a random key handle and a self-signed
//! attestation certificate, and answers challenges the way a hardware token
//! and browser would together.

use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer as OpensslSigner;
use openssl::x509::{X509Builder, X509NameBuilder};
use p256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use ring::rand::{SecureRandom, SystemRandom};

use crate::u2f::codec::{encode_b64url, encode_signature_data};
use crate::u2f::crypto::{assertion_signed_bytes, registration_signed_bytes};
use crate::u2f::{
    ClientData, RawRegistrationMessage, RawSignatureData, RegisterResponse, Registration,
    SignResponse, TYPE_FINISH_ENROLLMENT, TYPE_GET_ASSERTION,
};

const KEY_HANDLE_LEN: usize = 64;

/// User presence flag in the assertion envelope
pub const FLAG_USER_PRESENT: u8 = 0x01;

pub struct SoftAuthenticator {
    signing_key: SigningKey,
    key_handle: Vec<u8>,
    attestation_key: PKey<Private>,
    attestation_certificate: Vec<u8>,
}

impl Default for SoftAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftAuthenticator {
    /// Create a device with fresh key material
    ///
    /// # Panics
    ///
    /// Panics if the system random source or openssl key generation fails
    #[must_use]
    pub fn new() -> Self {
        let rng = SystemRandom::new();

        let signing_key = loop {
            let mut scalar = [0u8; 32];
            rng.fill(&mut scalar).expect("system random source");
            if let Ok(key) = SigningKey::from_slice(&scalar) {
                break key;
            }
        };

        let mut key_handle = vec![0u8; KEY_HANDLE_LEN];
        rng.fill(&mut key_handle).expect("system random source");

        let (attestation_key, attestation_certificate) = self_signed_attestation();

        Self {
            signing_key,
            key_handle,
            attestation_key,
            attestation_certificate,
        }
    }

    /// Device public key as an uncompressed SEC1 point
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        VerifyingKey::from(&self.signing_key)
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    #[must_use]
    pub fn key_handle(&self) -> &[u8] {
        &self.key_handle
    }

    /// DER-encoded attestation certificate
    #[must_use]
    pub fn attestation_certificate(&self) -> &[u8] {
        &self.attestation_certificate
    }

    /// DER ECDSA signature over `message` with the device key
    #[must_use]
    pub fn sign_raw(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_der().as_bytes().to_vec()
    }

    /// DER ECDSA signature over `message` with the attestation key
    ///
    /// # Panics
    ///
    /// Panics if openssl fails to sign
    #[must_use]
    pub fn attest_raw(&self, message: &[u8]) -> Vec<u8> {
        let mut signer =
            OpensslSigner::new(MessageDigest::sha256(), &self.attestation_key).expect("signer");
        signer.update(message).expect("signer update");
        signer.sign_to_vec().expect("attestation signature")
    }

    /// Answer a registration challenge
    ///
    /// `app_id` is the application id the device signs over; `origin` is what
    /// the browser reports in the client data.
    ///
    /// # Panics
    ///
    /// Panics if the key handle does not fit the wire format
    #[must_use]
    pub fn register(&self, app_id: &str, challenge: &str, origin: &str) -> RegisterResponse {
        let client_data = client_data_json(TYPE_FINISH_ENROLLMENT, challenge, origin);
        let public_key = self.public_key_bytes();
        let signed =
            registration_signed_bytes(app_id, &client_data, &self.key_handle, &public_key);

        let message = RawRegistrationMessage {
            public_key,
            key_handle: self.key_handle.clone(),
            certificate: self.attestation_certificate.clone(),
            signature: self.attest_raw(&signed),
        };

        RegisterResponse {
            registration_data: encode_b64url(&message.to_bytes().expect("registration message")),
            client_data: encode_b64url(&client_data),
        }
    }

    /// Answer an authentication challenge with user presence asserted
    #[must_use]
    pub fn sign(&self, app_id: &str, challenge: &str, origin: &str, counter: u32) -> SignResponse {
        self.sign_with_flags(app_id, challenge, origin, FLAG_USER_PRESENT, counter)
    }

    /// Answer an authentication challenge with explicit envelope flags
    #[must_use]
    pub fn sign_with_flags(
        &self,
        app_id: &str,
        challenge: &str,
        origin: &str,
        flags: u8,
        counter: u32,
    ) -> SignResponse {
        let client_data = client_data_json(TYPE_GET_ASSERTION, challenge, origin);
        let signed = assertion_signed_bytes(app_id, flags, counter, &client_data);
        let envelope = RawSignatureData {
            flags,
            counter,
            signature: self.sign_raw(&signed),
        };

        SignResponse {
            key_handle: encode_b64url(&self.key_handle),
            signature_data: encode_b64url(&encode_signature_data(&envelope)),
            client_data: encode_b64url(&client_data),
        }
    }

    /// The registration an engine would store for this device, counter 0
    #[must_use]
    pub fn registration_record(&self, user_identity: &str) -> Registration {
        Registration {
            user_identity: user_identity.to_string(),
            key_handle: self.key_handle.clone(),
            public_key: self.public_key_bytes(),
            attestation_certificate: Some(self.attestation_certificate.clone()),
            counter: 0,
            created_at: Utc::now(),
            last_used: None,
        }
    }
}

fn client_data_json(typ: &str, challenge: &str, origin: &str) -> Vec<u8> {
    let client_data = ClientData {
        typ: typ.to_string(),
        challenge: challenge.to_string(),
        origin: origin.to_string(),
        cid_pubkey: None,
    };
    serde_json::to_vec(&client_data).expect("client data serializes")
}

fn self_signed_attestation() -> (PKey<Private>, Vec<u8>) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
    let key = PKey::from_ec_key(EcKey::generate(&group).expect("EC key")).expect("PKey");

    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("CN", "Soft U2F Attestation")
        .expect("CN entry");
    let name = name.build();

    let mut builder = X509Builder::new().expect("X509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(1)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("serial");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&key).expect("public key");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
        .expect("not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(365).expect("not after"))
        .expect("not after");
    builder
        .sign(&key, MessageDigest::sha256())
        .expect("self-sign");

    let der = builder.build().to_der().expect("certificate DER");
    (key, der)
}
