//! U2F server-side verification
//!
//! This module implements the relying-party half of FIDO U2F (`U2F_V2`):
//! challenge issuance, registration and authentication response verification,
//! and signature counter tracking. Transport and persistence are left to the
//! caller through plain request/response records and the traits in
//! [`crate::store`].

mod assertion;
mod challenge;
mod errors;
mod registration;
mod service;
mod types;

pub mod codec;
pub mod crypto;

// Re-exports for public use
pub use assertion::AssertionVerifier;
pub use challenge::{consume_challenge, verify_client_data, ChallengeIssuer};
pub use errors::{DecodeError, IssueError, VerifyError};
pub use registration::RegistrationVerifier;
pub use service::AuthEngine;
pub use types::*;
