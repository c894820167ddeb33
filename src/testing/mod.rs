//! Testing utilities for the U2F engine
//!
//! Available to unit tests and, with the `testing` feature, to integration
//! tests.
//!
//! - [`authenticator`] - A software U2F device that produces real registration
//!   and sign responses
//! - [`fixtures`] - Shared application id and settings
//!
//! ## Usage
//!
//! ```ignore
//! use u2f_engine::testing::{fixtures, SoftAuthenticator};
//!
//! let device = SoftAuthenticator::new();
//! let response = device.register(fixtures::APP_ID, "challenge", fixtures::APP_ID);
//! assert!(!response.registration_data.is_empty());
//! ```

pub mod authenticator;
pub mod fixtures;

pub use authenticator::SoftAuthenticator;
