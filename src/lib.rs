#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the u2f-engine crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod settings;
pub mod store;
pub mod u2f;
pub mod utils;

// Software authenticator and fixtures for unit and integration tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use settings::{AttestationPolicy, ConfigError, CounterPolicy, U2fSettings};
pub use store::{ChallengeStore, MemoryStore, RegistrationStore, StoreError};
pub use u2f::{
    AuthEngine, DecodeError, IssueError, RegisterRequest, RegisterResponse, Registration,
    RegistrationSummary, SignRequest, SignResponse, VerifyError,
};
