//! Persistence contracts for pending challenges and device registrations
//!
//! The engine only talks to storage through these traits. Every method is a
//! single atomic operation against the backing store; in particular
//! [`ChallengeStore::take`] and [`RegistrationStore::compare_and_swap_counter`]
//! must not be implemented as a separate read followed by a write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::u2f::{Challenge, Purpose, Registration};

mod memory;
pub use memory::MemoryStore;

/// A store read or write failed. Retry policy belongs to the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store record corrupt: {0}")]
    Corrupt(String),
}

/// Pending challenges, keyed by `(user_identity, purpose)`
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Store a challenge, replacing any outstanding challenge with the same key
    ///
    /// # Errors
    /// Returns a `StoreError` if the write fails
    async fn put(&self, challenge: Challenge) -> Result<(), StoreError>;

    /// Read an outstanding challenge without consuming it
    ///
    /// # Errors
    /// Returns a `StoreError` if the read fails
    async fn get(
        &self,
        user_identity: &str,
        purpose: Purpose,
    ) -> Result<Option<Challenge>, StoreError>;

    /// Atomically read and delete an outstanding challenge
    ///
    /// # Errors
    /// Returns a `StoreError` if the operation fails
    async fn take(
        &self,
        user_identity: &str,
        purpose: Purpose,
    ) -> Result<Option<Challenge>, StoreError>;
}

/// Completed registrations, keyed by `(user_identity, key_handle)` and
/// queryable by `user_identity` alone
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Insert a registration unless one with the same key already exists.
    /// Returns `false` when the key was already taken.
    ///
    /// # Errors
    /// Returns a `StoreError` if the write fails
    async fn insert_if_absent(&self, registration: Registration) -> Result<bool, StoreError>;

    /// # Errors
    /// Returns a `StoreError` if the read fails
    async fn get(
        &self,
        user_identity: &str,
        key_handle: &[u8],
    ) -> Result<Option<Registration>, StoreError>;

    /// All registrations owned by a user identity, oldest first
    ///
    /// # Errors
    /// Returns a `StoreError` if the query fails
    async fn list_for_user(&self, user_identity: &str) -> Result<Vec<Registration>, StoreError>;

    /// Set the counter to `new` and stamp `used_at`, but only if the stored
    /// counter still equals `expected` and, when `first_use` is set, the
    /// registration has never been used. Returns `false` if the registration
    /// is gone or either condition no longer holds.
    ///
    /// # Errors
    /// Returns a `StoreError` if the operation fails
    async fn compare_and_swap_counter(
        &self,
        user_identity: &str,
        key_handle: &[u8],
        expected: u32,
        first_use: bool,
        new: u32,
        used_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
