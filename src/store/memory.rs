//! In-memory store for tests and single-process deployments

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{ChallengeStore, RegistrationStore, StoreError};
use crate::u2f::{Challenge, Purpose, Registration};

/// Satisfies both store contracts. Each method holds the relevant lock for
/// its whole read-modify-write, which is what makes `take` and
/// `compare_and_swap_counter` atomic.
#[derive(Default)]
pub struct MemoryStore {
    challenges: Mutex<HashMap<(String, Purpose), Challenge>>,
    // Per user, in insertion order
    registrations: Mutex<HashMap<String, Vec<Registration>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn put(&self, challenge: Challenge) -> Result<(), StoreError> {
        let key = (challenge.user_identity.clone(), challenge.purpose);
        self.challenges.lock().await.insert(key, challenge);
        Ok(())
    }

    async fn get(
        &self,
        user_identity: &str,
        purpose: Purpose,
    ) -> Result<Option<Challenge>, StoreError> {
        let guard = self.challenges.lock().await;
        Ok(guard.get(&(user_identity.to_string(), purpose)).cloned())
    }

    async fn take(
        &self,
        user_identity: &str,
        purpose: Purpose,
    ) -> Result<Option<Challenge>, StoreError> {
        let mut guard = self.challenges.lock().await;
        Ok(guard.remove(&(user_identity.to_string(), purpose)))
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn insert_if_absent(&self, registration: Registration) -> Result<bool, StoreError> {
        let mut guard = self.registrations.lock().await;
        let owned = guard
            .entry(registration.user_identity.clone())
            .or_default();
        if owned
            .iter()
            .any(|r| r.key_handle == registration.key_handle)
        {
            return Ok(false);
        }
        owned.push(registration);
        Ok(true)
    }

    async fn get(
        &self,
        user_identity: &str,
        key_handle: &[u8],
    ) -> Result<Option<Registration>, StoreError> {
        let guard = self.registrations.lock().await;
        Ok(guard.get(user_identity).and_then(|owned| {
            owned
                .iter()
                .find(|r| r.key_handle == key_handle)
                .cloned()
        }))
    }

    async fn list_for_user(&self, user_identity: &str) -> Result<Vec<Registration>, StoreError> {
        let guard = self.registrations.lock().await;
        Ok(guard.get(user_identity).cloned().unwrap_or_default())
    }

    async fn compare_and_swap_counter(
        &self,
        user_identity: &str,
        key_handle: &[u8],
        expected: u32,
        first_use: bool,
        new: u32,
        used_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut guard = self.registrations.lock().await;
        let Some(registration) = guard
            .get_mut(user_identity)
            .and_then(|owned| owned.iter_mut().find(|r| r.key_handle == key_handle))
        else {
            return Ok(false);
        };

        if registration.counter != expected || (first_use && registration.last_used.is_some()) {
            return Ok(false);
        }
        registration.counter = new;
        registration.last_used = Some(used_at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn challenge(user: &str, purpose: Purpose, nonce: u8) -> Challenge {
        Challenge {
            user_identity: user.to_string(),
            purpose,
            nonce: vec![nonce; 32],
            app_id: "https://example.test".to_string(),
            trusted_facets: BTreeSet::from(["https://example.test".to_string()]),
            created_at: Utc::now(),
        }
    }

    fn registration(user: &str, key_handle: &[u8]) -> Registration {
        Registration {
            user_identity: user.to_string(),
            key_handle: key_handle.to_vec(),
            public_key: vec![0x04; 65],
            attestation_certificate: None,
            counter: 0,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    #[tokio::test]
    async fn test_challenge_put_overwrites_and_take_consumes() {
        let store = MemoryStore::new();
        store.put(challenge("alice", Purpose::Registration, 1)).await.unwrap();
        store.put(challenge("alice", Purpose::Registration, 2)).await.unwrap();
        store.put(challenge("alice", Purpose::Authentication, 3)).await.unwrap();

        let current = ChallengeStore::get(&store, "alice", Purpose::Registration)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.nonce, vec![2; 32]);

        let taken = store.take("alice", Purpose::Registration).await.unwrap();
        assert_eq!(taken.unwrap().nonce, vec![2; 32]);
        assert!(store.take("alice", Purpose::Registration).await.unwrap().is_none());

        // Other purpose untouched
        assert!(store.take("alice", Purpose::Authentication).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_insert_if_absent_rejects_duplicate_key_handle() {
        let store = MemoryStore::new();
        assert!(store.insert_if_absent(registration("alice", b"kh1")).await.unwrap());
        assert!(!store.insert_if_absent(registration("alice", b"kh1")).await.unwrap());
        assert!(store.insert_if_absent(registration("alice", b"kh2")).await.unwrap());
        // Same key handle under another identity is a different key
        assert!(store.insert_if_absent(registration("bob", b"kh1")).await.unwrap());

        let listed = store.list_for_user("alice").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key_handle, b"kh1");
        assert!(store.list_for_user("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_swap_counter() {
        let store = MemoryStore::new();
        store.insert_if_absent(registration("alice", b"kh")).await.unwrap();
        let now = Utc::now();

        assert!(!store
            .compare_and_swap_counter("alice", b"kh", 3, false, 4, now)
            .await
            .unwrap());
        assert!(store
            .compare_and_swap_counter("alice", b"kh", 0, false, 4, now)
            .await
            .unwrap());
        assert!(!store
            .compare_and_swap_counter("alice", b"missing", 4, false, 5, now)
            .await
            .unwrap());

        let stored = RegistrationStore::get(&store, "alice", b"kh")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.counter, 4);
        assert_eq!(stored.last_used, Some(now));
    }

    #[tokio::test]
    async fn test_first_use_swap_requires_unused_registration() {
        let store = MemoryStore::new();
        store.insert_if_absent(registration("alice", b"kh")).await.unwrap();
        let now = Utc::now();

        assert!(store
            .compare_and_swap_counter("alice", b"kh", 0, true, 0, now)
            .await
            .unwrap());
        // Counter unchanged, but the registration is no longer unused
        assert!(!store
            .compare_and_swap_counter("alice", b"kh", 0, true, 0, now)
            .await
            .unwrap());
        assert!(store
            .compare_and_swap_counter("alice", b"kh", 0, false, 1, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_swaps_only_one_wins() {
        let store = Arc::new(MemoryStore::new());
        store.insert_if_absent(registration("alice", b"kh")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_swap_counter("alice", b"kh", 0, true, 0, Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_concurrent_swaps_only_one_wins() {
        let store = Arc::new(MemoryStore::new());
        store.insert_if_absent(registration("alice", b"kh")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_swap_counter("alice", b"kh", 0, false, 1, Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
