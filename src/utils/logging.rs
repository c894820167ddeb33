// Centralized audit logging for U2F flows
use log::{info, warn};

use crate::u2f::codec::encode_b64url;

/// Characters of the base64url key handle shown in log lines
const KEY_HANDLE_LOG_PREFIX: usize = 12;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Short, non-sensitive rendering of a key handle for log lines
    #[must_use]
    pub fn key_handle_tag(key_handle: &[u8]) -> String {
        let encoded = encode_b64url(key_handle);
        match encoded.char_indices().nth(KEY_HANDLE_LOG_PREFIX) {
            Some((idx, _)) => format!("{}…", &encoded[..idx]),
            None => encoded,
        }
    }

    /// Log a new device registration
    pub fn log_registration_stored(user_identity: &str, key_handle: &[u8]) {
        info!(
            "🔐 Registered U2F device {} for {:?}",
            Self::key_handle_tag(key_handle),
            user_identity
        );
    }

    /// Log a successful authentication and the counter it advanced to
    pub fn log_authentication_succeeded(user_identity: &str, key_handle: &[u8], counter: u32) {
        info!(
            "✅ U2F authentication for {:?} with device {} (counter {})",
            user_identity,
            Self::key_handle_tag(key_handle),
            counter
        );
    }

    /// Audit a counter that failed to advance: probable cloned authenticator
    pub fn log_counter_replay(user_identity: &str, key_handle: &[u8], stored: u32, received: u32) {
        warn!(
            "🚨 U2F counter replay for {:?} with device {}: received {} but stored {}; possible cloned authenticator",
            user_identity,
            Self::key_handle_tag(key_handle),
            received,
            stored
        );
    }

    /// Audit a response whose origin is not a trusted facet
    pub fn log_untrusted_facet(user_identity: &str, origin: &str) {
        warn!("🚨 U2F response for {user_identity:?} from untrusted origin {origin:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_handle_tag_is_truncated() {
        let tag = LoggingHelper::key_handle_tag(&[0xAB; 64]);
        assert_eq!(tag.chars().count(), KEY_HANDLE_LOG_PREFIX + 1);
        assert!(tag.ends_with('…'));

        assert_eq!(LoggingHelper::key_handle_tag(b"ab"), "YWI");
    }
}
