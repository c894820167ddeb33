//! Shared test data

use std::collections::BTreeSet;

use crate::settings::U2fSettings;

/// Application id used throughout the tests
pub const APP_ID: &str = "https://example.test";

/// A second origin the fixture settings do not trust
pub const UNTRUSTED_ORIGIN: &str = "https://evil.test";

/// Trusted facets matching [`APP_ID`]
#[must_use]
pub fn trusted_facets() -> BTreeSet<String> {
    BTreeSet::from([APP_ID.to_string()])
}

/// Engine settings for [`APP_ID`] with default policies
#[must_use]
pub fn settings() -> U2fSettings {
    U2fSettings::for_app_id(APP_ID)
}
