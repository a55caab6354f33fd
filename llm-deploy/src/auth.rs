//! Shared-secret gate for inbound jobs.

use subtle::ConstantTimeEq;

/// Compare the caller's secret with the configured one.
///
/// Exact byte equality: no trimming, no case folding. Runs in time
/// independent of where the first differing byte is.
pub fn verify_secret(supplied: &str, configured: &str) -> bool {
    if configured.is_empty() {
        return false;
    }
    bool::from(supplied.as_bytes().ct_eq(configured.as_bytes()))
}
