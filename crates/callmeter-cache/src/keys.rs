//! Redis key and channel builders
//!
//! # Key Patterns
//!
//! - `tenant_profile:{org_id}` - Cached billing profile for an organization
//! - `kill_switch:{org_id}` - Pub/sub channel carrying terminate commands
//!
//! # Example
//!
//! ```
//! use callmeter_cache::keys;
//!
//! assert_eq!(keys::tenant_profile_key("org-1"), "tenant_profile:org-1");
//! assert_eq!(keys::kill_switch_channel("org-1"), "kill_switch:org-1");
//! ```

/// Prefix for cached tenant billing profiles
///
/// Format: `tenant_profile:{org_id}`
pub const TENANT_PROFILE_PREFIX: &str = "tenant_profile";

/// Prefix for kill-switch pub/sub channels
///
/// Format: `kill_switch:{org_id}`
pub const KILL_SWITCH_PREFIX: &str = "kill_switch";

/// Default TTL for cached tenant profiles (30 seconds)
pub const TENANT_PROFILE_TTL_SECS: u64 = 30;

/// Build the cache key for an organization's billing profile
#[inline]
pub fn tenant_profile_key(org_id: &str) -> String {
    format!("{}:{}", TENANT_PROFILE_PREFIX, org_id)
}

/// Build the channel kill signals for an organization are published on
#[inline]
pub fn kill_switch_channel(org_id: &str) -> String {
    format!("{}:{}", KILL_SWITCH_PREFIX, org_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        assert_eq!(tenant_profile_key("acme"), "tenant_profile:acme");
        assert_eq!(kill_switch_channel("acme"), "kill_switch:acme");
    }

    #[test]
    fn test_prefixes_are_distinct() {
        assert_ne!(TENANT_PROFILE_PREFIX, KILL_SWITCH_PREFIX);
    }
}
