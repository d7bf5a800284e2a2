//! Environment Snapshot
//!
//! Immutable, fingerprinted capture of the process environment plus CLI
//! variables, created once per top-level invocation and shared by reference.
//! Equal fingerprints imply behaviorally identical snapshots.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Frozen view of the environment for one invocation.
#[derive(Debug)]
pub struct EnvSnapshot {
    entries: BTreeMap<String, String>,
    fingerprint: [u8; 32],
}

impl EnvSnapshot {
    /// Capture the current process environment, applying CLI overrides.
    pub fn capture(overrides: &BTreeMap<String, String>) -> Self {
        let mut entries: BTreeMap<String, String> = std::env::vars().collect();
        for (k, v) in overrides {
            entries.insert(k.clone(), v.clone());
        }
        Self::from_entries(entries)
    }

    /// Build a snapshot from an explicit map. Deterministic; used by tests
    /// and by generated-code fixtures.
    pub fn from_map(entries: BTreeMap<String, String>) -> Self {
        Self::from_entries(entries)
    }

    fn from_entries(entries: BTreeMap<String, String>) -> Self {
        let fingerprint = fingerprint_of(&entries);
        Self { entries, fingerprint }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    /// All entries, sorted by key.
    pub fn get_all(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// Lowercase hex rendering, surfaced in plans.
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// SHA-256 over the sorted `KEY\0VALUE\n` byte stream.
fn fingerprint_of(entries: &BTreeMap<String, String>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for (key, value) in entries {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([b'\n']);
    }
    hasher.finalize().into()
}

/// Records the set of env keys actually referenced during an IR walk, so
/// generated code embeds only the keys that matter. `@env` reports here.
#[derive(Debug, Default)]
pub struct EnvUsage {
    keys: Mutex<BTreeSet<String>>,
}

impl EnvUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str) {
        self.keys
            .lock()
            .expect("env usage lock poisoned")
            .insert(key.to_string());
    }

    /// The recorded keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .expect("env usage lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, &str)]) -> EnvSnapshot {
        EnvSnapshot::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = snap(&[("A", "1"), ("B", "2")]);
        let b = snap(&[("B", "2"), ("A", "1")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint_hex(), b.fingerprint_hex());
    }

    #[test]
    fn test_fingerprint_sensitive_to_any_byte() {
        let base = snap(&[("A", "1")]);
        assert_ne!(base.fingerprint(), snap(&[("A", "2")]).fingerprint());
        assert_ne!(base.fingerprint(), snap(&[("B", "1")]).fingerprint());
        assert_ne!(base.fingerprint(), snap(&[("A", "1"), ("B", "")]).fingerprint());
    }

    #[test]
    fn test_key_value_boundary_is_unambiguous() {
        // "AB" => "C" must not collide with "A" => "BC".
        let a = snap(&[("AB", "C")]);
        let b = snap(&[("A", "BC")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_capture_applies_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("RUNFILE_TEST_OVERRIDE".to_string(), "yes".to_string());
        let snapshot = EnvSnapshot::capture(&overrides);
        assert_eq!(snapshot.get("RUNFILE_TEST_OVERRIDE"), Some("yes"));
    }

    #[test]
    fn test_fingerprint_hex_length() {
        assert_eq!(snap(&[]).fingerprint_hex().len(), 64);
    }

    #[test]
    fn test_env_usage_records_sorted_unique() {
        let usage = EnvUsage::new();
        usage.record("PATH");
        usage.record("HOME");
        usage.record("PATH");
        assert_eq!(usage.keys(), vec!["HOME".to_string(), "PATH".to_string()]);
    }
}
