//! Credential Rotation
//!
//! Per-provider credential pools with a lock-free round-robin cursor.

use crate::config::provider::{API_BASE_PARAM, API_KEY_PARAM};
use crate::error::{GatewayError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round-robin cursor over a pool of fixed size
#[derive(Debug)]
pub struct KeyRotator {
    /// Provider this cursor belongs to
    provider: String,

    /// Next index to hand out, always `< size`
    cursor: AtomicUsize,

    /// Pool size the cursor wraps at
    size: usize,
}

impl KeyRotator {
    pub fn new(provider: impl Into<String>, size: usize) -> Self {
        Self {
            provider: provider.into(),
            cursor: AtomicUsize::new(0),
            size,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Claim the next slot index.
    pub fn next_index(&self) -> usize {
        if self.size <= 1 {
            return 0;
        }

        let size = self.size;
        // The closure never returns None, so the update cannot fail.
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1) % size)
            }) {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

/// One variable of a credential slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotVariable {
    /// Environment variable the secret is read from
    pub source: String,

    /// Upstream parameter the secret fills (e.g. `api_key`)
    pub param: String,
}

/// A named source of secret values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSlot {
    pub name: String,
    pub variables: Vec<SlotVariable>,
}

impl CredentialSlot {
    pub fn new(name: impl Into<String>, variables: Vec<SlotVariable>) -> Self {
        Self {
            name: name.into(),
            variables,
        }
    }

    /// A slot filling `api_key` from a single environment variable.
    pub fn api_key(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(
            name,
            vec![SlotVariable {
                source: source.into(),
                param: API_KEY_PARAM.to_string(),
            }],
        )
    }

    /// Read every variable from the environment.
    fn read(&self, provider: &str, defaults: &BTreeMap<String, String>) -> Result<Credential> {
        let mut params = BTreeMap::new();

        for variable in &self.variables {
            let value = std::env::var(&variable.source)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| GatewayError::CredentialUnavailable {
                    provider: provider.to_string(),
                    slot: self.name.clone(),
                    variable: variable.source.clone(),
                })?;
            params.insert(variable.param.clone(), value);
        }

        for (param, value) in defaults {
            params
                .entry(param.clone())
                .or_insert_with(|| value.clone());
        }

        Ok(Credential {
            provider: provider.to_string(),
            slot: self.name.clone(),
            params,
        })
    }
}

/// Ordered slots of one provider plus the cursor rotating through them
#[derive(Debug, Clone)]
pub struct CredentialPool {
    slots: Arc<[CredentialSlot]>,
    defaults: BTreeMap<String, String>,
    rotator: Arc<KeyRotator>,
}

impl CredentialPool {
    pub fn new(
        provider: &str,
        slots: Vec<CredentialSlot>,
        defaults: BTreeMap<String, String>,
    ) -> Self {
        let rotator = Arc::new(KeyRotator::new(provider, slots.len()));
        Self {
            slots: slots.into(),
            defaults,
            rotator,
        }
    }

    pub fn provider(&self) -> &str {
        self.rotator.provider()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[CredentialSlot] {
        &self.slots
    }

    /// Resolve the next slot in round-robin order.
    pub fn next(&self) -> Result<Credential> {
        let provider = self.rotator.provider();
        let slot = self
            .slots
            .get(self.rotator.next_index())
            .ok_or_else(|| GatewayError::CredentialUnavailable {
                provider: provider.to_string(),
                slot: "<none>".to_string(),
                variable: "<no slots configured>".to_string(),
            })?;
        slot.read(provider, &self.defaults)
    }

    /// Whether every slot currently resolves.
    pub fn all_available(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.read(self.provider(), &self.defaults).is_ok())
    }

    /// Keep `previous`'s cursor when the pool size is unchanged.
    pub(crate) fn inherit_cursor(&mut self, previous: &CredentialPool) {
        if previous.rotator.size() == self.rotator.size() {
            self.rotator = Arc::clone(&previous.rotator);
        }
    }

    #[cfg(test)]
    pub(crate) fn shares_cursor_with(&self, other: &CredentialPool) -> bool {
        Arc::ptr_eq(&self.rotator, &other.rotator)
    }
}

/// Secret values selected for one upstream attempt
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub provider: String,
    pub slot: String,
    params: BTreeMap<String, String>,
}

impl Credential {
    pub fn api_key(&self) -> Option<&str> {
        self.param(API_KEY_PARAM)
    }

    pub fn api_base(&self) -> Option<&str> {
        self.param(API_BASE_PARAM)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("slot", &self.slot)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread;

    #[test]
    fn test_rotator_visits_every_slot_once_per_cycle() {
        let rotator = KeyRotator::new("acme", 3);
        let first: Vec<_> = (0..3).map(|_| rotator.next_index()).collect();
        let second: Vec<_> = (0..3).map(|_| rotator.next_index()).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(second, vec![0, 1, 2]);
    }

    #[test]
    fn test_single_slot_never_rotates() {
        let rotator = KeyRotator::new("solo", 1);
        for _ in 0..5 {
            assert_eq!(rotator.next_index(), 0);
        }
    }

    #[test]
    fn test_concurrent_rotation_is_uniform() {
        let rotator = Arc::new(KeyRotator::new("acme", 4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rotator = Arc::clone(&rotator);
                thread::spawn(move || {
                    let mut counts = HashMap::new();
                    for _ in 0..1000 {
                        *counts.entry(rotator.next_index()).or_insert(0usize) += 1;
                    }
                    counts
                })
            })
            .collect();

        let mut totals: HashMap<usize, usize> = HashMap::new();
        for handle in handles {
            for (idx, count) in handle.join().unwrap() {
                *totals.entry(idx).or_default() += count;
            }
        }

        // 8000 claims over 4 slots: every slot gets exactly its share.
        assert_eq!(totals.len(), 4);
        for idx in 0..4 {
            assert_eq!(totals[&idx], 2000);
        }
    }

    #[test]
    fn test_pool_reads_environment_in_order() {
        std::env::set_var("KEYROT_TEST_A", "secret-a");
        std::env::set_var("KEYROT_TEST_B", "secret-b");
        let pool = CredentialPool::new(
            "acme",
            vec![
                CredentialSlot::api_key("slotA", "KEYROT_TEST_A"),
                CredentialSlot::api_key("slotB", "KEYROT_TEST_B"),
            ],
            BTreeMap::new(),
        );

        let c1 = pool.next().unwrap();
        let c2 = pool.next().unwrap();
        let c3 = pool.next().unwrap();
        assert_eq!((c1.slot.as_str(), c1.api_key()), ("slotA", Some("secret-a")));
        assert_eq!((c2.slot.as_str(), c2.api_key()), ("slotB", Some("secret-b")));
        assert_eq!(c3.slot, "slotA");
    }

    #[test]
    fn test_missing_variable_names_source() {
        std::env::remove_var("KEYROT_TEST_MISSING");
        let pool = CredentialPool::new(
            "acme",
            vec![CredentialSlot::api_key("key1", "KEYROT_TEST_MISSING")],
            BTreeMap::new(),
        );

        match pool.next() {
            Err(GatewayError::CredentialUnavailable {
                provider,
                slot,
                variable,
            }) => {
                assert_eq!(provider, "acme");
                assert_eq!(slot, "key1");
                assert_eq!(variable, "KEYROT_TEST_MISSING");
            }
            other => panic!("expected CredentialUnavailable, got {:?}", other),
        }
        assert!(!pool.all_available());
    }

    #[test]
    fn test_defaults_fill_missing_params() {
        std::env::set_var("KEYROT_TEST_AZURE", "azure-secret");
        let defaults: BTreeMap<_, _> = [
            ("api_version".to_string(), "2024-02-01".to_string()),
            (API_KEY_PARAM.to_string(), "never-used".to_string()),
        ]
        .into_iter()
        .collect();
        let pool = CredentialPool::new(
            "azure",
            vec![CredentialSlot::api_key("key1", "KEYROT_TEST_AZURE")],
            defaults,
        );

        let credential = pool.next().unwrap();
        assert_eq!(credential.api_key(), Some("azure-secret"));
        assert_eq!(credential.param("api_version"), Some("2024-02-01"));
    }

    #[test]
    fn test_cursor_inherited_only_when_size_matches() {
        let old = CredentialPool::new(
            "acme",
            vec![
                CredentialSlot::api_key("a", "X"),
                CredentialSlot::api_key("b", "Y"),
            ],
            BTreeMap::new(),
        );

        let mut same = CredentialPool::new(
            "acme",
            vec![
                CredentialSlot::api_key("a", "X"),
                CredentialSlot::api_key("b", "Y"),
            ],
            BTreeMap::new(),
        );
        same.inherit_cursor(&old);
        assert!(same.shares_cursor_with(&old));

        let mut grown = CredentialPool::new(
            "acme",
            vec![
                CredentialSlot::api_key("a", "X"),
                CredentialSlot::api_key("b", "Y"),
                CredentialSlot::api_key("c", "Z"),
            ],
            BTreeMap::new(),
        );
        grown.inherit_cursor(&old);
        assert!(!grown.shares_cursor_with(&old));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        std::env::set_var("KEYROT_TEST_REDACT", "top-secret-value");
        let pool = CredentialPool::new(
            "acme",
            vec![CredentialSlot::api_key("key1", "KEYROT_TEST_REDACT")],
            BTreeMap::new(),
        );
        let rendered = format!("{:?}", pool.next().unwrap());
        assert!(!rendered.contains("top-secret-value"));
        assert!(rendered.contains("key1"));
    }
}
