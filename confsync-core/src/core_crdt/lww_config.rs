/*
    lww_config.rs - Reference config object

    A keyed last-writer-wins config that follows the generation state
    machine the sync core expects:

    Clean ──set──▶ Dirty ──push──▶ Waiting ──confirm_pushed──▶ Clean
                     ▲                │
                     └─────set────────┘

    - Every transition out of Clean retires the current server hash
      into the obsolete set.
    - Entries remember the generation (seqno) that wrote them. Merging
      takes the higher generation per key, ties broken by value.
    - A remote generation that already contains everything we have is
      adopted as-is (Clean, its hash becomes current).
    - A remote generation missing some of our state produces a new
      merged generation (seqno = max + 1) that must be pushed.
    - Messages older than the current generation are rejected and their
      hashes retired.
*/

use crate::core_config::errors::{SyncError, SyncResult};
use crate::core_config::object::{ConfigObject, ConfigObjectFactory};
use crate::core_config::types::PushData;
use crate::core_config::variant::ConfigVariant;
use crate::core_crdt::crypto::{Crypto, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest encrypted payload the swarm accepts for a config message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 76_800;

/// Generation state of a config object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigState {
    /// Matches what is stored on the swarm
    Clean,
    /// Local changes not yet pushed
    Dirty,
    /// Pushed, waiting for the swarm to confirm
    Waiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    /// `None` is a tombstone
    value: Option<Vec<u8>>,
    seq_no: i64,
}

impl Entry {
    fn wins_over(&self, other: &Entry) -> bool {
        (self.seq_no, &self.value) > (other.seq_no, &other.value)
    }
}

/// Plaintext of a pushed generation
#[derive(Debug, Serialize, Deserialize)]
struct ConfigMessage {
    variant: ConfigVariant,
    seq_no: i64,
    entries: BTreeMap<String, Entry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DumpedState {
    state: ConfigState,
    seq_no: i64,
    entries: BTreeMap<String, Entry>,
    current_hash: Option<String>,
    obsolete_hashes: BTreeSet<String>,
}

fn merge_entries(
    ours: &BTreeMap<String, Entry>,
    theirs: &BTreeMap<String, Entry>,
) -> BTreeMap<String, Entry> {
    let mut merged = ours.clone();
    for (key, entry) in theirs {
        match merged.get(key) {
            Some(existing) if !entry.wins_over(existing) => {}
            _ => {
                merged.insert(key.clone(), entry.clone());
            }
        }
    }
    merged
}

/// Keyed last-writer-wins config object
#[derive(Clone)]
pub struct LwwConfig {
    variant: ConfigVariant,
    key: SecretKey,
    crypto: Arc<dyn Crypto>,
    max_message_size: usize,

    state: ConfigState,
    seq_no: i64,
    entries: BTreeMap<String, Entry>,
    current_hash: Option<String>,
    obsolete_hashes: BTreeSet<String>,
    /// Obsolete hashes handed out by the last push
    in_flight_obsolete: Vec<String>,
    needs_dump: bool,
}

impl LwwConfig {
    /// Create an empty config
    pub fn new(variant: ConfigVariant, key: SecretKey, crypto: Arc<dyn Crypto>) -> Self {
        LwwConfig {
            variant,
            key,
            crypto,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            state: ConfigState::Clean,
            seq_no: 0,
            entries: BTreeMap::new(),
            current_hash: None,
            obsolete_hashes: BTreeSet::new(),
            in_flight_obsolete: Vec::new(),
            needs_dump: false,
        }
    }

    /// Restore a config from a previous `dump()`
    pub fn from_dump(
        variant: ConfigVariant,
        key: SecretKey,
        crypto: Arc<dyn Crypto>,
        dump: &[u8],
    ) -> SyncResult<Self> {
        let dumped: DumpedState = bincode::deserialize(dump)
            .map_err(|e| SyncError::library(variant, "init", format!("Unable to parse dump: {}", e)))?;

        let mut config = Self::new(variant, key, crypto);
        config.state = dumped.state;
        config.seq_no = dumped.seq_no;
        config.entries = dumped.entries;
        config.current_hash = dumped.current_hash;
        config.obsolete_hashes = dumped.obsolete_hashes;

        // A dirty dump may already have been sent before we were killed;
        // skip its seqno rather than risk reusing it with other content.
        if config.state == ConfigState::Dirty {
            config.seq_no += 1;
        }
        Ok(config)
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn state(&self) -> ConfigState {
        self.state
    }

    pub fn seq_no(&self) -> i64 {
        self.seq_no
    }

    pub fn obsolete_hashes(&self) -> Vec<String> {
        self.obsolete_hashes.iter().cloned().collect()
    }

    fn set_state(&mut self, state: ConfigState) {
        if self.state == ConfigState::Clean {
            if let Some(hash) = self.current_hash.take() {
                self.obsolete_hashes.insert(hash);
            }
        }
        self.state = state;
        self.needs_dump = true;
    }

    fn dirty(&mut self) {
        if self.state != ConfigState::Dirty {
            self.set_state(ConfigState::Dirty);
            self.seq_no += 1;
        }
    }

    fn write(&mut self, key: &str, value: Option<Vec<u8>>) {
        self.dirty();
        let seq_no = self.seq_no;
        self.entries.insert(key.to_string(), Entry { value, seq_no });
    }

    fn decode(&self, payload: &[u8]) -> SyncResult<ConfigMessage> {
        let plaintext = self.crypto.decrypt(&self.key, self.variant.encryption_domain(), payload)?;
        let message: ConfigMessage = bincode::deserialize(&plaintext)?;
        if message.variant != self.variant {
            return Err(SyncError::InvalidVariant(message.variant.to_string()));
        }
        Ok(message)
    }

    /// Apply one decoded message, returning whether it was accepted
    fn merge_one(&mut self, hash: &str, message: ConfigMessage) -> bool {
        if self.current_hash.as_deref() == Some(hash) {
            return true;
        }

        if message.seq_no < self.seq_no {
            debug!(variant = %self.variant, seq_no = message.seq_no, current = self.seq_no,
                "Rejecting stale config message");
            self.obsolete_hashes.insert(hash.to_string());
            self.needs_dump = true;
            return false;
        }

        let merged = merge_entries(&self.entries, &message.entries);

        if message.seq_no == self.seq_no && message.entries == self.entries {
            // Same generation stored twice under different hashes: keep the
            // greater hash so every replica retires the same copy.
            match self.state {
                ConfigState::Clean => match &self.current_hash {
                    Some(current) if current.as_str() >= hash => {
                        self.obsolete_hashes.insert(hash.to_string());
                    }
                    _ => {
                        if let Some(previous) = self.current_hash.replace(hash.to_string()) {
                            self.obsolete_hashes.insert(previous);
                        }
                    }
                },
                ConfigState::Dirty | ConfigState::Waiting => {
                    self.state = ConfigState::Clean;
                    self.current_hash = Some(hash.to_string());
                }
            }
            self.needs_dump = true;
            return true;
        }

        if merged == message.entries {
            // Remote generation already contains all of our state
            if self.state == ConfigState::Clean {
                if let Some(previous) = self.current_hash.take() {
                    self.obsolete_hashes.insert(previous);
                }
            }
            self.entries = merged;
            self.seq_no = message.seq_no;
            self.state = ConfigState::Clean;
            self.current_hash = Some(hash.to_string());
            self.needs_dump = true;
        } else {
            // Conflict: publish a merged generation superseding both sides
            let seq_no = self.seq_no.max(message.seq_no) + 1;
            self.set_state(ConfigState::Dirty);
            self.obsolete_hashes.insert(hash.to_string());
            self.entries = merged;
            self.seq_no = seq_no;
        }
        true
    }
}

impl ConfigObject for LwwConfig {
    fn variant(&self) -> ConfigVariant {
        self.variant
    }

    fn needs_push(&self) -> bool {
        self.state != ConfigState::Clean
    }

    fn needs_dump(&self) -> bool {
        self.needs_dump
    }

    fn merge(&mut self, messages: &[(String, Vec<u8>)]) -> SyncResult<Vec<String>> {
        let mut accepted = Vec::new();

        for (index, (hash, payload)) in messages.iter().enumerate() {
            let message = match self.decode(payload) {
                Ok(message) => message,
                Err(err) => {
                    warn!(variant = %self.variant, index, error = %err, "Skipping unreadable config message");
                    continue;
                }
            };

            if self.merge_one(hash, message) {
                accepted.push(hash.clone());
            }
        }

        debug!(variant = %self.variant, accepted = accepted.len(), received = messages.len(),
            "Merged config messages");
        Ok(accepted)
    }

    fn push(&mut self) -> SyncResult<PushData> {
        let message = ConfigMessage {
            variant: self.variant,
            seq_no: self.seq_no,
            entries: self.entries.clone(),
        };
        let plaintext = bincode::serialize(&message)?;
        let payload =
            self.crypto.encrypt(&self.key, self.variant.encryption_domain(), &plaintext)?;

        if payload.len() > self.max_message_size {
            return Err(SyncError::library(self.variant, "push", "Config data is too large"));
        }

        if self.state == ConfigState::Dirty {
            self.set_state(ConfigState::Waiting);
        }

        self.in_flight_obsolete = self.obsolete_hashes.iter().cloned().collect();
        Ok(PushData {
            payload,
            seq_no: self.seq_no,
            obsolete_hashes: self.in_flight_obsolete.clone(),
        })
    }

    fn confirm_pushed(&mut self, seq_no: i64, server_hash: &str) -> bool {
        // A newer local change after the push makes this confirmation moot
        if self.state != ConfigState::Waiting || seq_no != self.seq_no {
            return false;
        }
        self.set_state(ConfigState::Clean);
        self.current_hash = Some(server_hash.to_string());
        for hash in self.in_flight_obsolete.drain(..) {
            self.obsolete_hashes.remove(&hash);
        }
        true
    }

    fn dump(&mut self) -> SyncResult<Vec<u8>> {
        let dumped = DumpedState {
            state: self.state,
            seq_no: self.seq_no,
            entries: self.entries.clone(),
            current_hash: self.current_hash.clone(),
            obsolete_hashes: self.obsolete_hashes.clone(),
        };
        let data = bincode::serialize(&dumped)?;
        self.needs_dump = false;
        Ok(data)
    }

    fn current_hashes(&self) -> Vec<String> {
        self.current_hash.iter().cloned().collect()
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).and_then(|entry| entry.value.clone())
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> bool {
        if self.get(key).as_ref() == Some(&value) {
            return false;
        }
        self.write(key, Some(value));
        true
    }

    fn erase(&mut self, key: &str) -> bool {
        if self.get(key).is_none() {
            return false;
        }
        self.write(key, None);
        true
    }

    fn entries(&self) -> Vec<(String, Vec<u8>)> {
        self.entries
            .iter()
            .filter_map(|(key, entry)| entry.value.clone().map(|value| (key.clone(), value)))
            .collect()
    }

    fn snapshot(&self) -> Box<dyn ConfigObject> {
        Box::new(self.clone())
    }
}

/// Builds `LwwConfig` objects for the registry
#[derive(Clone)]
pub struct LwwConfigFactory {
    crypto: Arc<dyn Crypto>,
    max_message_size: usize,
}

impl LwwConfigFactory {
    pub fn new(crypto: Arc<dyn Crypto>) -> Self {
        LwwConfigFactory { crypto, max_message_size: DEFAULT_MAX_MESSAGE_SIZE }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

impl ConfigObjectFactory for LwwConfigFactory {
    fn init(
        &self,
        variant: ConfigVariant,
        secret_key: &[u8],
        dump: Option<&[u8]>,
    ) -> SyncResult<Box<dyn ConfigObject>> {
        let key = SecretKey::from_bytes(secret_key)?;
        let config = match dump {
            Some(dump) => LwwConfig::from_dump(variant, key, self.crypto.clone(), dump)?,
            None => LwwConfig::new(variant, key, self.crypto.clone()),
        };
        Ok(Box::new(config.with_max_message_size(self.max_message_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crdt::crypto::XChaChaCrypto;

    fn config() -> LwwConfig {
        LwwConfig::new(
            ConfigVariant::Contacts,
            SecretKey::from_bytes(&[3u8; 32]).unwrap(),
            Arc::new(XChaChaCrypto),
        )
    }

    /// Push and confirm under `hash`, returning the pushed payload
    fn publish(config: &mut LwwConfig, hash: &str) -> Vec<u8> {
        let push = config.push().unwrap();
        config.confirm_pushed(push.seq_no, hash);
        push.payload
    }

    #[test]
    fn test_fresh_config_is_clean() {
        let config = config();
        assert!(!config.needs_push());
        assert!(!config.needs_dump());
        assert!(config.current_hashes().is_empty());
        assert_eq!(config.seq_no(), 0);
    }

    #[test]
    fn test_set_marks_dirty_once_per_generation() {
        let mut config = config();
        assert!(config.set("a", b"1".to_vec()));
        assert!(config.set("b", b"2".to_vec()));
        assert!(!config.set("b", b"2".to_vec()));

        assert_eq!(config.state(), ConfigState::Dirty);
        assert_eq!(config.seq_no(), 1);
        assert!(config.needs_push());
        assert!(config.needs_dump());
    }

    #[test]
    fn test_push_keeps_needs_push_until_confirmed() {
        let mut config = config();
        config.set("a", b"1".to_vec());

        let push = config.push().unwrap();
        assert_eq!(push.seq_no, 1);
        assert_eq!(config.state(), ConfigState::Waiting);
        assert!(config.needs_push());

        assert!(config.confirm_pushed(push.seq_no, "hash-1"));
        assert!(!config.needs_push());
        assert_eq!(config.current_hashes(), vec!["hash-1".to_string()]);
        assert!(!config.confirm_pushed(push.seq_no, "hash-1"));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut config = config();
        config.set("a", b"1".to_vec());
        let snapshot = config.snapshot();

        config.set("a", b"2".to_vec());
        config.push().unwrap();

        assert_eq!(snapshot.get("a"), Some(b"1".to_vec()));
        assert!(snapshot.needs_dump());
        assert_eq!(config.get("a"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_confirm_for_superseded_generation_is_ignored() {
        let mut config = config();
        config.set("a", b"1".to_vec());
        let push = config.push().unwrap();

        config.set("a", b"2".to_vec());
        assert!(!config.confirm_pushed(push.seq_no, "hash-1"));

        assert_eq!(config.state(), ConfigState::Dirty);
        assert_eq!(config.seq_no(), 2);
        assert!(config.current_hashes().is_empty());
    }

    #[test]
    fn test_new_generation_obsoletes_previous_hash() {
        let mut config = config();
        config.set("a", b"1".to_vec());
        publish(&mut config, "hash-1");

        config.set("a", b"2".to_vec());
        let push = config.push().unwrap();
        assert_eq!(push.obsolete_hashes, vec!["hash-1".to_string()]);

        config.confirm_pushed(push.seq_no, "hash-2");
        assert!(config.obsolete_hashes().is_empty());
    }

    #[test]
    fn test_oversized_push_leaves_state_untouched() {
        let mut config = config().with_max_message_size(16);
        config.set("a", vec![0u8; 64]);

        let err = config.push().unwrap_err();
        assert!(matches!(err, SyncError::Library { operation: "push", .. }));
        assert_eq!(config.state(), ConfigState::Dirty);
        assert!(config.needs_push());
    }

    #[test]
    fn test_merge_adopts_newer_generation() {
        let mut remote = config();
        remote.set("name", b"Alice".to_vec());
        let payload = publish(&mut remote, "h1");

        let mut local = config();
        let accepted = local.merge(&[("h1".to_string(), payload)]).unwrap();

        assert_eq!(accepted, vec!["h1".to_string()]);
        assert_eq!(local.get("name"), Some(b"Alice".to_vec()));
        assert_eq!(local.current_hashes(), vec!["h1".to_string()]);
        assert!(!local.needs_push());
        assert!(local.needs_dump());
    }

    #[test]
    fn test_merge_rejects_stale_and_retires_its_hash() {
        let mut remote = config();
        remote.set("v", b"1".to_vec());
        let old = publish(&mut remote, "h1");
        remote.set("v", b"2".to_vec());
        let new = publish(&mut remote, "h2");

        let mut local = config();
        local.merge(&[("h2".to_string(), new)]).unwrap();
        let accepted = local.merge(&[("h1".to_string(), old)]).unwrap();

        assert!(accepted.is_empty());
        assert_eq!(local.get("v"), Some(b"2".to_vec()));
        assert!(local.obsolete_hashes().contains(&"h1".to_string()));
    }

    #[test]
    fn test_merge_skips_undecryptable_payload() {
        let mut local = config();
        let accepted = local.merge(&[("junk".to_string(), vec![1, 2, 3])]).unwrap();
        assert!(accepted.is_empty());
        assert!(!local.needs_dump());
        assert!(local.obsolete_hashes().is_empty());
    }

    #[test]
    fn test_concurrent_edits_converge() {
        let mut base = config();
        base.set("shared", b"0".to_vec());
        let base_payload = publish(&mut base, "h0");

        let mut a = config();
        let mut b = config();
        a.merge(&[("h0".to_string(), base_payload.clone())]).unwrap();
        b.merge(&[("h0".to_string(), base_payload)]).unwrap();

        a.set("from_a", b"A".to_vec());
        b.set("from_b", b"B".to_vec());
        let a_payload = publish(&mut a, "ha");
        let b_payload = publish(&mut b, "hb");

        a.merge(&[("hb".to_string(), b_payload)]).unwrap();
        b.merge(&[("ha".to_string(), a_payload)]).unwrap();

        // Both produced the same merged generation that now needs pushing
        assert!(a.needs_push() && b.needs_push());
        assert_eq!(a.seq_no(), b.seq_no());
        assert_eq!(a.entries(), b.entries());
        assert_eq!(a.get("from_a"), Some(b"A".to_vec()));
        assert_eq!(a.get("from_b"), Some(b"B".to_vec()));

        let a2 = publish(&mut a, "ha2");
        let b2 = publish(&mut b, "hb2");
        a.merge(&[("hb2".to_string(), b2)]).unwrap();
        b.merge(&[("ha2".to_string(), a2)]).unwrap();

        // Identical generations: both keep the greater hash
        assert_eq!(a.current_hashes(), vec!["hb2".to_string()]);
        assert_eq!(b.current_hashes(), vec!["hb2".to_string()]);
        assert!(!a.needs_push() && !b.needs_push());
    }

    #[test]
    fn test_erase_propagates_as_tombstone() {
        let mut remote = config();
        remote.set("k", b"v".to_vec());
        let first = publish(&mut remote, "h1");
        remote.erase("k");
        let second = publish(&mut remote, "h2");

        let mut local = config();
        local.merge(&[("h1".to_string(), first), ("h2".to_string(), second)]).unwrap();
        assert_eq!(local.get("k"), None);
        assert!(local.entries().is_empty());
    }

    #[test]
    fn test_dump_round_trip_clears_needs_dump() {
        let mut config = config();
        config.set("a", b"1".to_vec());
        publish(&mut config, "h1");
        let dump = config.dump().unwrap();
        assert!(!config.needs_dump());

        let restored = LwwConfig::from_dump(
            ConfigVariant::Contacts,
            SecretKey::from_bytes(&[3u8; 32]).unwrap(),
            Arc::new(XChaChaCrypto),
            &dump,
        )
        .unwrap();
        assert_eq!(restored.get("a"), Some(b"1".to_vec()));
        assert_eq!(restored.current_hashes(), vec!["h1".to_string()]);
        assert_eq!(restored.state(), ConfigState::Clean);
    }

    #[test]
    fn test_dirty_dump_skips_a_seqno_on_load() {
        let mut config = config();
        config.set("a", b"1".to_vec());
        let dump = config.dump().unwrap();

        let restored = LwwConfig::from_dump(
            ConfigVariant::Contacts,
            SecretKey::from_bytes(&[3u8; 32]).unwrap(),
            Arc::new(XChaChaCrypto),
            &dump,
        )
        .unwrap();
        assert_eq!(restored.seq_no(), 2);
        assert!(restored.needs_push());
    }

    #[test]
    fn test_corrupt_dump_is_library_error() {
        let result = LwwConfigFactory::new(Arc::new(XChaChaCrypto)).init(
            ConfigVariant::UserGroups,
            &[1u8; 32],
            Some(&[0xff, 0x00, 0x13]),
        );
        assert!(matches!(result, Err(SyncError::Library { operation: "init", .. })));
    }
}
