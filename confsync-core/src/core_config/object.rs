/*
    object.rs - Merge library seam

    The sync core never looks inside a config object. It drives the
    object through this trait and lets the implementation decide how
    payloads are encoded, how conflicts are resolved and what a dump
    contains.
*/

use crate::core_config::errors::SyncResult;
use crate::core_config::types::PushData;
use crate::core_config::variant::ConfigVariant;

/// An opaque, mutable configuration bound to one (variant, account) pair
pub trait ConfigObject: Send {
    fn variant(&self) -> ConfigVariant;

    /// True while local changes have not been confirmed as stored
    fn needs_push(&self) -> bool;

    /// True when in-memory state differs from the last dump
    fn needs_dump(&self) -> bool;

    /// Merge `(server_hash, payload)` pairs, returning the accepted hashes.
    ///
    /// Rejected messages are not an error; they are simply absent from the
    /// returned list.
    fn merge(&mut self, messages: &[(String, Vec<u8>)]) -> SyncResult<Vec<String>>;

    /// Serialize the pending generation for upload.
    ///
    /// Must not clear `needs_push`; only `confirm_pushed` does that. On
    /// error the object's state is unchanged.
    fn push(&mut self) -> SyncResult<PushData>;

    /// The swarm stored generation `seq_no` under `server_hash`.
    ///
    /// Returns false when the confirmation no longer applies (a newer
    /// local change superseded the push, or it was already confirmed).
    fn confirm_pushed(&mut self, seq_no: i64, server_hash: &str) -> bool;

    /// Serialize full state for local persistence and clear `needs_dump`
    fn dump(&mut self) -> SyncResult<Vec<u8>>;

    /// Hashes of the messages currently backing this config on the swarm
    fn current_hashes(&self) -> Vec<String>;

    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Set a value, returning true if anything changed
    fn set(&mut self, key: &str, value: Vec<u8>) -> bool;

    /// Remove a value, returning true if anything changed
    fn erase(&mut self, key: &str) -> bool;

    /// All live key/value pairs in key order
    fn entries(&self) -> Vec<(String, Vec<u8>)>;

    /// Independent copy of the full in-memory state, flags included
    fn snapshot(&self) -> Box<dyn ConfigObject>;
}

/// Builds config objects from an account secret and an optional dump
pub trait ConfigObjectFactory: Send + Sync {
    fn init(
        &self,
        variant: ConfigVariant,
        secret_key: &[u8],
        dump: Option<&[u8]>,
    ) -> SyncResult<Box<dyn ConfigObject>>;
}
