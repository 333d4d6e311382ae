/*
    CRDT subsystem - Reference config object implementation

    Provides a keyed last-writer-wins config object implementing the
    merge library contract, and the payload encryption it relies on.
*/

pub mod crypto;
pub mod lww_config;

pub use crypto::{Crypto, SecretKey, XChaChaCrypto};
pub use lww_config::{ConfigState, LwwConfig, LwwConfigFactory, DEFAULT_MAX_MESSAGE_SIZE};
