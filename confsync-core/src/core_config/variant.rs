/*
    variant.rs - Config variants

    Each account owns one config object per variant. The variant decides:
    - the order merged groups are applied in
    - the swarm namespace the config is stored under
    - the encryption domain used to derive the payload key
*/

use crate::core_config::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical configuration kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigVariant {
    UserProfile,
    Contacts,
    ConvoInfoVolatile,
    UserGroups,
}

/// Swarm namespace a config variant is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub i32);

impl ConfigVariant {
    /// Every variant a local account must have loaded
    pub const REQUIRED: [ConfigVariant; 4] = [
        ConfigVariant::UserProfile,
        ConfigVariant::Contacts,
        ConfigVariant::ConvoInfoVolatile,
        ConfigVariant::UserGroups,
    ];

    /// Merge order when several variants change in one batch.
    ///
    /// Profile/contacts first, then groups, then the volatile conversation
    /// info which may reference names from the earlier ones.
    pub fn processing_order(&self) -> u8 {
        match self {
            ConfigVariant::UserProfile | ConfigVariant::Contacts => 0,
            ConfigVariant::UserGroups => 1,
            ConfigVariant::ConvoInfoVolatile => 2,
        }
    }

    pub fn namespace(&self) -> Namespace {
        match self {
            ConfigVariant::UserProfile => Namespace(2),
            ConfigVariant::Contacts => Namespace(3),
            ConfigVariant::ConvoInfoVolatile => Namespace(4),
            ConfigVariant::UserGroups => Namespace(5),
        }
    }

    /// Domain string mixed into the payload encryption key
    pub fn encryption_domain(&self) -> &'static str {
        match self {
            ConfigVariant::UserProfile => "UserProfile",
            ConfigVariant::Contacts => "Contacts",
            ConfigVariant::ConvoInfoVolatile => "ConvoInfoVolatile",
            ConfigVariant::UserGroups => "UserGroups",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigVariant::UserProfile => "userProfile",
            ConfigVariant::Contacts => "contacts",
            ConfigVariant::ConvoInfoVolatile => "convoInfoVolatile",
            ConfigVariant::UserGroups => "userGroups",
        }
    }

    /// Sort key giving a total, deterministic processing order
    pub(crate) fn ordering_key(&self) -> (u8, ConfigVariant) {
        (self.processing_order(), *self)
    }
}

impl fmt::Display for ConfigVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigVariant {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "userProfile" => Ok(ConfigVariant::UserProfile),
            "contacts" => Ok(ConfigVariant::Contacts),
            "convoInfoVolatile" => Ok(ConfigVariant::ConvoInfoVolatile),
            "userGroups" => Ok(ConfigVariant::UserGroups),
            other => Err(SyncError::InvalidVariant(other.to_string())),
        }
    }
}

/// Registry key: one config object per (variant, account)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    pub variant: ConfigVariant,
    pub public_key: String,
}

impl ConfigKey {
    pub fn new(variant: ConfigVariant, public_key: impl Into<String>) -> Self {
        ConfigKey { variant, public_key: public_key.into() }
    }
}
