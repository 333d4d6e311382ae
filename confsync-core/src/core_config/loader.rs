/*
    loader.rs - Populate the registry for an account at startup

    Each stored dump is restored independently; a dump that fails to load
    leaves its variant unregistered instead of aborting the account. Any
    required variant without a dump starts out empty.
*/

use crate::core_config::errors::SyncResult;
use crate::core_config::object::ConfigObjectFactory;
use crate::core_config::registry::{guarded, ConfigRegistry};
use crate::core_config::variant::{ConfigKey, ConfigVariant};
use crate::core_store::dumps;
use rusqlite::Connection;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Load every config object for `public_key`, returning the variants
/// that were registered. Does nothing when the registry already holds
/// objects or no key material is available.
pub fn load_state(
    conn: &Connection,
    registry: &ConfigRegistry,
    factory: &dyn ConfigObjectFactory,
    public_key: &str,
    secret_key: Option<&[u8]>,
) -> SyncResult<Vec<ConfigVariant>> {
    let secret_key = match secret_key {
        Some(key) if !key.is_empty() => key,
        _ => {
            debug!(public_key, "No key material, skipping config load");
            return Ok(Vec::new());
        }
    };
    if !registry.is_empty()? {
        debug!(public_key, "Config state already loaded");
        return Ok(Vec::new());
    }

    let stored = dumps::fetch_all(conn, public_key)?;
    let mut seen = BTreeSet::new();
    let mut loaded = Vec::new();

    for dump in &stored {
        seen.insert(dump.variant);
        match guarded(dump.variant, "init", || {
            factory.init(dump.variant, secret_key, Some(&dump.data))
        }) {
            Ok(config) => {
                registry.register(ConfigKey::new(dump.variant, public_key), config)?;
                loaded.push(dump.variant);
            }
            Err(err) => {
                warn!(variant = %dump.variant, error = %err, "Unable to restore config dump, leaving variant unloaded");
            }
        }
    }

    for variant in ConfigVariant::REQUIRED.into_iter().filter(|v| !seen.contains(v)) {
        match guarded(variant, "init", || factory.init(variant, secret_key, None)) {
            Ok(config) => {
                registry.register(ConfigKey::new(variant, public_key), config)?;
                loaded.push(variant);
            }
            Err(err) => {
                warn!(%variant, error = %err, "Unable to create config");
            }
        }
    }

    loaded.sort_by_key(|variant| variant.ordering_key());
    info!(public_key, restored = stored.len(), loaded = loaded.len(), "Loaded config state");
    Ok(loaded)
}
