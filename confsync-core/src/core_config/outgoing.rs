/*
    outgoing.rs - Local changes headed for the swarm

    pending_changes asks every relevant config object whether it has
    unpushed state and packages what it gets back. Generating a push
    never clears needs_push; only marking_as_pushed (after the swarm
    stored the message) does, so an unsent push is simply regenerated.
*/

use crate::core_config::dump::create_dump;
use crate::core_config::errors::{SyncError, SyncResult};
use crate::core_config::handlers::IdentityProvider;
use crate::core_config::registry::{guarded, ConfigRegistry};
use crate::core_config::types::{now_ms, ConfigDump, OutgoingConfResult, SharedConfigMessage};
use crate::core_config::variant::ConfigVariant;
use crate::core_store::dumps;
use rusqlite::Connection;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Collect one outgoing message per variant with unpushed changes.
///
/// Fails with [`SyncError::UserDoesNotExist`] before the local account
/// exists.
pub fn pending_changes(
    conn: &Connection,
    registry: &ConfigRegistry,
    identity: &dyn IdentityProvider,
    public_key: &str,
) -> SyncResult<Vec<OutgoingConfResult>> {
    let local_key = identity.local_public_key().ok_or(SyncError::UserDoesNotExist)?;

    let mut variants: BTreeSet<ConfigVariant> = dumps::variants_for(conn, public_key)?;
    if local_key == public_key {
        variants.extend(ConfigVariant::REQUIRED);
    }

    let mut results = Vec::new();
    for variant in variants {
        let pushed = registry.mutate(variant, public_key, |config| {
            if !config.needs_push() {
                return Ok(None);
            }
            guarded(variant, "push", || config.push()).map(Some)
        })?;

        // Not loaded, or nothing to push
        let Some(push) = pushed.transpose()?.flatten() else {
            continue;
        };

        trace!(%variant, seq_no = push.seq_no, obsolete = push.obsolete_hashes.len(), "Generated config push");
        results.push(OutgoingConfResult {
            message: SharedConfigMessage::outgoing(variant, push.seq_no, push.payload),
            namespace: variant.namespace(),
            obsolete_hashes: push.obsolete_hashes,
        });
    }

    debug!(public_key, pending = results.len(), "Collected pending config changes");
    Ok(results)
}

/// Result of confirming one push against a loaded config
#[derive(Debug, Clone, PartialEq)]
pub struct PushConfirmation {
    /// The object accepted the confirmation
    pub applied: bool,
    /// Dump to persist, present when confirming changed the object's state
    pub dump: Option<ConfigDump>,
}

/// Record that the swarm stored `message` under `server_hash`.
///
/// Returns `None` when the variant is not loaded. Confirming the same
/// message twice is not applied again and yields no second dump.
pub fn marking_as_pushed(
    registry: &ConfigRegistry,
    message: &SharedConfigMessage,
    server_hash: &str,
    public_key: &str,
) -> SyncResult<Option<PushConfirmation>> {
    let variant = message.kind;
    let timestamp_ms = message.sent_timestamp_ms.unwrap_or_else(now_ms);

    let confirmation = registry.mutate(variant, public_key, |config| -> SyncResult<PushConfirmation> {
        let applied = guarded(variant, "confirm_pushed", || {
            Ok(config.confirm_pushed(message.seq_no, server_hash))
        })?;
        let dump = create_dump(Some(config), variant, public_key, timestamp_ms)?;
        Ok(PushConfirmation { applied, dump })
    })?;

    confirmation.transpose()
}
