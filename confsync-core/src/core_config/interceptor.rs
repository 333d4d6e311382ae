/*
    interceptor.rs - Local writes that must reach config state

    Only a fixed set of settings and columns is synced. A synced write is
    turned into a LocalChange, applied through the variant's handler,
    dumped if needed, and (when the object now has something to push)
    followed by one deduplicated sync for the account.
*/

use crate::core_config::dump::create_dump;
use crate::core_config::errors::SyncResult;
use crate::core_config::handlers::{schedule_sync, LocalChange};
use crate::core_config::incoming::MergeTargets;
use crate::core_config::types::now_ms;
use crate::core_config::variant::ConfigVariant;
use crate::core_store::{dumps, WriteTransaction};
use tracing::{debug, trace};

/// Setting keys mirrored into the user profile config
pub const SYNCED_SETTINGS: &[&str] = &["checkForCommunityMessageRequests"];

const PROFILE_COLUMNS: &[&str] = &["name", "profilePictureUrl", "profileEncryptionKey"];
const CONTACT_COLUMNS: &[&str] = &["isApproved", "isBlocked", "didApproveMe"];
const THREAD_VISIBILITY_COLUMNS: &[&str] = &["shouldBeVisible", "pinnedPriority"];
const THREAD_READ_COLUMNS: &[&str] = &["markedAsUnread"];

/// A local database write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalMutation {
    /// A settings key changed
    Setting { key: String, value: Option<Vec<u8>> },
    /// A column changed on one row
    Column { table: SyncedTable, column: String, row_id: String, value: Option<Vec<u8>> },
}

/// Tables with synced columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncedTable {
    Profile,
    Contact,
    SessionThread,
}

impl LocalMutation {
    pub fn setting(key: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        LocalMutation::Setting { key: key.into(), value }
    }

    pub fn column(
        table: SyncedTable,
        column: impl Into<String>,
        row_id: impl Into<String>,
        value: Option<Vec<u8>>,
    ) -> Self {
        LocalMutation::Column { table, column: column.into(), row_id: row_id.into(), value }
    }

    /// The config entry this write maps to, or `None` when it is not synced.
    ///
    /// Rows belonging to the local account land in the user profile;
    /// everyone else's land in contacts.
    pub fn synced_target(&self, local_public_key: &str) -> Option<(ConfigVariant, LocalChange)> {
        match self {
            LocalMutation::Setting { key, value } => SYNCED_SETTINGS.contains(&key.as_str()).then(|| {
                (
                    ConfigVariant::UserProfile,
                    LocalChange { key: format!("setting.{}", key), value: value.clone() },
                )
            }),
            LocalMutation::Column { table, column, row_id, value } => {
                let own_row = row_id == local_public_key;
                let column = column.as_str();
                let (variant, key) = match table {
                    SyncedTable::Profile if PROFILE_COLUMNS.contains(&column) => {
                        if own_row {
                            (ConfigVariant::UserProfile, column.to_string())
                        } else {
                            (ConfigVariant::Contacts, format!("{}.{}", row_id, column))
                        }
                    }
                    SyncedTable::Contact if CONTACT_COLUMNS.contains(&column) && !own_row => {
                        (ConfigVariant::Contacts, format!("{}.{}", row_id, column))
                    }
                    SyncedTable::SessionThread if THREAD_VISIBILITY_COLUMNS.contains(&column) => {
                        if own_row {
                            (ConfigVariant::UserProfile, format!("noteToSelf.{}", column))
                        } else {
                            (ConfigVariant::Contacts, format!("{}.{}", row_id, column))
                        }
                    }
                    SyncedTable::SessionThread if THREAD_READ_COLUMNS.contains(&column) => {
                        (ConfigVariant::ConvoInfoVolatile, format!("{}.{}", row_id, column))
                    }
                    _ => return None,
                };
                Some((variant, LocalChange { key, value: value.clone() }))
            }
        }
    }
}

/// What a batch of local writes did to config state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptOutcome {
    /// At least one config object changed
    pub changed: bool,
    pub dumps_written: usize,
}

/// Route synced local writes into config state.
///
/// Objects are checkpointed against `tx` before they change, so rolling
/// the transaction back also undoes the in-memory edits.
pub fn intercept(
    tx: &mut WriteTransaction<'_>,
    targets: &MergeTargets<'_>,
    local_public_key: &str,
    mutations: &[LocalMutation],
) -> SyncResult<InterceptOutcome> {
    let mut outcome = InterceptOutcome::default();
    let mut needs_push = false;

    for mutation in mutations {
        let Some((variant, change)) = mutation.synced_target(local_public_key) else {
            trace!(?mutation, "Local write is not synced");
            continue;
        };

        let Some(handle) = targets.registry.get(variant, local_public_key)? else {
            debug!(%variant, "Config not loaded, ignoring local change");
            continue;
        };
        handle.checkpoint(tx)?;

        let (changed, dumped, pending) = handle.mutate(|config| -> SyncResult<(bool, bool, bool)> {
            let changed = targets.handlers.get(variant).apply_local(&mut *config, &change)?;
            let mut dumped = false;
            if changed {
                if let Some(dump) = create_dump(Some(&mut *config), variant, local_public_key, now_ms())? {
                    dumps::upsert(tx, &dump)?;
                    dumped = true;
                }
            }
            Ok((changed, dumped, config.needs_push()))
        })??;

        debug!(%variant, key = %change.key, changed, "Applied local config change");
        outcome.changed |= changed;
        outcome.dumps_written += usize::from(dumped);
        needs_push |= pending;
    }

    if needs_push {
        schedule_sync(tx, targets.scheduler, local_public_key);
    }
    Ok(outcome)
}
