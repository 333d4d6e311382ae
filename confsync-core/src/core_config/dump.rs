//! Persistence dump builder
//!
//! Turns a config object into a [`ConfigDump`] only when it reports
//! unsaved state. Nothing here touches the database; callers decide when
//! the dump is written.

use crate::core_config::errors::{SyncError, SyncResult};
use crate::core_config::object::ConfigObject;
use crate::core_config::registry::guarded;
use crate::core_config::types::ConfigDump;
use crate::core_config::variant::ConfigVariant;
use tracing::trace;

/// Build a dump for `config` if it needs one.
///
/// Fails with [`SyncError::NilConfigObject`] when no object is given.
pub fn create_dump<C: ConfigObject + ?Sized>(
    config: Option<&mut C>,
    variant: ConfigVariant,
    public_key: &str,
    timestamp_ms: i64,
) -> SyncResult<Option<ConfigDump>> {
    let config = config.ok_or(SyncError::NilConfigObject)?;
    if !config.needs_dump() {
        return Ok(None);
    }

    let data = guarded(variant, "dump", || config.dump())?;
    trace!(%variant, bytes = data.len(), "Built config dump");

    Ok(Some(ConfigDump { variant, public_key: public_key.to_string(), data, timestamp_ms }))
}
