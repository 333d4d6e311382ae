/*
    incoming.rs - Merge received config messages into local state

    A batch may span several variants and arrive out of order. Messages
    are sorted by seqno, grouped by variant and the groups are applied in
    processing order. For each group:

        merge ──▶ accepted hashes ──▶ handler.apply ──▶ dump / touch

    The merge library may reject individual messages; that only shows up
    as a shorter accepted list. A failing handler aborts the whole batch
    so the caller's transaction rolls back. Every object touched by the
    batch is checkpointed first, so the rollback also restores it and a
    redelivered batch merges as if it were new.
*/

use crate::core_config::dump::create_dump;
use crate::core_config::errors::{SyncError, SyncResult};
use crate::core_config::handlers::{schedule_sync, HandlerTable, SyncScheduler, UpdateContext};
use crate::core_config::registry::{guarded, ConfigRegistry};
use crate::core_config::types::{now_ms, ConfResult, SharedConfigMessage};
use crate::core_config::variant::ConfigVariant;
use crate::core_store::{dumps, WriteTransaction};
use crate::metrics::{Timer, MERGE_DURATION_MS};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of merging one variant's share of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub variant: ConfigVariant,
    /// Messages handed to merge
    pub received: usize,
    pub result: ConfResult,
}

/// Collaborators the merge path writes through
pub struct MergeTargets<'a> {
    pub registry: &'a ConfigRegistry,
    pub handlers: &'a HandlerTable,
    pub scheduler: &'a Arc<dyn SyncScheduler>,
}

/// Merge `messages` for `public_key` inside `tx`.
///
/// Schedules a single sync for the account if any variant still needs a
/// push afterwards.
pub fn handle_config_messages(
    tx: &mut WriteTransaction<'_>,
    targets: &MergeTargets<'_>,
    messages: &[SharedConfigMessage],
    public_key: &str,
) -> SyncResult<Vec<MergeOutcome>> {
    if public_key.is_empty() {
        return Err(SyncError::NoThread);
    }
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let mut sorted: Vec<&SharedConfigMessage> = messages.iter().collect();
    sorted.sort_by_key(|message| message.seq_no);

    let mut groups: BTreeMap<(u8, ConfigVariant), Vec<&SharedConfigMessage>> = BTreeMap::new();
    for message in sorted {
        groups.entry(message.kind.ordering_key()).or_default().push(message);
    }

    let mut outcomes = Vec::with_capacity(groups.len());
    for ((_, variant), group) in groups {
        match merge_group(tx, targets, variant, &group, public_key)? {
            Some(outcome) => outcomes.push(outcome),
            None => debug!(%variant, public_key, "Config not loaded, dropping incoming messages"),
        }
    }

    if outcomes.iter().any(|outcome| outcome.result.needs_push) {
        schedule_sync(tx, targets.scheduler, public_key);
    }
    Ok(outcomes)
}

fn merge_group(
    tx: &mut WriteTransaction<'_>,
    targets: &MergeTargets<'_>,
    variant: ConfigVariant,
    group: &[&SharedConfigMessage],
    public_key: &str,
) -> SyncResult<Option<MergeOutcome>> {
    let mut batch = Vec::with_capacity(group.len());
    let mut sent_at = BTreeMap::new();
    for message in group {
        let Some(hash) = message.server_hash.as_ref() else {
            warn!(%variant, seq_no = message.seq_no, "Ignoring config message without a server hash");
            continue;
        };
        batch.push((hash.clone(), message.data.clone()));
        if let Some(timestamp_ms) = message.sent_timestamp_ms {
            let latest = sent_at.entry(hash.clone()).or_insert(timestamp_ms);
            *latest = (*latest).max(timestamp_ms);
        }
    }
    let received = batch.len();

    let Some(handle) = targets.registry.get(variant, public_key)? else {
        return Ok(None);
    };
    handle.checkpoint(tx)?;

    let timer = Timer::new(MERGE_DURATION_MS);
    let result = handle.mutate(|config| -> SyncResult<ConfResult> {
        let accepted = guarded(variant, "merge", || config.merge(&batch))?;
        debug!(%variant, accepted = accepted.len(), received, "Merged incoming config messages");

        if accepted.is_empty() {
            return Ok(ConfResult { needs_push: config.needs_push(), ..ConfResult::default() });
        }

        let latest_sent_timestamp_ms = accepted
            .iter()
            .filter_map(|hash| sent_at.get(hash).copied())
            .max()
            .unwrap_or_else(now_ms);
        let needs_dump = config.needs_dump();

        let ctx = UpdateContext { public_key, needs_dump, latest_sent_timestamp_ms };
        targets.handlers.get(variant).apply(tx, &*config, &ctx).map_err(|err| match err {
            SyncError::Handler { .. } => err,
            other => SyncError::Handler { variant, reason: other.to_string() },
        })?;

        if needs_dump {
            if let Some(dump) = create_dump(Some(&mut *config), variant, public_key, latest_sent_timestamp_ms)? {
                dumps::upsert(tx, &dump)?;
            }
        } else {
            dumps::touch_timestamp(tx, variant, public_key, latest_sent_timestamp_ms)?;
        }

        Ok(ConfResult {
            needs_push: config.needs_push(),
            needs_dump,
            message_hashes: accepted,
            latest_sent_timestamp_ms: Some(latest_sent_timestamp_ms),
        })
    })?;
    timer.stop();

    Ok(Some(MergeOutcome { variant, received, result: result? }))
}
