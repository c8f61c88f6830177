//! Deferred structural changes and their application at the reconciliation
//! point.
//!
//! Between reconciliations the world only *records* structural change: new
//! entities wait in the spawn queue, entities whose component set changed sit
//! in the dirty queue, destroy requests wait in the destroy queue. Family
//! rows never move in the meantime.
//!
//! [`reconcile`] drains the three queues in a fixed order, spawns, then
//! dirty re-evaluation, then destroys, staging family transitions as it
//! goes, and finally flushes every family once. An entity therefore makes at
//! most one membership transition per family per pass.

use std::time::Instant;

use tracing::{debug, trace};

use crate::family::FamilyRegistry;
use crate::store::EntityStore;

// ---------------------------------------------------------------------------
// ChildPolicy
// ---------------------------------------------------------------------------

/// What happens to the children of a destroyed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChildPolicy {
    /// Destroy the whole subtree.
    #[default]
    Destroy,
    /// Move the children under the destroyed entity's parent. Children of a
    /// root, or of an entity whose parent is itself going away, become roots.
    Reparent,
    /// Detach the children; they become roots.
    Orphan,
}

// ---------------------------------------------------------------------------
// ReconcileReport
// ---------------------------------------------------------------------------

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entities that went from pending to live.
    pub spawned: usize,
    /// Dirty entities whose masks were recomputed.
    pub refreshed: usize,
    /// Entities whose slots were freed.
    pub destroyed: usize,
    /// Rows added across all families.
    pub family_adds: usize,
    /// Rows removed across all families.
    pub family_removes: usize,
    /// Reload notifications across all families.
    pub family_reloads: usize,
    /// Inbox messages dropped for reaching their lifetime.
    pub messages_expired: usize,
}

impl ReconcileReport {
    /// Whether the pass changed nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

/// Process the spawn queue: refresh each pending entity, make it live and
/// stage it into every matching family. Entities destroyed before their
/// first reconciliation are skipped; the destroy pass frees them.
pub(crate) fn spawn_pass(store: &mut EntityStore, families: &mut FamilyRegistry) -> usize {
    let queue = std::mem::take(&mut store.spawn_queue);
    let mut spawned = 0;
    for key in queue {
        match store.get(key) {
            Ok(entity) if entity.alive && !entity.spawned => {}
            _ => continue,
        }
        let Ok((_, entity)) = store.refresh(key) else {
            continue;
        };
        entity.spawned = true;
        entity.queued = false;
        trace!(id = %entity.id, mask = ?entity.mask, "entity spawned");
        families.stage_spawn(key, entity.id, &entity.mask);
        spawned += 1;
    }
    spawned
}

/// Re-evaluate dirty entities against every family.
fn dirty_pass(store: &mut EntityStore, families: &mut FamilyRegistry) -> usize {
    let queue = std::mem::take(&mut store.dirty_queue);
    let mut refreshed = 0;
    for key in queue {
        let Ok(entity) = store.get_mut(key) else {
            continue;
        };
        entity.queued = false;
        if !entity.dirty || !entity.alive || !entity.spawned {
            continue;
        }
        let reloaded = entity.reloaded;
        let Ok((old, entity)) = store.refresh(key) else {
            continue;
        };
        trace!(id = %entity.id, ?old, new = ?entity.mask, reloaded, "entity refreshed");
        families.stage_mask_change(key, entity.id, &old, &entity.mask, reloaded);
        refreshed += 1;
    }
    refreshed
}

/// Tear down every entity marked for destruction. Membership is judged by
/// the cached mask, which is what the families were last told.
fn destroy_pass(store: &mut EntityStore, families: &mut FamilyRegistry) -> usize {
    let queue = std::mem::take(&mut store.destroy_queue);
    let mut destroyed = 0;
    for (key, policy) in queue {
        let Ok(entity) = store.get(key) else {
            continue;
        };
        if entity.spawned {
            families.stage_destroy(key, &entity.mask);
        }
        if store.do_destroy(key, policy).is_some() {
            destroyed += 1;
        }
    }
    destroyed
}

/// Age every inbox and drop expired messages. Inboxes of destroyed
/// entities went with their records.
fn message_pass(store: &mut EntityStore) -> usize {
    let mailboxes = std::mem::take(&mut store.mailboxes);
    let mut expired = 0;
    for key in mailboxes {
        let Ok(entity) = store.get_mut(key) else {
            continue;
        };
        expired += entity.inbox.age();
        if !entity.inbox.is_empty() {
            store.mailboxes.push(key);
        }
    }
    expired
}

/// Run the full ordered pass and flush families.
pub(crate) fn reconcile(store: &mut EntityStore, families: &mut FamilyRegistry) -> ReconcileReport {
    let start = Instant::now();
    let spawned = spawn_pass(store, families);
    let refreshed = dirty_pass(store, families);
    let destroyed = destroy_pass(store, families);
    let messages_expired = message_pass(store);
    let (family_adds, family_removes, family_reloads) = families.flush(store);

    let report = ReconcileReport {
        spawned,
        refreshed,
        destroyed,
        family_adds,
        family_removes,
        family_reloads,
        messages_expired,
    };
    if !report.is_empty() {
        debug!(
            spawned,
            refreshed,
            destroyed,
            family_adds,
            family_removes,
            family_reloads,
            messages_expired,
            elapsed_us = start.elapsed().as_micros() as u64,
            "reconciled"
        );
    }
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
