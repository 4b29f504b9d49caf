//! Per-client reconciliation
//!
//! A [`Liaison`] keeps a window of tick records, from the newest state the
//! client is known to hold (the baseline) up to now. Every tick it appends a
//! record of what changed in the client's view and folds the window into one
//! delta against the baseline, so a client that missed or has not yet
//! acknowledged several ticks still converges from whatever it last applied.
//!
//! The window shrinks when the client acknowledges a timestamp (see
//! `net::input`) or when an event is known to have been delivered reliably.

use std::collections::{BTreeMap, VecDeque};
use std::mem;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::net::aoi::AreaOfInterest;
use crate::net::delta;
use crate::net::protocol::{ActorDelta, ActorSnapshot, EffectSnapshot, SceneDelta};
use crate::net::transport::{ClientTransport, DeliveryMode, DeliveryReceipt};
use crate::scene::actor::{Actor, ActorId};
use crate::scene::registry::Registry;
use crate::scene::{ClientId, SceneError, Timestamp};
use crate::util::moving_average::TruncatedAverage;
use crate::util::rect::Rect;

/// Default number of ping samples averaged
pub const DEFAULT_PING_WINDOW: usize = 16;

// ============================================================================
// Tick Records
// ============================================================================

/// What changed in one client's view during one tick
#[derive(Debug, Clone, Default)]
pub struct TickRecord {
    pub timestamp: Timestamp,
    pub added: Vec<ActorSnapshot>,
    pub updated: Vec<ActorDelta>,
    /// Last snapshot the client was sent of each removed actor
    pub removed: Vec<ActorSnapshot>,
    pub effects: Vec<EffectSnapshot>,
    /// How the event built for this tick went out; `None` for the seed
    pub receipt: Option<DeliveryReceipt>,
}

impl TickRecord {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Empty record at time 0: the state of a client that knows nothing
    pub fn seed() -> Self {
        Self::new(0)
    }

    fn sort(&mut self) {
        self.added.sort_unstable_by_key(|s| s.id);
        self.updated.sort_unstable_by_key(|d| d.id);
        self.removed.sort_unstable_by_key(|s| s.id);
    }
}

// ============================================================================
// Window Merge
// ============================================================================

/// Net change across several tick records
#[derive(Debug, Default)]
pub struct MergedDelta {
    pub added: BTreeMap<ActorId, ActorSnapshot>,
    pub updated: BTreeMap<ActorId, ActorDelta>,
    pub removed: BTreeMap<ActorId, ActorSnapshot>,
    pub effects: Vec<EffectSnapshot>,
    /// Updates cancelled by a removal, kept in case the actor comes back
    dropped: BTreeMap<ActorId, ActorDelta>,
}

impl MergedDelta {
    fn add(&mut self, snapshot: &ActorSnapshot) {
        let id = snapshot.id;
        if let Some(gone) = self.removed.remove(&id) {
            // The client still holds the baseline state: replay the updates
            // the removal cancelled, then the difference since it
            let change = match (self.dropped.remove(&id), delta::diff(&gone, snapshot)) {
                (Some(mut pending), Some(change)) => {
                    pending.merge(&change);
                    Some(pending)
                }
                (pending, change) => pending.or(change),
            };
            if let Some(change) = change {
                self.updated.insert(id, change);
            }
            return;
        }
        self.updated.remove(&id);
        self.added.insert(id, snapshot.clone());
    }

    fn update(&mut self, change: &ActorDelta) {
        if let Some(pending) = self.added.get_mut(&change.id) {
            change.apply(pending);
        } else if let Some(pending) = self.updated.get_mut(&change.id) {
            pending.merge(change);
        } else {
            self.updated.insert(change.id, change.clone());
        }
    }

    fn remove(&mut self, snapshot: &ActorSnapshot) {
        let id = snapshot.id;
        // Never sent, so nothing to take back
        if self.added.remove(&id).is_some() {
            return;
        }
        if let Some(pending) = self.updated.remove(&id) {
            self.dropped.insert(id, pending);
        }
        self.removed.insert(id, snapshot.clone());
    }
}

/// Fold records (oldest first, baseline excluded) into one delta.
///
/// Effects already expired at `now` are dropped.
pub fn merge_window<'a>(
    records: impl IntoIterator<Item = &'a TickRecord>,
    now: Timestamp,
) -> MergedDelta {
    let mut merged = MergedDelta::default();
    for record in records {
        // Removals first: a static removed and respawned under the same id
        // within one tick becomes an update
        for snapshot in &record.removed {
            merged.remove(snapshot);
        }
        for snapshot in &record.added {
            merged.add(snapshot);
        }
        for change in &record.updated {
            merged.update(change);
        }
        merged.effects.extend(
            record
                .effects
                .iter()
                .filter(|effect| effect.expiry > now)
                .cloned(),
        );
    }
    merged
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

// ============================================================================
// Liaison
// ============================================================================

/// Reconciliation state for one connected client
pub struct Liaison {
    pub(super) client_id: ClientId,
    transport: Arc<dyn ClientTransport>,
    target: Option<ActorId>,
    pub(super) controlled: Option<ActorId>,
    interest: AreaOfInterest,
    /// Set once the client has entered the scene
    pub(super) receiving: bool,
    pub(super) last_acknowledged: Timestamp,
    /// Newest input frame timestamp processed; never decreases
    pub(super) last_input: Timestamp,
    pub(super) ping: TruncatedAverage,
    /// Actors visible last tick, with the snapshot reported then
    visible: FxHashMap<ActorId, ActorSnapshot>,
    /// Storage for this tick's visible map, swapped with `visible`
    scratch: FxHashMap<ActorId, ActorSnapshot>,
    /// Baseline first; never empty
    pub(super) records: VecDeque<TickRecord>,
    query: Vec<ActorId>,
}

impl Liaison {
    pub fn new(
        client_id: ClientId,
        transport: Arc<dyn ClientTransport>,
        controlled: Option<ActorId>,
        interest: AreaOfInterest,
        ping_window: usize,
    ) -> Self {
        let mut records = VecDeque::with_capacity(8);
        records.push_back(TickRecord::seed());
        Self {
            client_id,
            transport,
            target: controlled,
            controlled,
            interest,
            receiving: false,
            last_acknowledged: 0,
            last_input: 0,
            ping: TruncatedAverage::new(ping_window),
            visible: FxHashMap::default(),
            scratch: FxHashMap::default(),
            records,
            query: Vec::new(),
        }
    }

    /// Forget everything the client was sent; it starts over as a new observer
    pub fn reset(&mut self, transport: Arc<dyn ClientTransport>, controlled: Option<ActorId>) {
        self.transport = transport;
        self.controlled = controlled;
        self.target = controlled;
        self.receiving = false;
        self.last_acknowledged = 0;
        self.last_input = 0;
        self.ping.clear();
        self.visible.clear();
        self.scratch.clear();
        self.records.clear();
        self.records.push_back(TickRecord::seed());
    }

    #[inline]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    #[inline]
    pub fn target(&self) -> Option<ActorId> {
        self.target
    }

    #[inline]
    pub fn controlled(&self) -> Option<ActorId> {
        self.controlled
    }

    #[inline]
    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    /// The client finished loading and wants deltas
    pub fn mark_receiving(&mut self) {
        self.receiving = true;
    }

    #[inline]
    pub fn last_input(&self) -> Timestamp {
        self.last_input
    }

    #[inline]
    pub fn last_acknowledged(&self) -> Timestamp {
        self.last_acknowledged
    }

    /// Smoothed round trip in milliseconds
    #[inline]
    pub fn ping(&self) -> u32 {
        self.ping.value()
    }

    /// Timestamp of the state deltas are currently built against
    pub fn reference(&self) -> Timestamp {
        self.records.front().map_or(0, |record| record.timestamp)
    }

    pub fn window_len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &TickRecord> + '_ {
        self.records.iter()
    }

    /// Point the camera at a pawn, or at nothing
    pub fn set_target(&mut self, registry: &Registry, target: Option<ActorId>) -> Result<(), SceneError> {
        if let Some(id) = target {
            if registry.actor(id).is_none() {
                warn!(client = %self.client_id, id, "target requested for missing actor");
                return Err(SceneError::ActorNotFound(id));
            }
            if !registry.is_pawn(id) {
                warn!(client = %self.client_id, id, "target requested for non-pawn actor");
                return Err(SceneError::NotAPawn(id));
            }
        }
        self.target = target;
        Ok(())
    }

    pub fn set_controlled(&mut self, controlled: Option<ActorId>) {
        self.controlled = controlled;
    }

    /// Build, record and post this tick's delta.
    ///
    /// Runs after simulation and reaping, before the registry's `end_tick`.
    ///
    /// # Returns
    /// The delivery mode requested, or `None` if the client has not entered
    /// the scene yet
    pub fn reconcile(&mut self, registry: &Registry) -> Result<Option<DeliveryMode>, SceneError> {
        if !self.receiving {
            return Ok(None);
        }
        let now = registry.timestamp();

        self.compact_on_reliable_delivery();

        let viewer = self.target.filter(|&id| registry.actor(id).is_some());
        let camera = viewer.and_then(|id| registry.actor(id)).map(Actor::translation);
        let interest = self.interest.world(camera);

        let mut record = TickRecord::new(now);
        self.diff_visible(registry, &interest, viewer, &mut record);
        self.collect_statics(registry, &mut record);
        record.effects.extend(
            registry
                .fired_effects()
                .iter()
                .filter(|effect| effect.is_visible_to(viewer) && effect.world_shape().intersects(&interest))
                .map(|effect| effect.snapshot()),
        );
        record.sort();
        self.records.push_back(record);

        let merged = merge_window(self.records.iter().skip(1), now);
        let event = SceneDelta {
            last_input: self.last_input,
            ping: self.ping.value().min(u16::MAX as u32) as u16,
            reference: self.reference(),
            timestamp: now,
            elapsed: (now - registry.previous_timestamp()).min(u16::MAX as u64) as u16,
            added: non_empty(merged.added.into_values().collect()),
            updated: non_empty(merged.updated.into_values().collect()),
            removed: non_empty(merged.removed.into_keys().collect()),
            effects: non_empty(merged.effects),
        };

        let datagrams = self.transport.transmit_datagrams();
        let mode = if datagrams {
            DeliveryMode::Unreliable
        } else {
            DeliveryMode::ReliableOrdered
        };
        let receipt = self.transport.post_event(&event, mode)?;
        if let Some(newest) = self.records.back_mut() {
            newest.receipt = Some(receipt);
        }

        if !datagrams {
            // Ordered delivery: the client will hold this tick's state
            let stale = self.records.len() - 1;
            self.records.drain(..stale);
        }
        Ok(Some(mode))
    }

    /// Drop every record older than the newest one known to have been
    /// delivered reliably
    fn compact_on_reliable_delivery(&mut self) {
        let delivered = self
            .records
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .find(|(_, record)| {
                record
                    .receipt
                    .as_ref()
                    .is_some_and(DeliveryReceipt::delivered_reliably)
            })
            .map(|(index, _)| index);

        if let Some(index) = delivered {
            self.records.drain(..index);
            debug!(client = %self.client_id, reference = self.reference(), "window compacted on reliable delivery");
        }
    }

    fn diff_visible(
        &mut self,
        registry: &Registry,
        interest: &Rect,
        viewer: Option<ActorId>,
        record: &mut TickRecord,
    ) {
        registry.visible_actors(interest, viewer, &mut self.query);
        for &id in &self.query {
            let Some(actor) = registry.actor(id) else {
                continue;
            };
            if self.visible.remove(&id).is_some() {
                if let Some(change) = registry.tick_delta(id) {
                    record.updated.push(change.clone());
                }
            } else {
                record.added.push(actor.snapshot().clone());
            }
            self.scratch.insert(id, actor.snapshot().clone());
        }

        // Whatever is left went out of view (or out of existence)
        record.removed.extend(self.visible.drain().map(|(_, snapshot)| snapshot));
        mem::swap(&mut self.visible, &mut self.scratch);
    }

    fn collect_statics(&self, registry: &Registry, record: &mut TickRecord) {
        let knows_nothing = self.reference() == 0;
        if knows_nothing {
            record
                .added
                .extend(registry.static_actors().map(|actor| actor.snapshot().clone()));
        } else {
            record
                .added
                .extend(registry.statics_added().map(|actor| actor.snapshot().clone()));
            record.updated.extend(registry.statics_updated().cloned());
        }
        // Without a reference the client only holds statics some record in
        // the window reported
        let reported = |id: ActorId| {
            self.records
                .iter()
                .any(|earlier| earlier.added.iter().any(|snapshot| snapshot.id == id))
        };
        record.removed.extend(
            registry
                .statics_removed()
                .filter(|snapshot| !knows_nothing || reported(snapshot.id))
                .cloned(),
        );
    }
}
