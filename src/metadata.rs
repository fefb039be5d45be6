use crate::apply::apply_patch;
use crate::clock::{Hlc, Timestamp};
use crate::diff::{diff_to_patches, initial_to_patches, DiffOptions};
use crate::error::SedimentError;
use crate::normalize::{substitute_refs_with_objects, NormalizedObject};
use crate::oid::{Oid, ReplicaId};
use crate::patch::Operation;
use crate::store::{
    BaselinesStore, DocumentBaseline, ExportData, LocalReplicaInfo, OperationsStore, Schema,
};
use crate::value::Value;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A message for the transport layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncMessage {
    #[serde(rename_all = "camelCase")]
    Operation {
        operations: Vec<Operation>,
        replica_id: ReplicaId,
    },
    #[serde(rename_all = "camelCase")]
    Ack {
        timestamp: Timestamp,
        replica_id: ReplicaId,
    },
}

/// Everything observers can be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEvent {
    /// An outbound message for the transport.
    Message(SyncMessage),
    /// History below the watermark was folded into these baselines.
    Rebase { baselines: Vec<DocumentBaseline> },
}

#[derive(Clone, Copy, Debug)]
pub struct EventHandlerId(usize);

/// A sequence of event handlers, called in insertion order. Removal leaves a
/// hole so outstanding ids stay valid.
#[derive(Default)]
pub(crate) struct EventHandlers(Vec<Option<Box<dyn FnMut(&MetadataEvent)>>>);

impl EventHandlers {
    fn emit(&mut self, event: &MetadataEvent) {
        for handler in self.0.iter_mut().flatten() {
            handler(event);
        }
    }

    fn add_handler(&mut self, handler: Box<dyn FnMut(&MetadataEvent)>) -> EventHandlerId {
        self.0.push(Some(handler));
        EventHandlerId(self.0.len() - 1)
    }

    fn remove_handler(&mut self, id: EventHandlerId) -> bool {
        match self.0.get_mut(id.0) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventHandlers")
            .field(&self.0.iter().flatten().count())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataOptions {
    /// Park history compaction entirely; operations accumulate until the
    /// caller re-enables it and triggers a rebase through a global ack.
    pub disable_rebasing: bool,
}

/// The metadata store: the coordination point for operations, baselines, the
/// clock and the replica's sync position.
///
/// All mutation funnels through `&mut self`, which is the single-writer
/// discipline this store requires: reads acquire the same exclusive access,
/// so no reader can observe a half-applied insert or rebase.
#[derive(Debug)]
pub struct Metadata {
    pub(crate) operations: OperationsStore,
    pub(crate) baselines: BaselinesStore,
    pub(crate) local_replica: LocalReplicaInfo,
    pub(crate) global_ack: Option<Timestamp>,
    pub(crate) schema: Option<Schema>,
    pub(crate) clock: Hlc,
    pub(crate) handlers: EventHandlers,
    pub(crate) options: MetadataOptions,
    pub(crate) closed: bool,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata::with_replica_id(ReplicaId::random())
    }

    pub fn with_replica_id(id: ReplicaId) -> Metadata {
        let local_replica = LocalReplicaInfo::new(id.clone());
        Metadata {
            operations: OperationsStore::default(),
            baselines: BaselinesStore::default(),
            clock: Hlc::new(id, 0),
            local_replica,
            global_ack: None,
            schema: None,
            handlers: EventHandlers::default(),
            options: MetadataOptions::default(),
            closed: false,
        }
    }

    pub fn with_options(options: MetadataOptions) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.options = options;
        metadata
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.local_replica.id
    }

    pub fn local_replica(&self) -> &LocalReplicaInfo {
        &self.local_replica
    }

    pub fn global_ack(&self) -> Option<&Timestamp> {
        self.global_ack.as_ref()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Issue a timestamp. The clock is owned here; this is its only mutator.
    pub fn now(&mut self) -> Timestamp {
        self.clock.now()
    }

    /// Diff two document values with this store's clock.
    pub fn diff(
        &mut self,
        from: &Value,
        to: &mut Value,
        options: DiffOptions,
    ) -> Result<Vec<Operation>, SedimentError> {
        diff_to_patches(from, to, &mut self.clock, options)
    }

    /// The operations that bring a brand-new document into existence: one
    /// `initialize` per sub-object of `value`, stamped by this store's
    /// clock. Feed them to [`Metadata::insert_local_operation`].
    pub fn initialize_document(
        &mut self,
        root: &Oid,
        value: &mut Value,
    ) -> Result<Vec<Operation>, SedimentError> {
        initial_to_patches(value, root, &mut self.clock)
    }

    pub fn add_event_handler(
        &mut self,
        handler: Box<dyn FnMut(&MetadataEvent)>,
    ) -> EventHandlerId {
        self.handlers.add_handler(handler)
    }

    pub fn remove_event_handler(&mut self, id: EventHandlerId) -> bool {
        self.handlers.remove_handler(id)
    }

    pub(crate) fn emit(&mut self, event: MetadataEvent) {
        self.handlers.emit(&event);
    }

    /// Record operations produced by a local edit, hand them to the
    /// transport, and compact history if this replica has never synced (with
    /// no remote participant there is nothing the fold could contradict).
    pub fn insert_local_operation(&mut self, ops: Vec<Operation>) -> Result<(), SedimentError> {
        if ops.is_empty() {
            return Ok(());
        }
        self.operations.add_operations(ops.clone(), true);
        let replica_id = self.local_replica.id.clone();
        self.emit(MetadataEvent::Message(SyncMessage::Operation {
            operations: ops,
            replica_id,
        }));
        if self.local_replica.last_synced_logical_time.is_none() && !self.options.disable_rebasing
        {
            let watermark = self.clock.now();
            self.run_rebase(&watermark)?;
        }
        Ok(())
    }

    /// Record operations received from the server and acknowledge them.
    /// Returns the affected document roots so callers can refresh queries.
    pub fn insert_remote_operations(
        &mut self,
        ops: Vec<Operation>,
    ) -> Result<Vec<Oid>, SedimentError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        for op in &ops {
            self.clock.observe(&op.timestamp);
        }
        let last = ops.last().map(|op| op.timestamp.clone());
        let roots = self.operations.add_operations(ops, false);
        if let Some(timestamp) = last {
            self.ack(timestamp);
        }
        let mut roots: Vec<Oid> = roots.into_iter().collect();
        roots.sort_unstable();
        Ok(roots)
    }

    /// Record baselines received from the server (another replica already
    /// folded this history) and acknowledge them.
    pub fn insert_remote_baselines(
        &mut self,
        baselines: Vec<DocumentBaseline>,
    ) -> Result<Vec<Oid>, SedimentError> {
        if baselines.is_empty() {
            return Ok(Vec::new());
        }
        let mut roots = BTreeSet::new();
        for baseline in &baselines {
            self.clock.observe(&baseline.timestamp);
            roots.insert(baseline.oid.document_root());
        }
        let last = baselines.last().map(|b| b.timestamp.clone());
        self.baselines.set_all(baselines);
        if let Some(timestamp) = last {
            self.ack(timestamp);
        }
        Ok(roots.into_iter().collect())
    }

    /// Tell the server how far this replica has seen, and remember it.
    pub fn ack(&mut self, timestamp: Timestamp) {
        self.clock.observe(&timestamp);
        let replica_id = self.local_replica.id.clone();
        self.emit(MetadataEvent::Message(SyncMessage::Ack {
            timestamp: timestamp.clone(),
            replica_id,
        }));
        let acked = &mut self.local_replica.acked_logical_time;
        if acked.as_ref().map_or(true, |cur| &timestamp > cur) {
            *acked = Some(timestamp);
        }
    }

    /// The server declared that every replica has acknowledged `timestamp`:
    /// history at or before it can be folded away.
    pub fn set_global_ack(&mut self, timestamp: Timestamp) -> Result<(), SedimentError> {
        self.global_ack = Some(timestamp.clone());
        if !self.options.disable_rebasing {
            self.run_rebase(&timestamp)?;
        }
        Ok(())
    }

    /// Record a completed sync. A replica that has synced once loses its
    /// license to rebase autonomously.
    pub fn mark_synced(&mut self, timestamp: Timestamp) {
        let synced = &mut self.local_replica.last_synced_logical_time;
        if synced.as_ref().map_or(true, |cur| &timestamp > cur) {
            *synced = Some(timestamp);
        }
    }

    /// Materialize the current state of a document: baselines first, then
    /// every live operation folded in timestamp order, then references
    /// substituted under the document's root object. Returns `None` when the
    /// root was deleted or never initialized.
    pub fn get_document_snapshot(&mut self, root: &Oid) -> Result<Option<Value>, SedimentError> {
        ensure_document_root(root)?;
        let mut objects: FxHashMap<Oid, Option<NormalizedObject>> = FxHashMap::default();
        let mut baseline_times: FxHashMap<Oid, Timestamp> = FxHashMap::default();
        self.baselines.for_each_for_document(root, |baseline| {
            baseline_times.insert(baseline.oid.clone(), baseline.timestamp.clone());
            objects.insert(baseline.oid.clone(), baseline.snapshot.clone());
            Ok(())
        })?;
        self.operations
            .for_each_for_document(root, None, |oid, timestamp, patch, _| {
                if let Some(folded_at) = baseline_times.get(oid) {
                    if timestamp <= folded_at {
                        tracing::trace!(%oid, %timestamp, "operation predates its baseline");
                        return Ok(());
                    }
                }
                let cur = objects.get(oid).cloned().flatten();
                let next = apply_patch(cur, patch)?;
                objects.insert(oid.clone(), next);
                Ok(())
            })?;
        let live: FxHashMap<Oid, NormalizedObject> = objects
            .into_iter()
            .filter_map(|(oid, snapshot)| snapshot.map(|s| (oid, s)))
            .collect();
        let root_object = live.keys().filter(|oid| oid.is_root()).min().cloned();
        match root_object {
            Some(root_object) => {
                let (value, _) = substitute_refs_with_objects(&root_object, &live)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Every oid appearing in baselines or operations under a document root:
    /// a superset of the oids reachable from the root, which is what
    /// reachability-based cleanup wants to start from.
    pub fn get_all_document_related_oids(
        &mut self,
        root: &Oid,
    ) -> Result<Vec<Oid>, SedimentError> {
        ensure_document_root(root)?;
        let mut oids = BTreeSet::new();
        self.baselines.for_each_for_document(root, |baseline| {
            oids.insert(baseline.oid.clone());
            Ok(())
        })?;
        self.operations
            .for_each_for_document(root, None, |oid, _, _, _| {
                oids.insert(oid.clone());
                Ok(())
            })?;
        Ok(oids.into_iter().collect())
    }

    /// Store a new schema, refusing silent drift: the same version with a
    /// different definition is rejected unless the caller explicitly
    /// overrides the conflicting version.
    pub fn update_schema(
        &mut self,
        schema: Schema,
        override_conflict: Option<u64>,
    ) -> Result<(), SedimentError> {
        if let Some(stored) = &self.schema {
            if stored.version == schema.version
                && *stored != schema
                && override_conflict != Some(stored.version)
            {
                return Err(SedimentError::SchemaConflict {
                    version: stored.version,
                });
            }
        }
        self.clock.set_schema_version(schema.version);
        self.schema = Some(schema);
        Ok(())
    }

    pub fn export(&self) -> ExportData {
        ExportData {
            operations: self.operations.export_rows(),
            baselines: self.baselines.export_rows(),
            local_replica: self.local_replica.clone(),
            schema: self.schema.clone(),
        }
    }

    /// Replace the whole store with previously exported state and rehydrate
    /// the clock from the restored replica's acknowledged time.
    pub fn reset_from(&mut self, data: ExportData) {
        let ExportData {
            operations,
            baselines,
            local_replica,
            schema,
        } = data;
        self.operations.reset();
        self.baselines.reset();
        for row in operations {
            let is_local = row.is_local;
            self.operations.add_operations(vec![row.into()], is_local);
        }
        self.baselines.set_all(baselines);
        self.clock = Hlc::new(
            local_replica.id.clone(),
            schema.as_ref().map_or(0, |s| s.version),
        );
        if let Some(acked) = &local_replica.acked_logical_time {
            self.clock.observe(acked);
        }
        self.local_replica = local_replica;
        self.schema = schema;
        self.global_ack = None;
    }

    /// Stop future rebase work. In-flight calls finish; the flag is checked
    /// at the top of a rebase run and between per-entity folds.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata::new()
    }
}

fn ensure_document_root(oid: &Oid) -> Result<(), SedimentError> {
    if oid.is_document_root() {
        Ok(())
    } else {
        Err(SedimentError::NonRootOid(oid.clone()))
    }
}
