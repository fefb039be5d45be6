use crate::clock::Timestamp;
use crate::error::SedimentError;
use crate::normalize::NormalizedObject;
use crate::oid::{Oid, ReplicaId};
use crate::patch::{Operation, Patch, StoredOperation};
use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The folded state of one sub-object as of `timestamp`; every operation
/// stamped at or before it has been incorporated. An absent snapshot is a
/// tombstone, kept only while live operations for the oid remain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentBaseline {
    pub oid: Oid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<NormalizedObject>,
    pub timestamp: Timestamp,
}

/// The durable identity and sync position of this replica.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalReplicaInfo {
    pub id: ReplicaId,
    pub acked_logical_time: Option<Timestamp>,
    pub last_synced_logical_time: Option<Timestamp>,
}

impl LocalReplicaInfo {
    pub fn new(id: ReplicaId) -> LocalReplicaInfo {
        LocalReplicaInfo {
            id,
            acked_logical_time: None,
            last_synced_logical_time: None,
        }
    }
}

/// The stored schema: an integer version plus the definition it was declared
/// with. Any change of definition without a version bump is drift.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Schema {
    pub version: u64,
    pub definition: serde_json::Value,
}

/// Everything this store persists, verbatim, for backup and restore.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub operations: Vec<StoredOperation>,
    pub baselines: Vec<DocumentBaseline>,
    pub local_replica: LocalReplicaInfo,
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, PartialEq)]
struct OpRecord {
    data: Patch,
    is_local: bool,
}

/// Append-only index of operations keyed by `(oid, timestamp)`, so a scan
/// for one oid is a timestamp-ordered run. A secondary index keyed by
/// `(document root, timestamp, oid)` serves whole-document replay in
/// timestamp order. Rows are immutable once inserted; only rebase deletes
/// them.
#[derive(Debug, Default, Clone)]
pub(crate) struct OperationsStore {
    primary: BTreeMap<(Oid, Timestamp), OpRecord>,
    by_document: BTreeSet<(Oid, Timestamp, Oid)>,
}

impl OperationsStore {
    /// Batch-insert, deduplicating by `(oid, timestamp)`. Returns the set of
    /// affected document roots.
    pub fn add_operations(&mut self, ops: Vec<Operation>, is_local: bool) -> FxHashSet<Oid> {
        let mut roots = FxHashSet::default();
        for op in ops {
            let root = op.oid.document_root();
            let key = (op.oid, op.timestamp);
            if self.primary.contains_key(&key) {
                tracing::trace!(oid = %key.0, timestamp = %key.1, "duplicate operation dropped");
                continue;
            }
            self.by_document
                .insert((root.clone(), key.1.clone(), key.0.clone()));
            self.primary.insert(
                key,
                OpRecord {
                    data: op.data,
                    is_local,
                },
            );
            roots.insert(root);
        }
        roots
    }

    /// Visit every operation of a document in timestamp order, optionally
    /// truncating at `to` (inclusive).
    pub fn for_each_for_document<F>(
        &self,
        root: &Oid,
        to: Option<&Timestamp>,
        mut f: F,
    ) -> Result<(), SedimentError>
    where
        F: FnMut(&Oid, &Timestamp, &Patch, bool) -> Result<(), SedimentError>,
    {
        let start = (root.clone(), Timestamp::min(), Oid::min());
        for (doc, timestamp, oid) in self.by_document.range(start..) {
            if doc != root {
                break;
            }
            if let Some(to) = to {
                if timestamp > to {
                    break;
                }
            }
            if let Some(record) = self.primary.get(&(oid.clone(), timestamp.clone())) {
                f(oid, timestamp, &record.data, record.is_local)?;
            }
        }
        Ok(())
    }

    /// Visit every operation for a single oid in timestamp order, truncating
    /// at `to` (inclusive).
    pub fn for_each_for_entity<F>(
        &self,
        oid: &Oid,
        to: Option<&Timestamp>,
        mut f: F,
    ) -> Result<(), SedimentError>
    where
        F: FnMut(&Timestamp, &Patch, bool) -> Result<(), SedimentError>,
    {
        let start = (oid.clone(), Timestamp::min());
        for ((key_oid, timestamp), record) in self.primary.range(start..) {
            if key_oid != oid {
                break;
            }
            if let Some(to) = to {
                if timestamp > to {
                    break;
                }
            }
            f(timestamp, &record.data, record.is_local)?;
        }
        Ok(())
    }

    /// Visit every operation stamped at or before `before`, across all
    /// documents.
    pub fn for_each<F>(&self, before: Option<&Timestamp>, mut f: F) -> Result<(), SedimentError>
    where
        F: FnMut(&Oid, &Timestamp, &Patch, bool) -> Result<(), SedimentError>,
    {
        for ((oid, timestamp), record) in &self.primary {
            if let Some(before) = before {
                if timestamp > before {
                    continue;
                }
            }
            f(oid, timestamp, &record.data, record.is_local)?;
        }
        Ok(())
    }

    /// Whether any operation for `oid` remains after `after` (exclusive).
    pub fn has_after(&self, oid: &Oid, after: &Timestamp) -> bool {
        self.primary
            .range((oid.clone(), after.clone())..)
            .take_while(|((key_oid, _), _)| key_oid == oid)
            .any(|((_, timestamp), _)| timestamp > after)
    }

    pub fn remove(&mut self, oid: &Oid, timestamp: &Timestamp) -> bool {
        let removed = self
            .primary
            .remove(&(oid.clone(), timestamp.clone()))
            .is_some();
        if removed {
            self.by_document
                .remove(&(oid.document_root(), timestamp.clone(), oid.clone()));
        }
        removed
    }

    pub fn reset(&mut self) {
        self.primary.clear();
        self.by_document.clear();
    }

    pub fn export_rows(&self) -> Vec<StoredOperation> {
        self.primary
            .iter()
            .map(|((oid, timestamp), record)| StoredOperation {
                oid: oid.clone(),
                timestamp: timestamp.clone(),
                data: record.data.clone(),
                is_local: record.is_local,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }
}

/// Baselines keyed by oid. Oids of one document share their document-root
/// prefix, so per-document access is a contiguous range scan.
#[derive(Debug, Default, Clone)]
pub(crate) struct BaselinesStore {
    by_oid: BTreeMap<Oid, DocumentBaseline>,
}

impl BaselinesStore {
    pub fn get(&self, oid: &Oid) -> Option<&DocumentBaseline> {
        self.by_oid.get(oid)
    }

    pub fn set(&mut self, baseline: DocumentBaseline) {
        self.by_oid.insert(baseline.oid.clone(), baseline);
    }

    pub fn set_all(&mut self, baselines: Vec<DocumentBaseline>) {
        for baseline in baselines {
            self.set(baseline);
        }
    }

    pub fn delete(&mut self, oid: &Oid) -> bool {
        self.by_oid.remove(oid).is_some()
    }

    pub fn for_each_for_document<F>(&self, root: &Oid, mut f: F) -> Result<(), SedimentError>
    where
        F: FnMut(&DocumentBaseline) -> Result<(), SedimentError>,
    {
        for (oid, baseline) in self.by_oid.range(root.clone()..) {
            if !oid.as_str().starts_with(root.as_str()) {
                break;
            }
            if &oid.document_root() == root {
                f(baseline)?;
            }
        }
        Ok(())
    }

    pub fn get_all_for_document(&self, root: &Oid) -> Vec<DocumentBaseline> {
        let mut out = Vec::new();
        // infallible visitor
        let _ = self.for_each_for_document(root, |baseline| {
            out.push(baseline.clone());
            Ok(())
        });
        out
    }

    pub fn reset(&mut self) {
        self.by_oid.clear();
    }

    pub fn export_rows(&self) -> Vec<DocumentBaseline> {
        self.by_oid.values().cloned().collect()
    }
}

/// One consistent read-write cut over both history tables. Rebase runs
/// entirely inside a single `Txn`, so no reader can observe a half-folded
/// document.
pub(crate) struct Txn<'a> {
    pub ops: &'a mut OperationsStore,
    pub baselines: &'a mut BaselinesStore,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Hlc;
    use crate::normalize::PropValue;
    use pretty_assertions::assert_eq;

    fn oid(s: &str) -> Oid {
        Oid::parse(s).unwrap()
    }

    fn clock() -> Hlc {
        Hlc::new(ReplicaId::random(), 1)
    }

    fn set_op(oid_str: &str, clock: &mut Hlc, n: i64) -> Operation {
        Operation::set(oid(oid_str), clock, "v", PropValue::Scalar(n.into()))
    }

    #[test]
    fn add_operations_dedupes_and_reports_roots() {
        let mut store = OperationsStore::default();
        let mut clock = clock();
        let a = set_op("todo/a:x", &mut clock, 1);
        let b = set_op("list/b:y#sub", &mut clock, 2);
        let roots = store.add_operations(vec![a.clone(), b, a.clone()], true);
        let mut roots: Vec<_> = roots.into_iter().collect();
        roots.sort_unstable();
        assert_eq!(roots, vec![oid("list/b"), oid("todo/a")]);

        // a second insert of the same key is dropped
        let roots = store.add_operations(vec![a], false);
        assert!(roots.is_empty());
        assert_eq!(store.export_rows().len(), 2);
    }

    #[test]
    fn entity_scans_are_timestamp_ordered_runs() {
        let mut store = OperationsStore::default();
        let mut clock = clock();
        let early = set_op("todo/a:x", &mut clock, 1);
        let late = set_op("todo/a:x", &mut clock, 2);
        let other = set_op("todo/a:x#sub", &mut clock, 3);
        // insert out of order
        store.add_operations(vec![late.clone(), other, early.clone()], true);

        let mut seen = Vec::new();
        store
            .for_each_for_entity(&oid("todo/a:x"), None, |timestamp, _, _| {
                seen.push(timestamp.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![early.timestamp.clone(), late.timestamp.clone()]);

        // truncation is inclusive
        let mut seen = Vec::new();
        store
            .for_each_for_entity(&oid("todo/a:x"), Some(&early.timestamp), |timestamp, _, _| {
                seen.push(timestamp.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![early.timestamp]);
    }

    #[test]
    fn document_scans_interleave_oids_by_timestamp() {
        let mut store = OperationsStore::default();
        let mut clock = clock();
        let first = set_op("todo/a:x", &mut clock, 1);
        let second = set_op("todo/a:x#sub", &mut clock, 2);
        let third = set_op("todo/a:x", &mut clock, 3);
        let unrelated = set_op("todo/ab:z", &mut clock, 4);
        store.add_operations(vec![third.clone(), unrelated, first.clone(), second.clone()], true);

        let mut seen = Vec::new();
        store
            .for_each_for_document(&oid("todo/a"), None, |op_oid, timestamp, _, _| {
                seen.push((op_oid.clone(), timestamp.clone()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (first.oid, first.timestamp),
                (second.oid, second.timestamp),
                (third.oid, third.timestamp),
            ]
        );
    }

    #[test]
    fn remove_and_has_after() {
        let mut store = OperationsStore::default();
        let mut clock = clock();
        let early = set_op("todo/a:x", &mut clock, 1);
        let late = set_op("todo/a:x", &mut clock, 2);
        store.add_operations(vec![early.clone(), late.clone()], true);

        assert!(store.has_after(&oid("todo/a:x"), &early.timestamp));
        assert!(!store.has_after(&oid("todo/a:x"), &late.timestamp));

        assert!(store.remove(&early.oid, &early.timestamp));
        assert!(!store.remove(&early.oid, &early.timestamp));

        let mut count = 0;
        store
            .for_each_for_document(&oid("todo/a"), None, |_, _, _, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn baseline_document_scan_respects_the_root_boundary() {
        let mut store = BaselinesStore::default();
        let mut clock = clock();
        for oid_str in ["todo/a:x", "todo/a:x#sub", "todo/ab:z"] {
            store.set(DocumentBaseline {
                oid: oid(oid_str),
                snapshot: None,
                timestamp: clock.now(),
            });
        }
        let found: Vec<_> = store
            .get_all_for_document(&oid("todo/a"))
            .into_iter()
            .map(|b| b.oid)
            .collect();
        assert_eq!(found, vec![oid("todo/a:x"), oid("todo/a:x#sub")]);
    }
}
