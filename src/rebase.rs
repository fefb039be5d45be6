use crate::apply::apply_patch;
use crate::clock::Timestamp;
use crate::error::SedimentError;
use crate::metadata::{Metadata, MetadataEvent};
use crate::oid::Oid;
use crate::store::{DocumentBaseline, Txn};
use std::collections::BTreeSet;

impl Metadata {
    /// Fold every operation stamped at or before `watermark` into baselines
    /// and delete the folded rows.
    ///
    /// The written baselines are stamped with the maximum operation
    /// timestamp actually observed below the watermark, not the watermark
    /// itself; that is the contract callers replaying exported history rely
    /// on. The whole run happens over one consistent cut of both tables.
    pub(crate) fn run_rebase(&mut self, watermark: &Timestamp) -> Result<(), SedimentError> {
        if self.closed {
            return Ok(());
        }
        let mut touched = BTreeSet::new();
        let mut t_max: Option<Timestamp> = None;
        self.operations.for_each(Some(watermark), |oid, timestamp, _, _| {
            touched.insert(oid.clone());
            if t_max.as_ref().map_or(true, |max| timestamp > max) {
                t_max = Some(timestamp.clone());
            }
            Ok(())
        })?;
        let t_max = match t_max {
            Some(t_max) => t_max,
            None => return Ok(()),
        };
        tracing::debug!(
            %watermark,
            %t_max,
            entities = touched.len(),
            "folding acknowledged history into baselines"
        );
        let mut new_baselines = Vec::new();
        for oid in touched {
            if self.closed {
                break;
            }
            let mut txn = Txn {
                ops: &mut self.operations,
                baselines: &mut self.baselines,
            };
            if let Some(baseline) = rebase_entity(&mut txn, &oid, &t_max)? {
                new_baselines.push(baseline);
            }
        }
        self.emit(MetadataEvent::Rebase {
            baselines: new_baselines,
        });
        Ok(())
    }
}

/// Fold one sub-object's operations up to `t_max` into its baseline.
fn rebase_entity(
    txn: &mut Txn<'_>,
    oid: &Oid,
    t_max: &Timestamp,
) -> Result<Option<DocumentBaseline>, SedimentError> {
    let existing = txn.baselines.get(oid).cloned();
    let baseline_time = existing.as_ref().map(|b| b.timestamp.clone());
    let mut cur = existing.and_then(|b| b.snapshot);
    let mut folded = Vec::new();
    txn.ops.for_each_for_entity(oid, Some(t_max), |timestamp, patch, _| {
        folded.push(timestamp.clone());
        // anything at or before the baseline stamp was folded already
        if baseline_time.as_ref().map_or(false, |at| timestamp <= at) {
            tracing::trace!(%oid, %timestamp, "operation predates its baseline, dropping");
            return Ok(());
        }
        cur = apply_patch(cur.take(), patch)?;
        Ok(())
    })?;
    for timestamp in &folded {
        txn.ops.remove(oid, timestamp);
    }
    // never regress the stamp: a fold that only dropped stale duplicates
    // must leave the baseline where it was
    let stamp = match &baseline_time {
        Some(at) if at > t_max => at.clone(),
        _ => t_max.clone(),
    };
    if cur.is_some() {
        let baseline = DocumentBaseline {
            oid: oid.clone(),
            snapshot: cur,
            timestamp: stamp,
        };
        txn.baselines.set(baseline.clone());
        Ok(Some(baseline))
    } else if txn.ops.has_after(oid, t_max) {
        // deleted, but later operations still target this oid: keep an
        // explicit tombstone so replay knows the state as of the fold
        let tombstone = DocumentBaseline {
            oid: oid.clone(),
            snapshot: None,
            timestamp: stamp,
        };
        txn.baselines.set(tombstone.clone());
        Ok(Some(tombstone))
    } else {
        txn.baselines.delete(oid);
        Ok(None)
    }
}
