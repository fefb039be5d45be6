use crate::error::SedimentError;
use crate::normalize::{NormalizedObject, PropValue};
use crate::patch::{Operation, Patch, Prop, RemoveTarget};
use crate::value::ScalarValue;

/// Apply one patch to the current shallow value of its target sub-object.
///
/// An absent base is only meaningful for `initialize`; every other patch on
/// an absent base is a no-op, so a deleted sub-object stays deleted until a
/// later initialize re-introduces it. Shape-mismatched patches (a list patch
/// aimed at a map after a schema reshape) are logged and skipped rather than
/// failing the whole replay.
pub fn apply_patch(
    base: Option<NormalizedObject>,
    patch: &Patch,
) -> Result<Option<NormalizedObject>, SedimentError> {
    match (base, patch) {
        (_, Patch::Initialize { value }) => Ok(Some(value.clone())),
        (None, _) => {
            tracing::trace!(?patch, "patch targets an absent sub-object, skipping");
            Ok(None)
        }
        (Some(_), Patch::Delete) => Ok(None),
        (Some(mut cur), patch) => {
            apply_to(&mut cur, patch)?;
            Ok(Some(cur))
        }
    }
}

/// Fold a timestamp-ordered run of operations over a base. Each patch is
/// applied to the accumulated result, not the original base; the caller is
/// responsible for the ordering, no re-sort happens here.
pub fn apply_operations(
    base: Option<NormalizedObject>,
    ops: &[Operation],
) -> Result<Option<NormalizedObject>, SedimentError> {
    let mut cur = base;
    for op in ops {
        cur = apply_patch(cur, &op.data)?;
    }
    Ok(cur)
}

fn apply_to(cur: &mut NormalizedObject, patch: &Patch) -> Result<(), SedimentError> {
    match patch {
        Patch::Set { name, value } => match (cur, name) {
            (NormalizedObject::Map(entries), Prop::Map(key)) => {
                entries.insert(key.clone(), value.clone());
            }
            (NormalizedObject::List(items), Prop::Seq(index)) => {
                if *index >= items.len() {
                    items.resize(index + 1, PropValue::Scalar(ScalarValue::Null));
                }
                items[*index] = value.clone();
            }
            (_, name) => {
                tracing::warn!(%name, "set addressed the wrong shape, skipping");
            }
        },
        Patch::Remove { name } => match cur {
            NormalizedObject::Map(entries) => {
                entries.remove(name);
            }
            NormalizedObject::List(_) => {
                tracing::warn!(%name, "remove targets a list, skipping");
            }
        },
        Patch::ListPush { value } => {
            if let Some(items) = as_list(cur, "list-push") {
                items.push(value.clone());
            }
        }
        Patch::ListInsert { index, values } => {
            if values.is_empty() {
                return Err(SedimentError::EmptyListInsert);
            }
            if let Some(items) = as_list(cur, "list-insert") {
                let at = (*index).min(items.len());
                items.splice(at..at, values.iter().cloned());
            }
        }
        Patch::ListDelete { index, count } => {
            if let Some(items) = as_list(cur, "list-delete") {
                let start = (*index).min(items.len());
                let end = index.saturating_add(*count).min(items.len());
                items.drain(start..end);
            }
        }
        Patch::ListMoveByIndex { from, to } => {
            if let Some(items) = as_list(cur, "list-move-by-index") {
                if *from < items.len() {
                    let value = items.remove(*from);
                    let at = (*to).min(items.len());
                    items.insert(at, value);
                }
            }
        }
        Patch::ListMoveByRef { value, index } => {
            if let Some(items) = as_list(cur, "list-move-by-ref") {
                if let Some(from) = items.iter().position(|pv| pv.ref_id() == Some(&value.id)) {
                    let moved = items.remove(from);
                    let at = (*index).min(items.len());
                    items.insert(at, moved);
                }
            }
        }
        Patch::ListRemove { value, only } => {
            if let Some(items) = as_list(cur, "list-remove") {
                match only {
                    None | Some(RemoveTarget::All) => {
                        items.retain(|pv| !matches_value(pv, value));
                    }
                    Some(RemoveTarget::First) => {
                        if let Some(at) = items.iter().position(|pv| matches_value(pv, value)) {
                            items.remove(at);
                        }
                    }
                    Some(RemoveTarget::Last) => {
                        if let Some(at) = items.iter().rposition(|pv| matches_value(pv, value)) {
                            items.remove(at);
                        }
                    }
                }
            }
        }
        Patch::ListAdd { value } => {
            if let Some(items) = as_list(cur, "list-add") {
                if !items.iter().any(|pv| matches_value(pv, value)) {
                    items.push(value.clone());
                }
            }
        }
        // handled by the caller before dispatching here
        Patch::Initialize { .. } | Patch::Delete => {}
    }
    Ok(())
}

fn as_list<'a>(cur: &'a mut NormalizedObject, op: &str) -> Option<&'a mut Vec<PropValue>> {
    match cur {
        NormalizedObject::List(items) => Some(items),
        NormalizedObject::Map(_) => {
            tracing::warn!(op, "list patch targets a non-list, skipping");
            None
        }
    }
}

/// References match by identity, everything else by equality.
fn matches_value(candidate: &PropValue, wanted: &PropValue) -> bool {
    match (candidate.ref_id(), wanted.ref_id()) {
        (Some(a), Some(b)) => a == b,
        (None, None) => candidate == wanted,
        _ => false,
    }
}
