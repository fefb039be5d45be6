use crate::clock::Hlc;
use crate::error::SedimentError;
use crate::normalize::{normalize, NormalizedObject, PropValue};
use crate::oid::Oid;
use crate::patch::{Operation, Patch, Prop};
use crate::value::Value;
use itertools::Itertools;

/// Knobs for [`diff_to_patches`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    /// Adopt the old object's identity when the new tree carries none at the
    /// same slot, instead of reassigning. With this off, an unstamped object
    /// replacing a stamped one is a new sub-object: initialized under a fresh
    /// oid, with the old one deleted.
    pub merge_unknown_objects: bool,
    /// Treat properties absent from the new tree as untouched rather than
    /// removed. This is how defaulting-style schema updates avoid erasing
    /// fields they do not mention.
    pub default_undefined: bool,
}

/// Compute the ordered operations that turn `from` into `to`.
///
/// Both roots must be containers of the same shape; `to` is stamped with
/// identities as the walk decides them, so diffing the same tree again
/// addresses the same sub-objects. Stamps come from `clock` in emission
/// order, which makes the returned list timestamp-ordered.
pub fn diff_to_patches(
    from: &Value,
    to: &mut Value,
    clock: &mut Hlc,
    options: DiffOptions,
) -> Result<Vec<Operation>, SedimentError> {
    let root = match (from.maybe_get_oid(), to.maybe_get_oid()) {
        (_, Some(oid)) => oid.clone(),
        (Some(oid), None) => oid.clone(),
        (None, None) => return Err(SedimentError::MissingRootOid),
    };
    to.assign_oid(root.clone());
    let mut out = Vec::new();
    diff_containers(from, to, &root, clock, options, &mut out)?;
    Ok(out)
}

/// Normalize `value` under `root` and emit one `initialize` per resulting
/// sub-object, parents first.
pub fn initial_to_patches(
    value: &mut Value,
    root: &Oid,
    clock: &mut Hlc,
) -> Result<Vec<Operation>, SedimentError> {
    value.assign_oid(root.clone());
    let normalized = normalize(value)?;
    Ok(normalized
        .into_iter()
        .sorted_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(oid, shallow)| Operation::initialize(oid, clock, shallow))
        .collect())
}

fn diff_containers(
    from: &Value,
    to: &mut Value,
    oid: &Oid,
    clock: &mut Hlc,
    options: DiffOptions,
    out: &mut Vec<Operation>,
) -> Result<(), SedimentError> {
    match (from, to) {
        (Value::List { items: from_items, .. }, Value::List { items: to_items, .. }) => {
            for (index, to_item) in to_items.iter_mut().enumerate() {
                diff_item(
                    Prop::Seq(index),
                    from_items.get(index),
                    to_item,
                    oid,
                    clock,
                    options,
                    out,
                )?;
            }
            if from_items.len() > to_items.len() {
                for dropped in &from_items[to_items.len()..] {
                    if let Some(old_oid) = dropped.maybe_get_oid() {
                        out.push(Operation::delete(old_oid.clone(), clock));
                    }
                }
                out.push(Operation::list_delete(
                    oid.clone(),
                    clock,
                    to_items.len(),
                    from_items.len() - to_items.len(),
                ));
            }
            Ok(())
        }
        (Value::Map { entries: from_entries, .. }, Value::Map { entries: to_entries, .. }) => {
            for key in to_entries.keys().cloned().sorted() {
                if let Some(to_item) = to_entries.get_mut(&key) {
                    diff_item(
                        Prop::Map(key.clone()),
                        from_entries.get(&key),
                        to_item,
                        oid,
                        clock,
                        options,
                        out,
                    )?;
                }
            }
            if !options.default_undefined {
                for key in from_entries
                    .keys()
                    .filter(|key| !to_entries.contains_key(*key))
                    .sorted()
                {
                    out.push(Operation::remove(oid.clone(), clock, key));
                }
            }
            Ok(())
        }
        _ => Err(SedimentError::ShapeConflict { oid: oid.clone() }),
    }
}

fn diff_item(
    name: Prop,
    old: Option<&Value>,
    new: &mut Value,
    parent: &Oid,
    clock: &mut Hlc,
    options: DiffOptions,
    out: &mut Vec<Operation>,
) -> Result<(), SedimentError> {
    match new {
        Value::Scalar(new_scalar) => {
            match old {
                Some(Value::Scalar(old_scalar)) if *old_scalar == *new_scalar => {}
                old => {
                    out.push(Operation::set(
                        parent.clone(),
                        clock,
                        name,
                        PropValue::Scalar(new_scalar.clone()),
                    ));
                    // a scalar displacing an object tombstones the object
                    if let Some(old_oid) = old.and_then(Value::maybe_get_oid) {
                        out.push(Operation::delete(old_oid.clone(), clock));
                    }
                }
            }
            Ok(())
        }
        Value::Map { .. } | Value::List { .. } => {
            let old_oid = old.and_then(Value::maybe_get_oid).cloned();
            let value_oid = match (new.maybe_get_oid(), &old_oid) {
                (Some(oid), _) => oid.clone(),
                (None, Some(old_oid)) if options.merge_unknown_objects => old_oid.clone(),
                (None, _) => ensure_new_oid(parent, &name, old_oid.as_ref()),
            };
            new.assign_oid(value_oid.clone());
            match old {
                // identity preserved, diff within the sub-object
                Some(old_value) if old_oid.as_ref() == Some(&value_oid) => {
                    diff_containers(old_value, new, &value_oid, clock, options, out)
                }
                _ => {
                    out.extend(initial_to_patches(new, &value_oid, clock)?);
                    out.push(Operation::set(
                        parent.clone(),
                        clock,
                        name,
                        PropValue::reference(value_oid),
                    ));
                    if let Some(old_oid) = old_oid {
                        out.push(Operation::delete(old_oid, clock));
                    }
                    Ok(())
                }
            }
        }
    }
}

/// The identity of a brand-new object at `name`: path-derived so that fresh
/// slots get stable, content-addressed ids, falling back to a random one when
/// the derived id would collide with the identity being replaced.
fn ensure_new_oid(parent: &Oid, name: &Prop, old_oid: Option<&Oid>) -> Oid {
    let derived = parent.sub(&name.to_string());
    if old_oid == Some(&derived) {
        parent.random_sub()
    } else {
        derived
    }
}

/// Diff two already-normalized values for the same oid. No recursion happens
/// here; nested objects cannot occur in a [`NormalizedObject`], references
/// are compared by identity.
pub fn shallow_diff(
    oid: &Oid,
    from: &NormalizedObject,
    to: &NormalizedObject,
    clock: &mut Hlc,
    options: DiffOptions,
) -> Result<Vec<Operation>, SedimentError> {
    let mut out = Vec::new();
    match (from, to) {
        (NormalizedObject::Map(from_entries), NormalizedObject::Map(to_entries)) => {
            for key in to_entries.keys().sorted() {
                let slot = &to_entries[key];
                if from_entries.get(key) != Some(slot) {
                    out.push(Operation::set(
                        oid.clone(),
                        clock,
                        Prop::Map(key.clone()),
                        slot.clone(),
                    ));
                }
            }
            if !options.default_undefined {
                for key in from_entries
                    .keys()
                    .filter(|key| !to_entries.contains_key(*key))
                    .sorted()
                {
                    out.push(Operation::remove(oid.clone(), clock, key));
                }
            }
        }
        (NormalizedObject::List(from_items), NormalizedObject::List(to_items)) => {
            for (index, slot) in to_items.iter().enumerate() {
                if from_items.get(index) != Some(slot) {
                    out.push(Operation::set(
                        oid.clone(),
                        clock,
                        Prop::Seq(index),
                        slot.clone(),
                    ));
                }
            }
            if from_items.len() > to_items.len() {
                for dropped in &from_items[to_items.len()..] {
                    if let Some(id) = dropped.ref_id() {
                        out.push(Operation::delete(id.clone(), clock));
                    }
                }
                out.push(Operation::list_delete(
                    oid.clone(),
                    clock,
                    to_items.len(),
                    from_items.len() - to_items.len(),
                ));
            }
        }
        _ => return Err(SedimentError::ShapeConflict { oid: oid.clone() }),
    }
    Ok(out)
}
