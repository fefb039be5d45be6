use crate::error::SedimentError;
use crate::oid::Oid;
use crate::value::{ScalarValue, Value};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// A stand-in for a nested object or list in a parent's normalized form.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    #[serde(rename = "@ref")]
    pub id: Oid,
}

impl ObjectRef {
    pub fn new(id: Oid) -> ObjectRef {
        ObjectRef { id }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref:{}", self.id)
    }
}

/// One slot of a normalized object: a scalar, or a reference to another
/// addressable sub-object. Nested objects never appear inline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum PropValue {
    Ref(ObjectRef),
    Scalar(ScalarValue),
}

impl PropValue {
    pub fn reference(id: Oid) -> PropValue {
        PropValue::Ref(ObjectRef::new(id))
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, PropValue::Ref(_))
    }

    pub fn ref_id(&self) -> Option<&Oid> {
        match self {
            PropValue::Ref(r) => Some(&r.id),
            PropValue::Scalar(_) => None,
        }
    }
}

impl From<ScalarValue> for PropValue {
    fn from(v: ScalarValue) -> Self {
        PropValue::Scalar(v)
    }
}

impl From<ObjectRef> for PropValue {
    fn from(r: ObjectRef) -> Self {
        PropValue::Ref(r)
    }
}

/// The shallow form of a single addressable sub-object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum NormalizedObject {
    Map(FxHashMap<SmolStr, PropValue>),
    List(Vec<PropValue>),
}

impl NormalizedObject {
    pub fn is_list(&self) -> bool {
        matches!(self, NormalizedObject::List(_))
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        match self {
            NormalizedObject::Map(entries) => entries.get(key),
            NormalizedObject::List(_) => None,
        }
    }

    pub fn get_index(&self, index: usize) -> Option<&PropValue> {
        match self {
            NormalizedObject::List(items) => items.get(index),
            NormalizedObject::Map(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NormalizedObject::Map(entries) => entries.len(),
            NormalizedObject::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decompose `value` into a flat set of addressable sub-objects.
///
/// The root must already carry an oid (stamp it with [`Value::assign_oid`]).
/// Every nested map or list without an identity is assigned one derived from
/// its parent's oid and key; the parent slot is replaced by an [`ObjectRef`].
/// Identities already present are kept, so normalizing a clone of a known
/// value addresses the same sub-objects.
pub fn normalize(value: &mut Value) -> Result<FxHashMap<Oid, NormalizedObject>, SedimentError> {
    if value.is_scalar() {
        return Err(SedimentError::MissingRootOid);
    }
    let root = match value.maybe_get_oid() {
        Some(oid) => oid.clone(),
        None => return Err(SedimentError::MissingRootOid),
    };
    let mut out = FxHashMap::default();
    normalize_into(value, &root, &mut out);
    Ok(out)
}

fn normalize_into(value: &mut Value, oid: &Oid, out: &mut FxHashMap<Oid, NormalizedObject>) {
    let shallow = match value {
        Value::Scalar(_) => unreachable!("normalize_into is only called for maps and lists"),
        Value::Map { entries, .. } => NormalizedObject::Map(
            entries
                .iter_mut()
                .map(|(key, child)| {
                    let slot = normalize_slot(child, oid, key, out);
                    (key.clone(), slot)
                })
                .collect(),
        ),
        Value::List { items, .. } => NormalizedObject::List(
            items
                .iter_mut()
                .enumerate()
                .map(|(index, child)| normalize_slot(child, oid, &index.to_string(), out))
                .collect(),
        ),
    };
    out.insert(oid.clone(), shallow);
}

fn normalize_slot(
    child: &mut Value,
    parent: &Oid,
    key: &str,
    out: &mut FxHashMap<Oid, NormalizedObject>,
) -> PropValue {
    match child {
        Value::Scalar(v) => PropValue::Scalar(v.clone()),
        _ => {
            let child_oid = match child.maybe_get_oid() {
                Some(oid) => oid.clone(),
                None => parent.sub(key),
            };
            child.assign_oid(child_oid.clone());
            normalize_into(child, &child_oid, out);
            PropValue::reference(child_oid)
        }
    }
}

/// Materialize the deep value rooted at `root` from a set of normalized
/// sub-objects, re-assigning each value's identity from its key in the set.
///
/// Returns the materialized value together with the oids that were referenced
/// while resolving it, which callers use for reachability analysis. A
/// reference with no entry in `objects` indicates corruption and is fatal.
pub fn substitute_refs_with_objects(
    root: &Oid,
    objects: &FxHashMap<Oid, NormalizedObject>,
) -> Result<(Value, Vec<Oid>), SedimentError> {
    let mut referenced = Vec::new();
    let value = build_value(root, objects, &mut referenced)?;
    Ok((value, referenced))
}

fn build_value(
    oid: &Oid,
    objects: &FxHashMap<Oid, NormalizedObject>,
    referenced: &mut Vec<Oid>,
) -> Result<Value, SedimentError> {
    let shallow = objects.get(oid).ok_or_else(|| SedimentError::MissingReference {
        oid: oid.clone(),
    })?;
    match shallow {
        NormalizedObject::Map(entries) => {
            let mut out = FxHashMap::default();
            for (key, slot) in entries {
                out.insert(key.clone(), resolve_slot(slot, objects, referenced)?);
            }
            Ok(Value::Map {
                oid: Some(oid.clone()),
                entries: out,
            })
        }
        NormalizedObject::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for slot in items {
                out.push(resolve_slot(slot, objects, referenced)?);
            }
            Ok(Value::List {
                oid: Some(oid.clone()),
                items: out,
            })
        }
    }
}

fn resolve_slot(
    slot: &PropValue,
    objects: &FxHashMap<Oid, NormalizedObject>,
    referenced: &mut Vec<Oid>,
) -> Result<Value, SedimentError> {
    match slot {
        PropValue::Scalar(v) => Ok(Value::Scalar(v.clone())),
        PropValue::Ref(r) => {
            referenced.push(r.id.clone());
            build_value(&r.id, objects, referenced)
        }
    }
}
