use crate::clock::{Hlc, Timestamp};
use crate::normalize::{NormalizedObject, ObjectRef, PropValue};
use crate::oid::Oid;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// A property name or an array slot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum Prop {
    Map(SmolStr),
    Seq(usize),
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prop::Map(s) => write!(f, "{}", s),
            Prop::Seq(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for Prop {
    fn from(p: &str) -> Self {
        Prop::Map(p.into())
    }
}

impl From<usize> for Prop {
    fn from(index: usize) -> Self {
        Prop::Seq(index)
    }
}

/// Which occurrences a `list-remove` takes out. An absent target removes
/// every match.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoveTarget {
    First,
    Last,
    All,
}

/// A single mutation of one addressable sub-object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Patch {
    /// Create or replace the entire sub-object.
    Initialize { value: NormalizedObject },
    /// Set a property or array slot.
    Set { name: Prop, value: PropValue },
    /// Delete a property. Objects only.
    Remove { name: SmolStr },
    ListPush {
        value: PropValue,
    },
    ListInsert {
        index: usize,
        values: Vec<PropValue>,
    },
    ListDelete {
        index: usize,
        count: usize,
    },
    ListMoveByIndex {
        from: usize,
        to: usize,
    },
    ListMoveByRef {
        value: ObjectRef,
        index: usize,
    },
    ListRemove {
        value: PropValue,
        #[serde(skip_serializing_if = "Option::is_none")]
        only: Option<RemoveTarget>,
    },
    /// Set-style append: only when no equal element is present already.
    ListAdd {
        value: PropValue,
    },
    /// Mark the sub-object deleted; it materializes as absent.
    Delete,
}

/// One timestamped mutation targeting one oid. Operations for a document
/// total-order by timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Operation {
    pub oid: Oid,
    pub timestamp: Timestamp,
    pub data: Patch,
}

impl Operation {
    pub fn new(oid: Oid, timestamp: Timestamp, data: Patch) -> Operation {
        Operation {
            oid,
            timestamp,
            data,
        }
    }

    pub fn initialize(oid: Oid, clock: &mut Hlc, value: NormalizedObject) -> Operation {
        Operation::new(oid, clock.now(), Patch::Initialize { value })
    }

    pub fn set(oid: Oid, clock: &mut Hlc, name: impl Into<Prop>, value: impl Into<PropValue>) -> Operation {
        Operation::new(
            oid,
            clock.now(),
            Patch::Set {
                name: name.into(),
                value: value.into(),
            },
        )
    }

    pub fn remove(oid: Oid, clock: &mut Hlc, name: &str) -> Operation {
        Operation::new(oid, clock.now(), Patch::Remove { name: name.into() })
    }

    pub fn list_push(oid: Oid, clock: &mut Hlc, value: impl Into<PropValue>) -> Operation {
        Operation::new(
            oid,
            clock.now(),
            Patch::ListPush {
                value: value.into(),
            },
        )
    }

    pub fn list_insert(oid: Oid, clock: &mut Hlc, index: usize, value: impl Into<PropValue>) -> Operation {
        Operation::list_insert_many(oid, clock, index, vec![value.into()])
    }

    pub fn list_insert_many(
        oid: Oid,
        clock: &mut Hlc,
        index: usize,
        values: Vec<PropValue>,
    ) -> Operation {
        Operation::new(oid, clock.now(), Patch::ListInsert { index, values })
    }

    pub fn list_delete(oid: Oid, clock: &mut Hlc, index: usize, count: usize) -> Operation {
        Operation::new(oid, clock.now(), Patch::ListDelete { index, count })
    }

    pub fn list_move_by_index(oid: Oid, clock: &mut Hlc, from: usize, to: usize) -> Operation {
        Operation::new(oid, clock.now(), Patch::ListMoveByIndex { from, to })
    }

    pub fn list_move_by_ref(oid: Oid, clock: &mut Hlc, value: ObjectRef, index: usize) -> Operation {
        Operation::new(oid, clock.now(), Patch::ListMoveByRef { value, index })
    }

    pub fn list_remove(
        oid: Oid,
        clock: &mut Hlc,
        value: impl Into<PropValue>,
        only: Option<RemoveTarget>,
    ) -> Operation {
        Operation::new(
            oid,
            clock.now(),
            Patch::ListRemove {
                value: value.into(),
                only,
            },
        )
    }

    pub fn list_add(oid: Oid, clock: &mut Hlc, value: impl Into<PropValue>) -> Operation {
        Operation::new(
            oid,
            clock.now(),
            Patch::ListAdd {
                value: value.into(),
            },
        )
    }

    pub fn delete(oid: Oid, clock: &mut Hlc) -> Operation {
        Operation::new(oid, clock.now(), Patch::Delete)
    }
}

/// An operation as it sits in the local store: the wire operation plus the
/// local-origin flag used when deciding what to send upstream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredOperation {
    pub oid: Oid,
    pub timestamp: Timestamp,
    pub data: Patch,
    pub is_local: bool,
}

impl StoredOperation {
    pub fn operation(&self) -> Operation {
        Operation {
            oid: self.oid.clone(),
            timestamp: self.timestamp.clone(),
            data: self.data.clone(),
        }
    }
}

impl From<StoredOperation> for Operation {
    fn from(stored: StoredOperation) -> Self {
        Operation {
            oid: stored.oid,
            timestamp: stored.timestamp,
            data: stored.data,
        }
    }
}
