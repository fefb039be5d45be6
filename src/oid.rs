use crate::error::{InvalidOid, InvalidReplicaId};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use smol_str::SmolStr;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;
use tinyvec::{ArrayVec, TinyVec};

/// An object identifier naming one addressable sub-object of a document.
///
/// The grammar is `collection '/' docId (':' subId ('#' path)?)?`. Every oid
/// belonging to one document shares the `collection '/' docId` prefix, so the
/// document grouping key is always recoverable by lexical truncation and the
/// stores never need a lookup to route an oid.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(SmolStr);

impl Oid {
    pub fn parse(s: &str) -> Result<Oid, InvalidOid> {
        let slash = match s.find('/') {
            Some(0) | None => return Err(InvalidOid(s.into())),
            Some(i) => i,
        };
        let rest = &s[slash + 1..];
        if rest.is_empty() || rest.contains('/') {
            return Err(InvalidOid(s.into()));
        }
        let colon = rest.find(':');
        let hash = rest.find('#');
        match (colon, hash) {
            // `#path` is only valid after a `:subId`
            (None, Some(_)) => return Err(InvalidOid(s.into())),
            (Some(c), Some(h)) if h < c => return Err(InvalidOid(s.into())),
            (Some(c), h) => {
                let doc_id = &rest[..c];
                let sub_end = h.unwrap_or(rest.len());
                let sub_id = &rest[c + 1..sub_end];
                if doc_id.is_empty() || sub_id.is_empty() {
                    return Err(InvalidOid(s.into()));
                }
                if let Some(h) = h {
                    if rest[h + 1..].is_empty() {
                        return Err(InvalidOid(s.into()));
                    }
                }
            }
            (None, None) => {}
        }
        Ok(Oid(SmolStr::new(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The root of this oid's document timeline: everything before the
    /// key-path marker. `todo/a:x#items.1` becomes `todo/a:x`.
    pub fn root(&self) -> Oid {
        match self.0.find('#') {
            Some(i) => Oid(SmolStr::new(&self.0[..i])),
            None => self.clone(),
        }
    }

    /// The document grouping key: everything before the sub-identifier.
    /// `todo/a:x#items.1` becomes `todo/a`.
    pub fn document_root(&self) -> Oid {
        match self.0.find(|c| c == ':' || c == '#') {
            Some(i) => Oid(SmolStr::new(&self.0[..i])),
            None => self.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        !self.0.contains('#')
    }

    pub fn is_document_root(&self) -> bool {
        !self.0.contains(':') && !self.0.contains('#')
    }

    /// Key-path derivation: the oid of the sub-object living at `key` below
    /// this one. Starts a `#path` on roots and extends the dotted path
    /// otherwise.
    pub fn sub(&self, key: &str) -> Oid {
        if self.0.contains('#') {
            Oid(SmolStr::new(format!("{}.{}", self.0, key)))
        } else {
            Oid(SmolStr::new(format!("{}#{}", self.0, key)))
        }
    }

    pub fn sub_index(&self, index: usize) -> Oid {
        self.sub(&index.to_string())
    }

    /// A fresh identity below this oid's root. Used when an object at an
    /// existing key path must be given a genuinely new identity, where the
    /// path-derived oid would collide with the value being replaced.
    pub fn random_sub(&self) -> Oid {
        let id = uuid::Uuid::new_v4();
        self.root().sub(&hex::encode(&id.as_bytes()[..4]))
    }

    pub(crate) fn min() -> Oid {
        Oid(SmolStr::default())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Oid").field(&self.0.as_str()).finish()
    }
}

impl FromStr for Oid {
    type Err = InvalidOid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Oid::parse(s)
    }
}

impl TryFrom<&str> for Oid {
    type Error = InvalidOid;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Oid::parse(s)
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Oid::parse(&s).map_err(de::Error::custom)
    }
}

/// A replica id is a sequence of bytes. By default we use a uuid which can be
/// nicely stack allocated; longer caller-provided identifiers spill onto the
/// heap, which is still fine.
#[derive(Eq, PartialEq, Hash, Clone, PartialOrd, Ord)]
pub struct ReplicaId(TinyVec<[u8; 16]>);

impl ReplicaId {
    pub fn random() -> ReplicaId {
        ReplicaId(TinyVec::from(*uuid::Uuid::new_v4().as_bytes()))
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(&self.0)
    }
}

impl TryFrom<&str> for ReplicaId {
    type Error = InvalidReplicaId;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        hex::decode(s)
            .map(ReplicaId::from)
            .map_err(|_| InvalidReplicaId(s.into()))
    }
}

impl From<&[u8]> for ReplicaId {
    fn from(b: &[u8]) -> Self {
        ReplicaId(TinyVec::from(b))
    }
}

impl From<Vec<u8>> for ReplicaId {
    fn from(b: Vec<u8>) -> Self {
        let inner = if let Ok(arr) = ArrayVec::try_from(b.as_slice()) {
            TinyVec::Inline(arr)
        } else {
            TinyVec::Heap(b)
        };
        ReplicaId(inner)
    }
}

impl FromStr for ReplicaId {
    type Err = InvalidReplicaId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReplicaId::try_from(s)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReplicaId")
            .field(&self.to_hex_string())
            .finish()
    }
}

impl Serialize for ReplicaId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> Deserialize<'de> for ReplicaId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ReplicaId::try_from(s.as_str()).map_err(de::Error::custom)
    }
}
