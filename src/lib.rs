//! The synchronization and persistence core of a local-first document store.
//!
//! Applications edit richly nested documents; this crate records every edit
//! as a fine-grained, timestamped operation, reconstructs documents by
//! replaying operations over consolidated snapshots (baselines), and folds
//! acknowledged history away so local state stays bounded.
//!
//! The moving parts, bottom up:
//!
//! - [`Oid`] names one addressable sub-object of a document; [`normalize`]
//!   decomposes a [`Value`] tree into a flat map of oid-keyed shallow
//!   objects, and [`substitute_refs_with_objects`] puts it back together.
//! - [`diff_to_patches`] turns a before/after pair into an ordered list of
//!   [`Operation`]s; [`apply_patch`] replays one against a shallow value.
//! - [`Hlc`] issues timestamps whose lexical order is their temporal order,
//!   so history scans are plain string-range scans.
//! - [`Metadata`] owns the stores and the clock: local and remote inserts,
//!   snapshots, acknowledgments, schema versioning, export, and the rebase
//!   that compacts history under an acknowledgment watermark.
//!
//! ```
//! use sediment::{Metadata, Oid, Value};
//! use std::str::FromStr;
//!
//! let mut store = Metadata::new();
//! let root = Oid::from_str("todo/a:x")?;
//!
//! let mut doc = Value::from(serde_json::json!({ "title": "hi" }));
//! let ops = store.initialize_document(&root, &mut doc)?;
//! store.insert_local_operation(ops)?;
//!
//! let snapshot = store.get_document_snapshot(&Oid::from_str("todo/a")?)?;
//! assert_eq!(snapshot, Some(doc));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
mod apply;
mod clock;
mod diff;
mod error;
mod metadata;
mod normalize;
mod oid;
mod patch;
mod rebase;
mod store;
mod value;

pub use apply::{apply_operations, apply_patch};
pub use clock::{Hlc, Timestamp};
pub use diff::{diff_to_patches, initial_to_patches, shallow_diff, DiffOptions};
pub use error::{InvalidOid, InvalidReplicaId, SedimentError};
pub use metadata::{EventHandlerId, Metadata, MetadataEvent, MetadataOptions, SyncMessage};
pub use normalize::{
    normalize, substitute_refs_with_objects, NormalizedObject, ObjectRef, PropValue,
};
pub use oid::{Oid, ReplicaId};
pub use patch::{Operation, Patch, Prop, RemoveTarget, StoredOperation};
pub use store::{DocumentBaseline, ExportData, LocalReplicaInfo, Schema};
pub use value::{ScalarValue, Value};
