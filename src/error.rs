use crate::oid::Oid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SedimentError {
    #[error("mismatched shapes under `{oid}`: cannot diff a list against a map")]
    ShapeConflict { oid: Oid },
    #[error("reference to `{oid}` has no entry in the normalized set")]
    MissingReference { oid: Oid },
    #[error("`{0}` is not a document root oid")]
    NonRootOid(Oid),
    #[error("list-insert must carry at least one value")]
    EmptyListInsert,
    #[error("schema version {version} is already stored with different content")]
    SchemaConflict { version: u64 },
    #[error("cannot normalize a value whose root carries no oid")]
    MissingRootOid,
    #[error(transparent)]
    InvalidOid(#[from] InvalidOid),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid oid format `{0}`")]
pub struct InvalidOid(pub String);

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid replica id `{0}`")]
pub struct InvalidReplicaId(pub String);
