use std::io;

use thiserror::Error;

use crate::object::ObjId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The payload bytes do not have the expected tagged-tuple shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The payload carries a type tag this version does not understand.
    #[error("unknown object type {0:?}")]
    UnknownObjectType(String),

    #[error("object {objid} of type {obj_type} cannot be restored on its own")]
    UnsupportedObject {
        objid: ObjId,
        obj_type: &'static str,
    },

    /// The object could not be fetched, opened or verified from the backing store.
    #[error("corrupted repository: object {objid}: {reason}")]
    CorruptedRepository { objid: ObjId, reason: String },

    #[error("object {0} is encrypted but no private key was given")]
    KeyRequired(ObjId),

    #[error("snapshot not found: {0:?}")]
    SnapshotNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn corrupted(objid: ObjId, reason: impl ToString) -> Self {
        Error::CorruptedRepository {
            objid,
            reason: reason.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(value: bincode::Error) -> Self {
        Error::Serialization(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serialization(value.to_string())
    }
}
