use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use blob::BlobFileStorage;
pub use memory::MemoryStorage;

use crate::object::ObjId;

pub type StreamReader = Box<dyn AsyncRead + Unpin + Send>;

mod blob;
mod memory;

/// Raw byte store keyed by object id.
///
/// Backends store whatever bytes they are given; compression, encryption and
/// integrity checks are layered on top by [`crate::datastore::Datastore`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Opens the bytes stored under `key`, failing with
    /// [`io::ErrorKind::NotFound`] when there are none.
    async fn get(&self, key: &ObjId) -> io::Result<StreamReader>;

    async fn put(&self, key: &ObjId, reader: StreamReader, len: u64) -> io::Result<()>;

    async fn contains(&self, key: &ObjId) -> io::Result<bool>;
}

pub(crate) fn not_found(key: &ObjId) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("object {key} not stored"))
}
