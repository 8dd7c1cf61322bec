use std::io::{self, Read, Write};

use super::{CacheStore, LocalCache};

pub struct BincodeStore;

impl CacheStore for BincodeStore {
    fn open<R: Read>(&self, reader: R) -> io::Result<LocalCache> {
        bincode::deserialize_from(reader).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn save<W: Write>(&self, cache: &LocalCache, writer: W) -> io::Result<()> {
        bincode::serialize_into(writer, cache).map_err(io::Error::other)
    }
}
