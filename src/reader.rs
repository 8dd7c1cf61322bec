use std::{
    fs::File,
    io::{self, Read},
    ops::Deref,
    path::Path,
};

use fastcdc::v2020::{
    AVERAGE_MAX, AVERAGE_MIN, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN, StreamCDC,
};
use fs2::FileExt;

use crate::error::{Error, Result};

/// Holds a shared lock on a source file for as long as it is read.
pub struct FileLock {
    inner: File,
}

impl FileLock {
    pub fn new(file: File) -> io::Result<Self> {
        FileExt::lock_shared(&file)?;

        Ok(Self { inner: file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.inner);
    }
}

impl Deref for FileLock {
    type Target = File;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Read for FileLock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            min_size: 256 * 1024,
            avg_size: 1024 * 1024,
            max_size: 4 * 1024 * 1024,
        }
    }
}

impl ChunkerConfig {
    /// Checks the sizes against the bounds fastcdc accepts.
    pub fn validate(&self) -> Result<()> {
        let check = |name: &str, value: u32, min: u32, max: u32| {
            if (min..=max).contains(&value) {
                Ok(())
            } else {
                Err(Error::Config(format!(
                    "chunker {name} {value} outside {min}..={max}"
                )))
            }
        };

        check("min_size", self.min_size, MINIMUM_MIN, MINIMUM_MAX)?;
        check("avg_size", self.avg_size, AVERAGE_MIN, AVERAGE_MAX)?;
        check("max_size", self.max_size, MAXIMUM_MIN, MAXIMUM_MAX)?;

        if self.min_size > self.avg_size || self.avg_size > self.max_size {
            return Err(Error::Config(
                "chunker sizes must satisfy min_size <= avg_size <= max_size".to_string(),
            ));
        }

        Ok(())
    }
}

pub struct FileChunk {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Content-defined chunks of one file, in file order.
pub struct Chunker {
    inner: StreamCDC<FileLock>,
}

impl Chunker {
    pub fn open<P: AsRef<Path>>(path: P, config: ChunkerConfig) -> Result<Self> {
        config.validate()?;

        let file = FileLock::new(File::open(path)?)?;
        let inner = StreamCDC::new(file, config.min_size, config.avg_size, config.max_size);

        Ok(Self { inner })
    }
}

impl Iterator for Chunker {
    type Item = io::Result<FileChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.inner.next()?;
        Some(
            chunk
                .map(|chunk| FileChunk {
                    offset: chunk.offset,
                    data: chunk.data,
                })
                .map_err(io::Error::other),
        )
    }
}
