use std::{
    collections::HashMap,
    fmt::Debug,
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::RwLock,
};
use tracing::{instrument, warn};

use crate::{object::ObjId, storage};

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
struct BlobEntry {
    key: ObjId,
    offset: u64,
    length: u64,
}

/// Append-only pack file with a JSON-lines index next to it.
///
/// `objects.bin` holds the stored bytes back to back; `objects.idx` holds one
/// [`BlobEntry`] per line. A later entry for the same key wins.
#[derive(Debug)]
pub struct BlobFileStorage {
    file_path: PathBuf,
    index_path: PathBuf,
    entries: RwLock<HashMap<ObjId, BlobEntry>>,
}

impl BlobFileStorage {
    #[instrument(err)]
    pub async fn new<P: Into<PathBuf> + Debug>(path: P, allow_overwrite: bool) -> io::Result<Self> {
        let file_path = path.into();
        let index_path = file_path.with_extension("idx");

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        for path in [&file_path, &index_path] {
            if allow_overwrite {
                fs::File::create(path).await?;
            } else {
                fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .await?;
            }
        }

        let entries = load_index(&index_path).await?;

        Ok(Self {
            file_path,
            index_path,
            entries: RwLock::new(entries),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

async fn load_index(path: &Path) -> io::Result<HashMap<ObjId, BlobEntry>> {
    let contents = fs::read_to_string(path).await?;

    let mut entries = HashMap::new();
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BlobEntry>(line) {
            Ok(entry) => {
                entries.insert(entry.key, entry);
            }
            // A crash mid-append leaves a torn last line.
            Err(e) => warn!(
                path = %path.display(),
                line = number + 1,
                "skipping unreadable index entry: {e}"
            ),
        }
    }

    Ok(entries)
}

#[async_trait]
impl storage::Storage for BlobFileStorage {
    #[instrument(level = "debug", skip(self, key), fields(key = %key), err(level = "debug"))]
    async fn get(&self, key: &ObjId) -> io::Result<storage::StreamReader> {
        let entry = self
            .entries
            .read()
            .await
            .get(key)
            .copied()
            .ok_or_else(|| storage::not_found(key))?;

        let mut file = fs::File::open(&self.file_path).await?;

        file.seek(SeekFrom::Start(entry.offset)).await?;
        let limited_reader = file.take(entry.length);

        Ok(Box::new(limited_reader))
    }

    #[instrument(level = "debug", skip(self, key, reader), fields(key = %key), err)]
    async fn put(&self, key: &ObjId, mut reader: storage::StreamReader, _len: u64) -> io::Result<()> {
        let mut entries = self.entries.write().await;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await?;

        let offset = file.metadata().await?.len();

        let length = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        let entry = BlobEntry {
            key: *key,
            offset,
            length,
        };
        let mut line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        line.push('\n');

        let mut index = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index_path)
            .await?;
        index.write_all(line.as_bytes()).await?;
        index.flush().await?;

        entries.insert(*key, entry);

        Ok(())
    }

    async fn contains(&self, key: &ObjId) -> io::Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }
}
