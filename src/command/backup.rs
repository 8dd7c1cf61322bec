use std::{
    collections::HashMap,
    fmt::Debug,
    fs::Metadata,
    path::{Path, PathBuf},
};

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    cache::LocalCache,
    datastore::Datastore,
    error::{Error, Result},
    object::{Chunk, ObjId, Object, TreeEntry},
    platform,
    reader::{Chunker, ChunkerConfig},
};

#[derive(Debug, Default)]
struct Stats {
    files: usize,
    directories: usize,
    bytes: u64,
    skipped: usize,
}

/// Backs up the directory `root` and returns the object id of its tree.
///
/// Blobs go to the datastore only. Trees and inodes go to the datastore and
/// to `cache`, so a restore can run from the cache alone. Entries that cannot
/// be read, and entries that are neither regular files nor directories, are
/// skipped with a warning.
#[instrument(skip(datastore, cache), err)]
pub async fn backup<P: AsRef<Path> + Debug>(
    root: P,
    datastore: &Datastore,
    cache: &mut LocalCache,
    config: ChunkerConfig,
) -> Result<ObjId> {
    let root = root.as_ref();
    config.validate()?;

    if !std::fs::metadata(root)?.is_dir() {
        return Err(Error::Config(format!(
            "backup source {} is not a directory",
            root.display()
        )));
    }

    let mut stats = Stats::default();
    let mut pending: HashMap<PathBuf, Vec<TreeEntry>> = HashMap::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .contents_first(true);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(Error::Io(e.into())),
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                stats.skipped += 1;
                continue;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), "skipping entry without metadata: {e}");
                stats.skipped += 1;
                continue;
            }
        };

        let objid = if metadata.is_dir() {
            let entries = pending.remove(path).unwrap_or_default();
            let objid = store_tree(&metadata, entries, datastore, cache).await?;
            stats.directories += 1;

            if entry.depth() == 0 {
                info!(
                    %objid,
                    files = stats.files,
                    directories = stats.directories,
                    bytes = stats.bytes,
                    skipped = stats.skipped,
                    "backup finished"
                );
                return Ok(objid);
            }
            objid
        } else if metadata.is_file() {
            match backup_file(path, &metadata, datastore, cache, config).await? {
                Some((objid, len)) => {
                    stats.files += 1;
                    stats.bytes += len;
                    objid
                }
                None => {
                    stats.skipped += 1;
                    continue;
                }
            }
        } else {
            warn!(path = %path.display(), "skipping unsupported file type");
            stats.skipped += 1;
            continue;
        };

        let Some(parent) = path.parent() else {
            continue;
        };
        pending
            .entry(parent.to_path_buf())
            .or_default()
            .push(TreeEntry {
                name: platform::name_bytes(entry.file_name()),
                objid,
            });
    }

    // contents_first yields the root last, so this means it was never seen
    Err(Error::Config(format!(
        "backup source {} vanished during the scan",
        root.display()
    )))
}

/// Chunks one file into blobs and stores its inode. Returns `None` when the
/// file could not be read.
async fn backup_file(
    path: &Path,
    metadata: &Metadata,
    datastore: &Datastore,
    cache: &mut LocalCache,
    config: ChunkerConfig,
) -> Result<Option<(ObjId, u64)>> {
    let info = platform::object_info(metadata);

    let chunker = match Chunker::open(path, config) {
        Ok(chunker) => chunker,
        Err(e) => {
            warn!(path = %path.display(), "skipping unreadable file: {e}");
            return Ok(None);
        }
    };

    let mut chunks = Vec::new();
    let mut len = 0;
    for chunk in chunker {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(path = %path.display(), "skipping file that failed mid-read: {e}");
                return Ok(None);
            }
        };

        len += chunk.data.len() as u64;
        let payload = Object::Blob { data: chunk.data }.to_payload()?;
        let objid = datastore.put_object(&payload).await?;
        chunks.push(Chunk {
            offset: chunk.offset,
            objid,
        });
    }

    debug!(path = %path.display(), chunks = chunks.len(), len, "file stored");

    let objid = store(&Object::Inode { info, chunks }, datastore, cache).await?;
    Ok(Some((objid, len)))
}

async fn store_tree(
    metadata: &Metadata,
    mut entries: Vec<TreeEntry>,
    datastore: &Datastore,
    cache: &mut LocalCache,
) -> Result<ObjId> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let tree = Object::Tree {
        info: platform::object_info(metadata),
        entries,
    };
    store(&tree, datastore, cache).await
}

async fn store(object: &Object, datastore: &Datastore, cache: &mut LocalCache) -> Result<ObjId> {
    let payload = object.to_payload()?;
    let objid = datastore.put_object(&payload).await?;
    cache.insert(payload, object.children());
    Ok(objid)
}
