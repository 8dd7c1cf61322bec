//! Rebuilds a directory hierarchy from cached tree and inode objects.
//!
//! Restoring is best effort. Anything wrong with the data (undecodable
//! cached payloads, objects missing from the cache, damaged chunks in the
//! repository, I/O errors on the destination) is logged, recorded in the
//! [`RestoreReport`] and confined to the smallest enclosing entry, and the
//! rest of the tree is still restored. The only errors returned are object
//! types this engine has no way to restore.

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};

use futures::{FutureExt, StreamExt, future::LocalBoxFuture, stream};
use tokio::{
    fs,
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tracing::{info, instrument};

use crate::{
    cache::{CachedObject, ObjectIndex},
    command::report::{Issue, IssueKind, Outcome, RestoreReport},
    config::RestoreOptions,
    crypto::PrivateKey,
    datastore::Datastore,
    error::{Error, Result},
    object::{Chunk, ObjId, Object, ObjectInfo, TreeEntry},
    platform,
};

pub struct Restorer<'a> {
    datastore: &'a Datastore,
    index: &'a dyn ObjectIndex,
    key: Option<&'a PrivateKey>,
    options: RestoreOptions,
}

impl<'a> Restorer<'a> {
    pub fn new(
        datastore: &'a Datastore,
        index: &'a dyn ObjectIndex,
        key: Option<&'a PrivateKey>,
        options: RestoreOptions,
    ) -> Self {
        Restorer {
            datastore,
            index,
            key,
            options,
        }
    }

    /// Restores `object` to `path`, recursing into trees.
    ///
    /// The last component of `path` is the entry being restored; it is
    /// created if missing, and its metadata is applied either way. Callers
    /// should treat any issue in the returned report as an incomplete
    /// restore.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownObjectType`] or [`Error::UnsupportedObject`] when a
    /// cached object has a type that cannot be restored. These abort the
    /// whole call.
    #[instrument(skip_all, fields(objid = %object.objid, path = %path.as_ref().display()))]
    pub async fn restore_item<P: AsRef<Path>>(
        &self,
        object: &CachedObject,
        path: P,
    ) -> Result<RestoreReport> {
        let report = self
            .restore(object.clone(), path.as_ref().to_path_buf())
            .await?;

        info!(
            restored = report.restored(),
            skipped = report.skipped(),
            failed = report.failed(),
            errors = report.errors().count(),
            warnings = report.warnings().count(),
            bytes = report.bytes_written,
            "restore finished"
        );

        Ok(report)
    }

    fn restore(&self, object: CachedObject, path: PathBuf) -> LocalBoxFuture<'_, Result<RestoreReport>> {
        async move {
            let mut report = RestoreReport::default();

            let decoded = match object.decode() {
                Ok(decoded) => decoded,
                Err(Error::UnknownObjectType(tag)) => return Err(Error::UnknownObjectType(tag)),
                Err(e) => {
                    report.record(
                        Issue::error(
                            IssueKind::InvalidCachedData,
                            &path,
                            format!(
                                "Can't restore {}: object {} has invalid cached data ({e}). \
                                 Rebuilding the local cache may fix this problem.",
                                path.display(),
                                object.objid
                            ),
                        )
                        .with_objid(object.objid),
                    );
                    report.finish(&path, Outcome::Skipped("invalid cached data".to_string()));
                    return Ok(report);
                }
            };

            match decoded {
                Object::Inode { info, chunks } => {
                    self.restore_file(object.objid, &info, chunks, &path, &mut report)
                        .await
                }
                Object::Tree { info, entries } => {
                    self.restore_dir(object.objid, &info, entries, &path, &mut report)
                        .await?
                }
                Object::Blob { .. } => {
                    return Err(Error::UnsupportedObject {
                        objid: object.objid,
                        obj_type: "blob",
                    });
                }
            }

            Ok(report)
        }
        .boxed_local()
    }

    async fn restore_file(
        &self,
        objid: ObjId,
        info: &ObjectInfo,
        mut chunks: Vec<Chunk>,
        path: &Path,
        report: &mut RestoreReport,
    ) {
        match fs::symlink_metadata(path).await {
            Ok(existing) if !existing.is_file() => {
                report.record(
                    Issue::error(
                        IssueKind::WrongFileType,
                        path,
                        format!(
                            "Can't restore object {objid} to {}: it already exists but isn't a file",
                            path.display()
                        ),
                    )
                    .with_objid(objid),
                );
                report.finish(path, Outcome::Skipped("exists and is not a file".to_string()));
                return;
            }
            _ => {}
        }

        info!(path = %path.display(), "restoring file");

        chunks.sort_by_key(|chunk| chunk.offset);
        let damaged = match self.write_chunks(&chunks, path, report).await {
            Ok(damaged) => damaged,
            Err(e) => {
                report.record(
                    Issue::error(
                        IssueKind::Write,
                        path,
                        format!("Error writing object {objid} to {}: {e}", path.display()),
                    )
                    .with_objid(objid),
                );
                report.finish(path, Outcome::Failed(format!("write error: {e}")));
                return;
            }
        };

        apply_metadata(path, objid, info, report);

        let outcome = match damaged {
            0 => Outcome::Restored,
            n => Outcome::Failed(format!("{n} of {} chunks could not be restored", chunks.len())),
        };
        report.finish(path, outcome);
    }

    /// Writes every readable chunk at its offset and returns how many were
    /// skipped. Skipped chunks leave holes.
    async fn write_chunks(
        &self,
        chunks: &[Chunk],
        path: &Path,
        report: &mut RestoreReport,
    ) -> io::Result<usize> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;

        let mut damaged = 0;
        for chunk in chunks {
            let Some(data) = self.fetch_chunk(chunk, path, report).await else {
                damaged += 1;
                continue;
            };

            file.seek(SeekFrom::Start(chunk.offset)).await?;
            file.write_all(&data).await?;
            report.bytes_written += data.len() as u64;
        }

        // Pending writes would otherwise land after the timestamps are set.
        file.flush().await?;

        Ok(damaged)
    }

    async fn fetch_chunk(
        &self,
        chunk: &Chunk,
        path: &Path,
        report: &mut RestoreReport,
    ) -> Option<Vec<u8>> {
        let chunk_issue = |kind, reason: String| {
            Issue::error(
                kind,
                path,
                format!(
                    "Could not restore chunk {} of {} at byte {}: {reason}",
                    chunk.objid,
                    path.display(),
                    chunk.offset
                ),
            )
            .with_objid(chunk.objid)
            .at_offset(chunk.offset)
        };

        let payload = match self.datastore.get_object(&chunk.objid, self.key).await {
            Ok(payload) => payload,
            Err(Error::KeyRequired(_)) => {
                report.record(chunk_issue(
                    IssueKind::MissingKey,
                    "the repository is encrypted and no private key was given".to_string(),
                ));
                return None;
            }
            Err(e) => {
                report.record(chunk_issue(IssueKind::CorruptedChunk, e.to_string()));
                return None;
            }
        };

        match Object::from_payload(&payload) {
            Ok(Object::Blob { data }) => Some(data),
            Ok(other) => {
                report.record(chunk_issue(
                    IssueKind::InvalidChunk,
                    format!(
                        "object of type blob expected, found {}",
                        other.type_name()
                    ),
                ));
                None
            }
            Err(e) => {
                report.record(chunk_issue(
                    IssueKind::InvalidChunk,
                    format!("invalid or corrupted data ({e})"),
                ));
                None
            }
        }
    }

    async fn restore_dir(
        &self,
        objid: ObjId,
        info: &ObjectInfo,
        entries: Vec<TreeEntry>,
        path: &Path,
        report: &mut RestoreReport,
    ) -> Result<()> {
        match fs::symlink_metadata(path).await {
            Ok(existing) if !existing.is_dir() => {
                report.record(
                    Issue::error(
                        IssueKind::WrongFileType,
                        path,
                        format!(
                            "Can't restore object {objid} to {}: it already exists but isn't \
                             a directory",
                            path.display()
                        ),
                    )
                    .with_objid(objid),
                );
                report.finish(
                    path,
                    Outcome::Skipped("exists and is not a directory".to_string()),
                );
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // The recorded mode may deny the owner write access; it is
                // applied for real once the children are in place.
                if let Err(e) = platform::create_dir(path, info.mode | 0o700).await {
                    report.record(
                        Issue::error(
                            IssueKind::Write,
                            path,
                            format!(
                                "Could not make directory {} for object {objid}: {e}",
                                path.display()
                            ),
                        )
                        .with_objid(objid),
                    );
                    report.finish(path, Outcome::Failed(format!("mkdir: {e}")));
                    return Ok(());
                }
            }
            Err(e) => {
                report.record(
                    Issue::error(
                        IssueKind::Write,
                        path,
                        format!(
                            "Could not inspect {} for object {objid}: {e}",
                            path.display()
                        ),
                    )
                    .with_objid(objid),
                );
                report.finish(path, Outcome::Failed(e.to_string()));
                return Ok(());
            }
        }

        info!(path = %path.display(), entries = entries.len(), "restoring directory");

        let mut children = stream::iter(entries)
            .map(move |entry| self.restore_child(entry, path))
            .buffer_unordered(self.options.concurrency.max(1));
        while let Some(child) = children.next().await {
            report.merge(child?);
        }

        // After the children, so creating them does not move the mtime.
        apply_metadata(path, objid, info, report);
        report.finish(path, Outcome::Restored);

        Ok(())
    }

    async fn restore_child(&self, entry: TreeEntry, parent: &Path) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();

        if !platform::is_plain_name(&entry.name) {
            report.record(
                Issue::error(
                    IssueKind::InvalidName,
                    parent,
                    format!(
                        "Can't restore entry {:?} (object {}) of {}: not a plain file name",
                        String::from_utf8_lossy(&entry.name),
                        entry.objid,
                        parent.display()
                    ),
                )
                .with_objid(entry.objid),
            );
            return Ok(report);
        }

        let path = parent.join(platform::name_from_bytes(&entry.name));

        match self.index.lookup(&entry.objid) {
            Some(child) => self.restore(child, path).await,
            None => {
                report.record(
                    Issue::error(
                        IssueKind::MissingChild,
                        &path,
                        format!(
                            "Could not restore {}: referenced object {} does not exist in \
                             the local cache. Rebuilding the local cache may help fix this \
                             problem",
                            path.display(),
                            entry.objid
                        ),
                    )
                    .with_objid(entry.objid),
                );
                report.finish(&path, Outcome::Skipped("not in local cache".to_string()));
                Ok(report)
            }
        }
    }
}

/// Applies owner, mode and timestamps independently; failures are warnings.
fn apply_metadata(path: &Path, objid: ObjId, info: &ObjectInfo, report: &mut RestoreReport) {
    if let Err(e) = platform::set_owner(path, info.uid, info.gid) {
        report.record(
            Issue::warning(
                IssueKind::Metadata,
                path,
                format!("Could not chown {} (object {objid}): {e}", path.display()),
            )
            .with_objid(objid),
        );
    }
    if let Err(e) = platform::set_mode(path, info.mode) {
        report.record(
            Issue::warning(
                IssueKind::Metadata,
                path,
                format!("Could not chmod {} (object {objid}): {e}", path.display()),
            )
            .with_objid(objid),
        );
    }
    if let Err(e) = platform::set_times(path, info.atime, info.mtime) {
        report.record(
            Issue::warning(
                IssueKind::Metadata,
                path,
                format!("Could not set times on {} (object {objid}): {e}", path.display()),
            )
            .with_objid(objid),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        cache::LocalCache,
        command::report::Severity,
        config::{EncryptionConfig, RepoConfig},
        object::{Value, encode},
        storage::MemoryStorage,
    };

    struct Fixture {
        storage: Arc<MemoryStorage>,
        datastore: Datastore,
        cache: LocalCache,
        key: Option<PrivateKey>,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(RepoConfig::default(), None)
        }

        fn with_config(config: RepoConfig, key: Option<PrivateKey>) -> Self {
            let storage = Arc::new(MemoryStorage::new());
            Fixture {
                datastore: Datastore::new(storage.clone(), &config),
                storage,
                cache: LocalCache::new(),
                key,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn dest(&self) -> PathBuf {
            self.dir.path().join("restore")
        }

        fn info(&self, mode: u32) -> ObjectInfo {
            let current = platform::object_info(&std::fs::metadata(self.dir.path()).unwrap());
            ObjectInfo {
                mode,
                atime: 1_400_000_000_000_000_001,
                mtime: 1_500_000_000_123_456_789,
                ..current
            }
        }

        async fn store(&mut self, object: &Object) -> ObjId {
            let payload = object.to_payload().unwrap();
            let objid = self.datastore.put_object(&payload).await.unwrap();
            if !matches!(object, Object::Blob { .. }) {
                self.cache.insert(payload, object.children());
            }
            objid
        }

        async fn file(&mut self, chunks: &[(u64, &[u8])]) -> ObjId {
            let mut stored = Vec::new();
            for (offset, data) in chunks {
                let objid = self
                    .store(&Object::Blob {
                        data: data.to_vec(),
                    })
                    .await;
                stored.push(Chunk {
                    offset: *offset,
                    objid,
                });
            }
            let info = self.info(0o644);
            self.store(&Object::Inode {
                info,
                chunks: stored,
            })
            .await
        }

        async fn tree_with_mode(&mut self, mode: u32, entries: &[(&[u8], ObjId)]) -> ObjId {
            let entries = entries
                .iter()
                .map(|(name, objid)| TreeEntry {
                    name: name.to_vec(),
                    objid: *objid,
                })
                .collect();
            let info = self.info(mode);
            self.store(&Object::Tree { info, entries }).await
        }

        async fn tree(&mut self, entries: &[(&[u8], ObjId)]) -> ObjId {
            self.tree_with_mode(0o755, entries).await
        }

        async fn restore_with(&self, root: ObjId, options: RestoreOptions) -> Result<RestoreReport> {
            let object = self.cache.lookup(&root).expect("root is cached");
            Restorer::new(&self.datastore, &self.cache, self.key.as_ref(), options)
                .restore_item(&object, self.dest())
                .await
        }

        async fn restore(&self, root: ObjId) -> Result<RestoreReport> {
            self.restore_with(root, RestoreOptions::default()).await
        }

        fn read(&self, relative: &str) -> Vec<u8> {
            std::fs::read(self.dest().join(relative)).unwrap()
        }
    }

    #[tokio::test]
    async fn restores_files_and_directories() {
        let mut fx = Fixture::new();
        let file1 = fx.file(&[(0, b"contents1")]).await;
        let file2 = fx.file(&[(0, b"contents2")]).await;
        let dir = fx.tree(&[(b"file2", file2)]).await;
        let root = fx.tree(&[(b"file1", file1), (b"dir", dir)]).await;

        let report = fx.restore(root).await.unwrap();

        assert!(report.is_complete(), "{:?}", report.issues);
        assert_eq!(fx.read("file1"), b"contents1");
        assert_eq!(fx.read("dir/file2"), b"contents2");
        assert_eq!(report.restored(), 4);
        assert_eq!(report.bytes_written, 18);
    }

    #[tokio::test]
    async fn chunks_are_placed_by_offset() {
        let mut fx = Fixture::new();
        let shuffled = fx.file(&[(5, b"world"), (0, b"hello")]).await;
        let sparse = fx.file(&[(0, b"a"), (10, b"b")]).await;
        let root = fx
            .tree(&[(b"shuffled", shuffled), (b"sparse", sparse)])
            .await;

        let report = fx.restore(root).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(fx.read("shuffled"), b"helloworld");
        assert_eq!(fx.read("sparse"), b"a\0\0\0\0\0\0\0\0\0b");
    }

    #[tokio::test]
    async fn empty_file_is_created() {
        let mut fx = Fixture::new();
        let empty = fx.file(&[]).await;
        let root = fx.tree(&[(b"empty", empty)]).await;

        assert!(fx.restore(root).await.unwrap().is_complete());
        assert!(fx.read("empty").is_empty());
    }

    #[tokio::test]
    async fn corrupted_chunk_leaves_a_hole() {
        let mut fx = Fixture::new();
        let damaged = fx.file(&[(0, b"aaaa"), (4, b"bbbb"), (8, b"cccc")]).await;
        let sibling = fx.file(&[(0, b"intact")]).await;
        let root = fx.tree(&[(b"damaged", damaged), (b"sibling", sibling)]).await;

        let middle = ObjId::of(
            &Object::Blob {
                data: b"bbbb".to_vec(),
            }
            .to_payload()
            .unwrap(),
        );
        fx.storage.overwrite(&middle, b"\x00garbage".to_vec()).await;

        let report = fx.restore(root).await.unwrap();

        assert_eq!(fx.read("damaged"), b"aaaa\0\0\0\0cccc");
        assert_eq!(fx.read("sibling"), b"intact");

        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, IssueKind::CorruptedChunk);
        assert_eq!(errors[0].path, fx.dest().join("damaged"));
        assert_eq!(errors[0].offset, Some(4));
        assert_eq!(errors[0].objid, Some(middle));
        assert!(matches!(
            report.outcome(&fx.dest().join("damaged")),
            Some(Outcome::Failed(_))
        ));
        assert_eq!(
            report.outcome(&fx.dest().join("sibling")),
            Some(&Outcome::Restored)
        );
    }

    #[tokio::test]
    async fn chunk_missing_from_repository() {
        let mut fx = Fixture::new();
        let file = fx.file(&[(0, b"first"), (5, b"second")]).await;
        let root = fx.tree(&[(b"file", file)]).await;

        let first = ObjId::of(
            &Object::Blob {
                data: b"first".to_vec(),
            }
            .to_payload()
            .unwrap(),
        );
        fx.storage.remove(&first).await.unwrap();

        let report = fx.restore(root).await.unwrap();

        assert_eq!(fx.read("file"), b"\0\0\0\0\0second");
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, IssueKind::CorruptedChunk);
        assert_eq!(errors[0].offset, Some(0));
    }

    #[tokio::test]
    async fn chunk_of_wrong_type_is_skipped() {
        let mut fx = Fixture::new();
        let inner = fx.file(&[(0, b"x")]).await;
        let info = fx.info(0o644);
        let bogus = fx
            .store(&Object::Inode {
                info,
                chunks: vec![Chunk {
                    offset: 0,
                    objid: inner,
                }],
            })
            .await;
        let root = fx.tree(&[(b"bogus", bogus)]).await;

        let report = fx.restore(root).await.unwrap();

        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, IssueKind::InvalidChunk);
        assert!(errors[0].message.contains("blob expected"));
        assert!(fx.read("bogus").is_empty());
    }

    #[tokio::test]
    async fn missing_child_only_skips_that_entry() {
        let mut fx = Fixture::new();
        let a = fx.file(&[(0, b"a")]).await;
        let b = fx.file(&[(0, b"b")]).await;
        let c = fx.file(&[(0, b"c")]).await;
        let root = fx.tree(&[(b"a", a), (b"b", b), (b"c", c)]).await;
        fx.cache.remove(&b);

        let report = fx.restore(root).await.unwrap();

        assert_eq!(fx.read("a"), b"a");
        assert_eq!(fx.read("c"), b"c");
        assert!(!fx.dest().join("b").exists());

        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, IssueKind::MissingChild);
        assert_eq!(errors[0].path, fx.dest().join("b"));
        assert!(errors[0].message.contains("Rebuilding the local cache"));
        assert_eq!(report.skipped(), 1);
    }

    #[tokio::test]
    async fn undecodable_cached_payload_is_skipped() {
        let mut fx = Fixture::new();
        let broken = fx
            .cache
            .insert(b"\x02\x00\x00\x00garbage".to_vec(), Default::default());
        let good = fx.file(&[(0, b"good")]).await;
        let root = fx.tree(&[(b"broken", broken), (b"good", good)]).await;

        let report = fx.restore(root).await.unwrap();

        assert!(!fx.dest().join("broken").exists());
        assert_eq!(fx.read("good"), b"good");
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, IssueKind::InvalidCachedData);
        assert_eq!(errors[0].objid, Some(broken));
    }

    #[tokio::test]
    async fn unknown_object_type_aborts() {
        let mut fx = Fixture::new();
        let payload = encode(&[Value::Str("symlink".into()), Value::Bytes(b"/etc".to_vec())]).unwrap();
        let odd = fx.cache.insert(payload, Default::default());
        let root = fx.tree(&[(b"odd", odd)]).await;

        assert!(matches!(
            fx.restore(root).await,
            Err(Error::UnknownObjectType(tag)) if tag == "symlink"
        ));
    }

    #[tokio::test]
    async fn blob_cannot_be_restored_directly() {
        let mut fx = Fixture::new();
        let payload = Object::Blob {
            data: b"loose".to_vec(),
        }
        .to_payload()
        .unwrap();
        let blob = fx.cache.insert(payload, Default::default());

        assert!(matches!(
            fx.restore(blob).await,
            Err(Error::UnsupportedObject { obj_type: "blob", .. })
        ));
    }

    #[tokio::test]
    async fn existing_path_of_wrong_kind_is_left_alone() {
        let mut fx = Fixture::new();
        let file = fx.file(&[(0, b"data")]).await;
        let inner = fx.file(&[(0, b"inner")]).await;
        let dir = fx.tree(&[(b"inner", inner)]).await;
        let root = fx.tree(&[(b"file", file), (b"dir", dir)]).await;

        std::fs::create_dir_all(fx.dest().join("file")).unwrap();
        std::fs::write(fx.dest().join("dir"), b"not a directory").unwrap();

        let report = fx.restore(root).await.unwrap();

        assert!(fx.dest().join("file").is_dir());
        assert_eq!(fx.read("dir"), b"not a directory");
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == IssueKind::WrongFileType));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_at_destination_is_not_followed() {
        let mut fx = Fixture::new();
        let file = fx.file(&[(0, b"payload")]).await;
        let root = fx.tree(&[(b"link", file)]).await;

        let target = fx.dir.path().join("target");
        std::fs::write(&target, b"untouched").unwrap();
        std::fs::create_dir_all(fx.dest()).unwrap();
        std::os::unix::fs::symlink(&target, fx.dest().join("link")).unwrap();

        let report = fx.restore(root).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"untouched");
        assert_eq!(report.errors().next().unwrap().kind, IssueKind::WrongFileType);
    }

    #[tokio::test]
    async fn names_that_escape_are_rejected() {
        let mut fx = Fixture::new();
        let file = fx.file(&[(0, b"escaped")]).await;
        let root = fx.tree(&[(b"../escaped", file), (b"..", file)]).await;

        let report = fx.restore(root).await.unwrap();

        assert!(!fx.dir.path().join("escaped").exists());
        assert_eq!(report.errors().count(), 2);
        assert!(report.errors().all(|e| e.kind == IssueKind::InvalidName));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn directory_metadata_survives_its_children() {
        use std::os::unix::fs::PermissionsExt;

        let mut fx = Fixture::new();
        let file = fx.file(&[(0, b"inside")]).await;
        let locked = fx.tree_with_mode(0o555, &[(b"file", file)]).await;
        let root = fx.tree(&[(b"locked", locked)]).await;

        let report = fx.restore(root).await.unwrap();
        assert!(report.is_complete(), "{:?}", report.issues);

        let path = fx.dest().join("locked");
        let restored = platform::object_info(&std::fs::metadata(&path).unwrap());
        assert_eq!(restored.mode, 0o555);
        assert_eq!(restored.mtime, 1_500_000_000_123_456_789);
        assert_eq!(restored.atime, 1_400_000_000_000_000_001);
        assert_eq!(fx.read("locked/file"), b"inside");

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn metadata_failure_is_only_a_warning() {
        let mut fx = Fixture::new();
        if fx.info(0).uid == 0 {
            // root may chown to anyone
            return;
        }
        let data = fx
            .store(&Object::Blob {
                data: b"owned".to_vec(),
            })
            .await;
        let info = ObjectInfo {
            uid: 0,
            ..fx.info(0o600)
        };
        let file = fx
            .store(&Object::Inode {
                info,
                chunks: vec![Chunk {
                    offset: 0,
                    objid: data,
                }],
            })
            .await;
        let root = fx.tree(&[(b"file", file)]).await;

        let report = fx.restore(root).await.unwrap();

        assert_eq!(fx.read("file"), b"owned");
        assert_eq!(report.errors().count(), 0);
        let warnings: Vec<_> = report.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, IssueKind::Metadata);
        assert_eq!(warnings[0].severity, Severity::Warning);
        assert_eq!(
            report.outcome(&fx.dest().join("file")),
            Some(&Outcome::Restored)
        );
    }

    #[tokio::test]
    async fn restoring_again_gives_the_same_tree() {
        let mut fx = Fixture::new();
        let file = fx.file(&[(0, b"stable contents")]).await;
        let root = fx.tree(&[(b"file", file)]).await;

        assert!(fx.restore(root).await.unwrap().is_complete());
        std::fs::write(fx.dest().join("file"), b"modified in between, and longer").unwrap();
        assert!(fx.restore(root).await.unwrap().is_complete());

        assert_eq!(fx.read("file"), b"stable contents");
    }

    #[tokio::test]
    async fn concurrency_does_not_change_the_result() {
        let mut fx = Fixture::new();
        let mut entries = Vec::new();
        for i in 0..20u8 {
            let objid = fx.file(&[(0, &[i; 100])]).await;
            entries.push((vec![b'f', b'0' + i / 10, b'0' + i % 10], objid));
        }
        let borrowed: Vec<(&[u8], ObjId)> = entries
            .iter()
            .map(|(name, objid)| (name.as_slice(), *objid))
            .collect();
        let root = fx.tree(&borrowed).await;

        let report = fx
            .restore_with(root, RestoreOptions { concurrency: 1 })
            .await
            .unwrap();
        assert!(report.is_complete());
        let report = fx
            .restore_with(root, RestoreOptions { concurrency: 16 })
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.restored(), 21);

        for i in 0..20u8 {
            let name = format!("f{}{}", i / 10, i % 10);
            assert_eq!(fx.read(&name), vec![i; 100]);
        }
    }

    #[tokio::test]
    async fn encrypted_repository_needs_the_key() {
        let key = PrivateKey::generate();
        let config = RepoConfig {
            encryption: Some(EncryptionConfig {
                public_key: key.public_key(),
            }),
            ..RepoConfig::default()
        };

        let mut fx = Fixture::with_config(config, Some(key));
        let file = fx.file(&[(0, b"sealed")]).await;
        let root = fx.tree(&[(b"file", file)]).await;
        assert!(fx.restore(root).await.unwrap().is_complete());
        assert_eq!(fx.read("file"), b"sealed");

        fx.key = None;
        std::fs::remove_dir_all(fx.dest()).unwrap();
        let report = fx.restore(root).await.unwrap();
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, IssueKind::MissingKey);
        assert_eq!(errors[0].offset, Some(0));
        assert!(fx.read("file").is_empty());

        fx.key = Some(PrivateKey::generate());
        let report = fx.restore(root).await.unwrap();
        assert_eq!(
            report.errors().map(|e| e.kind).collect::<Vec<_>>(),
            [IssueKind::CorruptedChunk]
        );
    }
}
