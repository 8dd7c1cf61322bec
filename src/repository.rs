use std::{
    fmt::Debug,
    fs,
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    cache::{BincodeStore, LocalCache},
    config::RepoConfig,
    datastore::Datastore,
    error::{Error, Result},
    object::ObjId,
    storage::BlobFileStorage,
};

const CONFIG_FILE: &str = "config.json";
const OBJECTS_FILE: &str = "objects.bin";
const SNAPSHOTS_FILE: &str = "snapshots.json";
const CACHE_FILE: &str = "cache.bin";

/// A named pointer to the root tree captured by one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    /// Nanoseconds since the unix epoch.
    pub created_at: i64,
    pub root: ObjId,
}

/// A repository directory: settings, object pack, snapshot list and the
/// local cache.
pub struct Repository {
    path: PathBuf,
    config: RepoConfig,
    datastore: Arc<Datastore>,
    cache: LocalCache,
    snapshots: Vec<Snapshot>,
}

impl Repository {
    #[instrument(err)]
    pub async fn init<P: Into<PathBuf> + Debug>(path: P, config: RepoConfig) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;

        let config_path = path.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(Error::Config(format!(
                "repository already exists at {}",
                path.display()
            )));
        }

        config.save(&config_path)?;
        write_json(&path.join(SNAPSHOTS_FILE), &Vec::<Snapshot>::new())?;

        info!(path = %path.display(), "initialized repository");
        Self::open(path).await
    }

    #[instrument(err)]
    pub async fn open<P: Into<PathBuf> + Debug>(path: P) -> Result<Self> {
        let path = path.into();
        let config = RepoConfig::load(path.join(CONFIG_FILE))?;

        let storage = BlobFileStorage::new(path.join(OBJECTS_FILE), false).await?;
        let datastore = Arc::new(Datastore::new(Arc::new(storage), &config));

        let snapshots = serde_json::from_slice(&fs::read(path.join(SNAPSHOTS_FILE))?)?;

        let cache = match fs::File::open(path.join(CACHE_FILE)) {
            Ok(file) => LocalCache::load(&BincodeStore, BufReader::new(file))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => LocalCache::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            config,
            datastore,
            cache,
            snapshots,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn datastore(&self) -> Arc<Datastore> {
        self.datastore.clone()
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut LocalCache {
        &mut self.cache
    }

    pub fn replace_cache(&mut self, cache: LocalCache) {
        self.cache = cache;
    }

    pub fn save_cache(&self) -> Result<()> {
        let target = self.path.join(CACHE_FILE);
        let temp = target.with_extension("bin.tmp");

        let mut writer = BufWriter::new(fs::File::create(&temp)?);
        self.cache.save(&BincodeStore, &mut writer)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&temp, &target)?;
        Ok(())
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn snapshot(&self, name: &str) -> Result<&Snapshot> {
        self.snapshots
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::SnapshotNotFound(name.to_string()))
    }

    pub fn add_snapshot(&mut self, name: &str, root: ObjId) -> Result<&Snapshot> {
        if self.snapshots.iter().any(|s| s.name == name) {
            return Err(Error::Config(format!("snapshot {name:?} already exists")));
        }

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as i64);
        self.snapshots.push(Snapshot {
            name: name.to_string(),
            created_at,
            root,
        });
        write_json(&self.path.join(SNAPSHOTS_FILE), &self.snapshots)?;

        Ok(&self.snapshots[self.snapshots.len() - 1])
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
