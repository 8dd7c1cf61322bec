use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    compress::Compression,
    crypto::PublicKey,
    error::{Error, Result},
};

/// Repository-wide settings, stored as `config.json` at the repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub public_key: PublicKey,
}

impl RepoConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.encryption.as_ref().map(|e| e.public_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// How many entries of one directory may be restored at the same time.
    pub concurrency: usize,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        RestoreOptions { concurrency: 4 }
    }
}
