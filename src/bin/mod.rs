use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use cairn::{
    Error, Result,
    cache::ObjectIndex,
    command::{
        backup::backup, rebuild::rebuild_cache, restore::Restorer, verify::verify_cache,
    },
    compress::Compression,
    config::{EncryptionConfig, RepoConfig, RestoreOptions},
    crypto::{PrivateKey, PublicKey},
    reader::ChunkerConfig,
    repository::Repository,
};
use clap::{Parser, Subcommand};
use tracing::{error, info, level_filters::LevelFilter};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Generate a private key, with its public half next to it as `.pub`.
    Keygen { output: PathBuf },
    /// Create an empty repository.
    Init {
        repo: PathBuf,
        #[arg(long, default_value = "zstd")]
        compression: Compression,
        /// Encrypt objects to the key in this file.
        #[arg(long)]
        public_key: Option<PathBuf>,
    },
    /// Back up a directory as a named snapshot.
    Backup {
        repo: PathBuf,
        source: PathBuf,
        name: String,
    },
    /// Restore a snapshot into a directory.
    Restore {
        repo: PathBuf,
        name: String,
        destination: PathBuf,
        #[arg(long)]
        key: Option<PathBuf>,
        /// Entries of one directory restored at the same time.
        #[arg(long, default_value_t = RestoreOptions::default().concurrency)]
        jobs: usize,
    },
    /// List snapshots.
    Snapshots { repo: PathBuf },
    /// Check the local cache for internal consistency.
    Verify { repo: PathBuf },
    /// Refetch all trees and inodes reachable from the snapshots.
    RebuildCache {
        repo: PathBuf,
        #[arg(long)]
        key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    match run(args.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Keygen { output } => {
            let key = PrivateKey::generate();
            key.save(&output)?;

            let mut public_path = output.clone().into_os_string();
            public_path.push(".pub");
            let public_path = PathBuf::from(public_path);
            fs::write(&public_path, hex::encode(key.public_key().as_bytes()))?;
            info!(
                private = %output.display(),
                public = %public_path.display(),
                "key pair written"
            );
        }
        Commands::Init {
            repo,
            compression,
            public_key,
        } => {
            let encryption = match public_key {
                Some(path) => Some(EncryptionConfig {
                    public_key: read_public_key(&path)?,
                }),
                None => None,
            };
            Repository::init(
                repo,
                RepoConfig {
                    compression,
                    encryption,
                },
            )
            .await?;
        }
        Commands::Backup { repo, source, name } => {
            let mut repo = Repository::open(repo).await?;
            let datastore = repo.datastore();

            let root = backup(
                source,
                &datastore,
                repo.cache_mut(),
                ChunkerConfig::default(),
            )
            .await?;
            repo.save_cache()?;

            let snapshot = repo.add_snapshot(&name, root)?;
            info!(name = %snapshot.name, root = %snapshot.root, "snapshot saved");
        }
        Commands::Restore {
            repo,
            name,
            destination,
            key,
            jobs,
        } => {
            let repo = Repository::open(repo).await?;
            let key = key.map(PrivateKey::load).transpose()?;
            let root = repo.snapshot(&name)?.root;

            let object = repo.cache().lookup(&root).ok_or_else(|| {
                Error::Config(format!(
                    "root {root} of snapshot {name:?} is not in the local cache; \
                     run rebuild-cache first"
                ))
            })?;

            let datastore = repo.datastore();
            let restorer = Restorer::new(
                &datastore,
                repo.cache(),
                key.as_ref(),
                RestoreOptions { concurrency: jobs },
            );
            let report = restorer.restore_item(&object, &destination).await?;

            if !report.is_complete() {
                error!(
                    errors = report.errors().count(),
                    warnings = report.warnings().count(),
                    "restore incomplete"
                );
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Snapshots { repo } => {
            let repo = Repository::open(repo).await?;
            for snapshot in repo.snapshots() {
                println!(
                    "{}\t{}\t{}",
                    snapshot.name,
                    snapshot.created_at / 1_000_000_000,
                    snapshot.root
                );
            }
        }
        Commands::Verify { repo } => {
            let repo = Repository::open(repo).await?;
            let checked = verify_cache(repo.cache()).into_result()?;
            info!(checked, "local cache is consistent");
        }
        Commands::RebuildCache { repo, key } => {
            let mut repo = Repository::open(repo).await?;
            let key = key.map(PrivateKey::load).transpose()?;

            let roots: Vec<_> = repo.snapshots().iter().map(|s| s.root).collect();
            let cache = rebuild_cache(&repo.datastore(), &roots, key.as_ref()).await?;

            repo.replace_cache(cache);
            repo.save_cache()?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn read_public_key(path: &Path) -> Result<PublicKey> {
    let text = fs::read_to_string(path)?;
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(text.trim(), &mut bytes)
        .map_err(|e| Error::Config(format!("invalid public key in {}: {e}", path.display())))?;
    Ok(PublicKey::from_bytes(bytes))
}
