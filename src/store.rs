//! Main Store struct tying all components together.

use crate::branches::{BranchDirectory, DEFAULT_HISTORY_CACHE_SIZE};
use crate::criteria::BranchCriteriaBuilder;
use crate::entity::TemporalEntity;
use crate::error::{Result, StoreError};
use crate::storage::DocumentCollection;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Closed branch rows kept for timepoint lookups.
    pub history_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            create_if_missing: true,
            history_cache_size: DEFAULT_HISTORY_CACHE_SIZE,
        }
    }
}

/// Counts across the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Paths with a current row.
    pub branch_count: u64,
    /// All rows, current and closed.
    pub row_count: u64,
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"BRL\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const BRANCHES_FILE: &str = "branches.bin";
const COLLECTIONS_DIR: &str = "collections";

/// An on-disk branch store.
///
/// Owns the branch directory and holds an exclusive lock on the store
/// directory for as long as it is open. Document collections live with the
/// caller; the store only offers a place to snapshot them.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    branches: BranchDirectory,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        fs::create_dir_all(config.path.join(COLLECTIONS_DIR))?;

        let lock_file = Self::acquire_lock(&config.path)?;
        Self::write_manifest(&config.path)?;

        let branches =
            BranchDirectory::open(config.path.join(BRANCHES_FILE), config.history_cache_size)?;
        branches.save()?;

        debug!(path = %config.path.display(), "created store");
        Ok(Self {
            config,
            _lock_file: lock_file,
            branches,
        })
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if !config.path.join("MANIFEST").exists() {
            return Err(StoreError::NotInitialized);
        }
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        let branches =
            BranchDirectory::open(config.path.join(BRANCHES_FILE), config.history_cache_size)?;

        debug!(
            path = %config.path.display(),
            rows = branches.row_count(),
            "opened store"
        );
        Ok(Self {
            config,
            _lock_file: lock_file,
            branches,
        })
    }

    /// The branch directory.
    pub fn branches(&self) -> &BranchDirectory {
        &self.branches
    }

    /// Criteria builder over this store's branches.
    pub fn criteria(&self) -> BranchCriteriaBuilder<'_> {
        BranchCriteriaBuilder::new(&self.branches)
    }

    // --- Collection snapshots ---

    /// Snapshot a collection under `name`.
    pub fn save_collection<T>(&self, name: &str, collection: &DocumentCollection<T>) -> Result<()>
    where
        T: TemporalEntity + Clone + Serialize + DeserializeOwned,
    {
        collection.save_to(self.collection_path(name)?)
    }

    /// Load the collection saved under `name`, or an empty one.
    pub fn load_collection<T>(&self, name: &str) -> Result<DocumentCollection<T>>
    where
        T: TemporalEntity + Clone + Serialize + DeserializeOwned,
    {
        let path = self.collection_path(name)?;
        if path.exists() {
            DocumentCollection::load_from(path)
        } else {
            Ok(DocumentCollection::new())
        }
    }

    fn collection_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidPath(format!(
                "Invalid collection name: {}",
                name
            )));
        }
        Ok(self
            .config
            .path
            .join(COLLECTIONS_DIR)
            .join(format!("{}.bin", name)))
    }

    // --- Maintenance ---

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            branch_count: self.branches.find_all()?.len() as u64,
            row_count: self.branches.row_count() as u64,
        })
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.branches.save()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
