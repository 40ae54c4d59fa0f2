use crate::config::Environment;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io failed for {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("snapshot {path} is not valid yaml: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// The three documents kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Categories,
    StockRecords,
    Fingerprints,
}

impl SnapshotKind {
    pub const ALL: [SnapshotKind; 3] = [
        SnapshotKind::Categories,
        SnapshotKind::StockRecords,
        SnapshotKind::Fingerprints,
    ];

    fn stem(self) -> &'static str {
        match self {
            SnapshotKind::Categories => "categories",
            SnapshotKind::StockRecords => "stock_records",
            SnapshotKind::Fingerprints => "fingerprints",
        }
    }
}

/// YAML documents under one directory, suffixed with the environment name.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    environment: Environment,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            dir: dir.into(),
            environment,
        }
    }

    pub fn path(&self, kind: SnapshotKind) -> PathBuf {
        self.dir
            .join(format!("{}_{}.yml", kind.stem(), self.environment.as_str()))
    }

    /// `None` when the document does not exist yet (first run).
    pub fn load<T: DeserializeOwned>(
        &self,
        kind: SnapshotKind,
    ) -> Result<Option<T>, SnapshotError> {
        let path = self.path(kind);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(
                    target = "catalog_sync.snapshot",
                    path = %path.display(),
                    "snapshot_missing"
                );
                return Ok(None);
            }
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };
        serde_yaml::from_str(&raw)
            .map(Some)
            .map_err(|source| SnapshotError::Yaml { path, source })
    }

    pub fn load_or_default<T: DeserializeOwned + Default>(
        &self,
        kind: SnapshotKind,
    ) -> Result<T, SnapshotError> {
        Ok(self.load(kind)?.unwrap_or_default())
    }

    /// Writes through a temporary file so a crash never leaves half a document.
    pub fn save<T: Serialize>(&self, kind: SnapshotKind, value: &T) -> Result<(), SnapshotError> {
        let path = self.path(kind);
        fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let yaml = serde_yaml::to_string(value).map_err(|source| SnapshotError::Yaml {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("yml.tmp");
        write_file(&tmp, &yaml)?;
        fs::rename(&tmp, &path).map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(target = "catalog_sync.snapshot", path = %path.display(), "snapshot_saved");
        Ok(())
    }

    /// Removes every document so the next run starts from scratch.
    pub fn clear(&self) -> Result<(), SnapshotError> {
        for kind in SnapshotKind::ALL {
            let path = self.path(kind);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(SnapshotError::Io { path, source }),
            }
        }
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), SnapshotError> {
    fs::write(path, contents).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}
