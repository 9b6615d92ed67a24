//! Location of docqa's persistent state.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "DOCQA_DATA_DIR";

/// Where the data directory path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirSource {
    Flag,
    Env,
    Xdg,
}

impl fmt::Display for DataDirSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flag => "--data-dir",
            Self::Env => DATA_DIR_ENV_VAR,
            Self::Xdg => "XDG data home",
        })
    }
}

/// The directory holding `config.redb` and the embedding cache.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: DataDirSource,
}

impl DataDir {
    /// Resolve and create the data directory. `--data-dir` wins over
    /// `DOCQA_DATA_DIR`, which wins over `$XDG_DATA_HOME/docqa`. An empty
    /// environment variable counts as unset.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let env = std::env::var(DATA_DIR_ENV_VAR)
            .ok()
            .filter(|v| !v.is_empty());

        let (root, source) = match (explicit, env) {
            (Some(path), _) => (path.to_path_buf(), DataDirSource::Flag),
            (None, Some(val)) => (PathBuf::from(val), DataDirSource::Env),
            (None, None) => {
                let home = xdg::BaseDirectories::with_prefix("docqa")
                    .get_data_home()
                    .ok_or_else(|| {
                        Error::Config(
                            "could not determine XDG data home directory"
                                .into(),
                        )
                    })?;
                (home, DataDirSource::Xdg)
            }
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        tracing::debug!(root = %root.display(), %source, "using data directory");

        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> DataDirSource {
        self.source
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Chunk vector cache, shared by every embedding model.
    pub fn embeddings_db(&self) -> PathBuf {
        self.root.join("embeddings.redb")
    }
}
