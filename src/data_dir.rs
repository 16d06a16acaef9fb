use std::path::{Path, PathBuf};

use crate::error::Result;

/// Layout of a database root: `<root>/data/` holds the KV store,
/// `<root>/data/index/<collection>/` holds per-collection index segments.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the layout under `root`, creating `data/` and
    /// `data/index/` if missing.
    pub fn resolve(root: &Path) -> Result<Self> {
        let dir = DataDir {
            root: root.to_path_buf(),
        };
        std::fs::create_dir_all(dir.index_root())?;
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn store_path(&self) -> PathBuf {
        self.data().join("docs.redb")
    }

    pub fn index_root(&self) -> PathBuf {
        self.data().join("index")
    }

    pub fn index_dir(&self, collection: &str) -> PathBuf {
        self.index_root().join(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(tmp.path()).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert!(dir.data().exists());
        assert!(dir.index_root().exists());
        assert_eq!(dir.store_path(), tmp.path().join("data").join("docs.redb"));
        assert_eq!(
            dir.index_dir("books"),
            tmp.path().join("data").join("index").join("books")
        );
    }
}
