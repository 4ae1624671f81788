use std::{
    env, fs,
    ops::Deref,
    path::{Path, PathBuf},
};

use uuid::Uuid;

/// Scratch directory under the system temp dir that is removed on drop.  Used
/// by tests that need a data directory of table files.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = env::temp_dir().join(path);
        // Tests treat a missing scratch dir as a hard failure.
        fs::create_dir_all(&path).expect("creating temp dir");
        Self(path)
    }

    /// A fresh directory whose name starts with `prefix`, so tests running in
    /// parallel never share one.
    pub fn unique(prefix: &str) -> Self {
        Self::new(format!("accessgraph-{}-{}", prefix, Uuid::new_v4().simple()))
    }
}

impl Deref for TempDir {
    type Target = PathBuf;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for TempDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}
