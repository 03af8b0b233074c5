//! Local sources of named resources.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;

/// Resources available on this host without asking a peer
pub trait ResourceSource: Send + Sync {
    /// Returns the bytes for `name`, or `None` if this source does not have it
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Resources held in memory
#[derive(Debug, Default)]
pub struct InMemoryResources {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.entries.write().insert(name.into(), data.into());
    }

    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ResourceSource for InMemoryResources {
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(name).cloned())
    }
}

/// Resources stored as files below a root directory
///
/// Names are relative paths with `/` separators. Names that would escape
/// the root are treated as absent.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if name.is_empty() || !contained {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl ResourceSource for DirectoryResources {
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) if path.is_dir() => {
                tracing::trace!("resource {name} is a directory: {err}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
