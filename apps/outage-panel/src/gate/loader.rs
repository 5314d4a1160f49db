use outage_core::Gate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub enum GateStatus {
    /// No artifact installed: no gate.
    Absent,
    Loaded(Arc<Gate>),
    /// An artifact exists but cannot be used.
    Invalid,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
    /// Inode and change time; an atomic replace always yields a new inode.
    identity: (u64, i64, i64),
}

impl Stamp {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
            identity: identity(meta),
        }
    }
}

#[cfg(unix)]
fn identity(meta: &std::fs::Metadata) -> (u64, i64, i64) {
    use std::os::unix::fs::MetadataExt;
    (meta.ino(), meta.ctime(), meta.ctime_nsec())
}

#[cfg(not(unix))]
fn identity(_meta: &std::fs::Metadata) -> (u64, i64, i64) {
    (0, 0, 0)
}

/// Reads the installed artifact, reparsing only when the file changes.
pub struct GateLoader {
    path: PathBuf,
    cached: RwLock<Option<(Stamp, Arc<Gate>)>>,
}

impl GateLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn current(&self) -> GateStatus {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                *self.cached.write().await = None;
                return GateStatus::Absent;
            }
            Err(e) => {
                error!("Cannot stat gate artifact {}: {}", self.path.display(), e);
                return GateStatus::Invalid;
            }
        };
        let stamp = Stamp::of(&meta);

        if let Some((cached_stamp, gate)) = self.cached.read().await.as_ref() {
            if *cached_stamp == stamp && stamp.modified.is_some() {
                return GateStatus::Loaded(gate.clone());
            }
        }

        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            // Removed between stat and read.
            Err(e) if e.kind() == ErrorKind::NotFound => return GateStatus::Absent,
            Err(e) => {
                error!("Cannot read gate artifact {}: {}", self.path.display(), e);
                return GateStatus::Invalid;
            }
        };

        match Gate::from_artifact(&text) {
            Ok(gate) => {
                let gate = Arc::new(gate);
                info!(
                    "Loaded maintenance gate for outage #{}",
                    gate.policy().outage_id
                );
                *self.cached.write().await = Some((stamp, gate.clone()));
                GateStatus::Loaded(gate)
            }
            Err(e) => {
                error!("Invalid gate artifact {}: {}", self.path.display(), e);
                GateStatus::Invalid
            }
        }
    }
}
