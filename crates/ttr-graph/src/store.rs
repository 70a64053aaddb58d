use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;
use ttr_core::{Address, Edge, Job};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The last importance snapshot of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub job: Job,
    /// Importance sorted highest first.
    pub importance: Vec<(Address, f64)>,
}

/// Keeps crawl output per job: the latest snapshot and every confirmed
/// edge. Values are JSON because edges carry the provider's raw record.
pub struct ResultStore {
    db: Db,
    snapshots: Tree,
    edges: Tree,
}

impl ResultStore {
    /// Opens or creates a result store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let snapshots = db.open_tree("snapshots")?;
        let edges = db.open_tree("edges")?;
        Ok(Self {
            db,
            snapshots,
            edges,
        })
    }

    /// Replaces the snapshot stored for `job_key`.
    pub fn save_snapshot(&self, job_key: &str, snapshot: &StoredSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.snapshots.insert(job_key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn load_snapshot(&self, job_key: &str) -> Result<Option<StoredSnapshot>, StoreError> {
        match self.snapshots.get(job_key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Appends a confirmed edge to the job's edge log.
    pub fn append_edge(&self, job_key: &str, edge: &Edge) -> Result<(), StoreError> {
        let sequence = self.db.generate_id()?;
        let key = format!("{job_key}\u{0}{sequence:020}");
        self.edges.insert(key.as_bytes(), serde_json::to_vec(edge)?)?;
        Ok(())
    }

    /// Confirmed edges of a job in the order they were appended.
    pub fn load_edges(&self, job_key: &str) -> Result<Vec<Edge>, StoreError> {
        let prefix = format!("{job_key}\u{0}");
        self.edges
            .scan_prefix(prefix.as_bytes())
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    /// Keys of every job with a stored snapshot, sorted.
    pub fn job_keys(&self) -> Result<Vec<String>, StoreError> {
        self.snapshots
            .iter()
            .keys()
            .map(|key| Ok(String::from_utf8_lossy(&key?).into_owned()))
            .collect()
    }

    /// Removes everything stored for a job.
    pub fn clear_job(&self, job_key: &str) -> Result<(), StoreError> {
        self.snapshots.remove(job_key.as_bytes())?;
        let prefix = format!("{job_key}\u{0}");
        let keys: Vec<_> = self
            .edges
            .scan_prefix(prefix.as_bytes())
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.edges.remove(key)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
