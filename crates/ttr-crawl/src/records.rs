//! Output records and the sinks that receive them.
//!
//! A crawl produces three kinds of record: every confirmed edge, an
//! importance snapshot whenever a task is unlocked after a push, and one
//! summary per finished task. Records carry the owning job so several
//! jobs can share a sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use thiserror::Error;
use tracing::debug;
use ttr_core::{Address, Edge, Job};
use ttr_graph::{ResultStore, StoreError, StoredSnapshot, TaskId};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write record: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result store error: {0}")]
    Store(#[from] StoreError),
}

/// Identity of the job a record belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub task: TaskId,
    #[serde(flatten)]
    pub job: Job,
}

impl JobInfo {
    pub fn new(task: TaskId, job: Job) -> Self {
        Self { task, job }
    }

    /// Key under which results of this job are stored.
    ///
    /// Every job parameter that can change the outcome is part of the key,
    /// so a parameter sweep keeps one result per setting while a re-run of
    /// the same job replaces the earlier results.
    pub fn key(&self) -> String {
        let job = &self.job;
        let types: Vec<&str> = job.tx_types.iter().map(|t| t.as_str()).collect();
        format!(
            "{}/{}/{}-{}/{}/a{}-b{}-e{}/retry{}-page{}{}",
            job.source,
            job.strategy.as_str(),
            job.range.start,
            job.range.end,
            types.join(","),
            job.alpha,
            job.beta,
            job.epsilon,
            job.max_retry,
            job.page_threshold,
            if job.auto_paginate { "-auto" } else { "" }
        )
    }
}

/// One line of crawl output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    /// A transfer that is now part of the settled subgraph.
    ConfirmedEdge { job: JobInfo, edge: Edge },

    /// The task's importance vector, highest score first.
    Importance {
        job: JobInfo,
        importance: Vec<(Address, f64)>,
        emitted_at: DateTime<Utc>,
    },

    /// A task ran out of frontier.
    Finished {
        job: JobInfo,
        resolved: usize,
        fused: usize,
        settled_mass: f64,
    },
}

impl Record {
    pub fn job(&self) -> &JobInfo {
        match self {
            Record::ConfirmedEdge { job, .. } => job,
            Record::Importance { job, .. } => job,
            Record::Finished { job, .. } => job,
        }
    }
}

/// Receives records as the crawl produces them.
pub trait RecordSink {
    fn write(&mut self, record: &Record) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        (**self).write(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

impl<S: RecordSink> RecordSink for Option<S> {
    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        match self {
            Some(sink) => sink.write(record),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        match self {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

/// Writes every record to both sinks.
impl<A: RecordSink, B: RecordSink> RecordSink for (A, B) {
    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        self.0.write(record)?;
        self.1.write(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.0.flush()?;
        self.1.flush()
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirmed_edges(&self) -> impl Iterator<Item = &Edge> {
        self.records.iter().filter_map(|record| match record {
            Record::ConfirmedEdge { edge, .. } => Some(edge),
            _ => None,
        })
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &Vec<(Address, f64)>> {
        self.records.iter().filter_map(|record| match record {
            Record::Importance { importance, .. } => Some(importance),
            _ => None,
        })
    }

    pub fn finished(&self) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(|record| matches!(record, Record::Finished { .. }))
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Saves the latest snapshot and every confirmed edge of each job.
///
/// The first record of a job in a run clears what an earlier run stored
/// under the same key. When two tasks of one run carry identical jobs,
/// only the first is stored.
pub struct StoreSink<'a> {
    store: &'a ResultStore,
    owners: HashMap<String, TaskId>,
}

impl<'a> StoreSink<'a> {
    pub fn new(store: &'a ResultStore) -> Self {
        Self {
            store,
            owners: HashMap::new(),
        }
    }
}

impl RecordSink for StoreSink<'_> {
    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let job = record.job();
        let key = job.key();
        match self.owners.get(&key) {
            Some(owner) if *owner != job.task => {
                debug!("Task {} duplicates task {}; not storing", job.task, owner);
                return Ok(());
            }
            Some(_) => {}
            None => {
                self.store.clear_job(&key)?;
                self.owners.insert(key.clone(), job.task);
            }
        }

        match record {
            Record::ConfirmedEdge { edge, .. } => self.store.append_edge(&key, edge)?,
            Record::Importance {
                job, importance, ..
            } => {
                let snapshot = StoredSnapshot {
                    job: job.job.clone(),
                    importance: importance.clone(),
                };
                self.store.save_snapshot(&key, &snapshot)?;
            }
            Record::Finished { .. } => {}
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.store.flush()?;
        Ok(())
    }
}
