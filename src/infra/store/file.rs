//! Durable job store persisted as JSON lines.
//!
//! The file holds one record per line: either a job or a deleted-scope marker.
//! Every commit rewrites the file before the in-memory state is replaced, so a
//! failed write leaves both the file and the store at the previous commit.

use std::fs::{self, create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::memory::{StateSession, StoreState};
use crate::core::error::SchedulerError;
use crate::core::job::Job;
use crate::core::store::{JobSession, JobStore};

#[derive(Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Line {
    Job(Box<Job>),
    DeletedScope { scope: String },
}

fn io_error(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Store(e.to_string())
}

pub(crate) fn write_state(path: &Path, state: &StoreState) -> Result<(), SchedulerError> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io_error)?;
        let mut out = BufWriter::new(file);
        let mut jobs: Vec<&Job> = state.jobs.values().collect();
        jobs.sort_by_key(|j| (j.requested_time, j.id));
        for job in jobs {
            let line = serde_json::to_string(&Line::Job(Box::new(job.clone()))).map_err(io_error)?;
            writeln!(out, "{line}").map_err(io_error)?;
        }
        for scope in &state.deleted_scopes {
            let line = serde_json::to_string(&Line::DeletedScope {
                scope: scope.clone(),
            })
            .map_err(io_error)?;
            writeln!(out, "{line}").map_err(io_error)?;
        }
        out.flush().map_err(io_error)?;
    }
    fs::rename(&tmp, path).map_err(io_error)
}

fn read_state(path: &Path) -> Result<StoreState, SchedulerError> {
    let mut state = StoreState::default();
    if !path.exists() {
        return Ok(state);
    }
    let file = OpenOptions::new().read(true).open(path).map_err(io_error)?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(io_error)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line).map_err(io_error)? {
            Line::Job(job) => {
                state.jobs.insert(job.id, *job);
            }
            Line::DeletedScope { scope } => {
                state.deleted_scopes.insert(scope);
            }
        }
    }
    Ok(state)
}

/// Job store backed by a JSON-lines file, surviving process restarts.
#[derive(Debug)]
pub struct JsonFileJobStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileJobStore {
    /// Open (or create) the store `<dir>/<name>.jsonl`, loading any records it holds.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self, SchedulerError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(io_error)?;
        let path = dir.join(format!("{name}.jsonl"));
        let state = read_state(&path)?;
        tracing::debug!(path = %path.display(), jobs = state.jobs.len(), "opened job store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// File holding the records.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JobStore for JsonFileJobStore {
    fn begin(&self) -> Result<Box<dyn JobSession + '_>, SchedulerError> {
        Ok(Box::new(StateSession::new(
            self.state.lock(),
            Some(self.path.as_path()),
        )))
    }
}
