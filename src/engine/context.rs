//! Contexts handed to activities while they fuse, pipe or execute.

use crate::activity::ActivityId;
use crate::error::{ActivityError, ActivityResult};
use crate::storage::{CheckpointWriter, StorageManager};
use crate::types::TupleType;
use crate::variables::VariableStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// A message an activity reported during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Messages of one activity. Every entry is also emitted as a `tracing` event.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    activity_id: ActivityId,
    entries: Vec<LogEntry>,
}

impl ActivityLog {
    pub fn new(activity_id: ActivityId) -> Self {
        Self {
            activity_id,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!(activity = %self.activity_id, "{}", message),
            LogLevel::Warning => warn!(activity = %self.activity_id, "{}", message),
            LogLevel::Error => error!(activity = %self.activity_id, "{}", message),
        }
        self.entries.push(LogEntry {
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

fn interrupted() -> ActivityError {
    ActivityError::generic("Execution was interrupted")
}

/// Context for imperative execution.
pub struct ExecutionContext {
    activity_id: ActivityId,
    storage: Arc<dyn StorageManager>,
    variables: VariableStore,
    log: ActivityLog,
    interrupt: Arc<AtomicBool>,
    progress_interval: u64,
    progress: f64,
}

impl ExecutionContext {
    pub fn new(
        activity_id: ActivityId,
        storage: Arc<dyn StorageManager>,
        variables: VariableStore,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            activity_id,
            storage,
            variables,
            log: ActivityLog::new(activity_id),
            interrupt,
            progress_interval: 1000,
            progress: 0.0,
        }
    }

    pub fn with_progress_interval(mut self, progress_interval: u64) -> Self {
        self.progress_interval = progress_interval.max(1);
        self
    }

    pub fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    /// Number of tuples between two progress updates of pipelined work.
    pub fn progress_interval(&self) -> u64 {
        self.progress_interval
    }

    /// Read-only view of the variables visible to the activity.
    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn storage(&self) -> &dyn StorageManager {
        self.storage.as_ref()
    }

    /// Opens the writer for output `port`. The checkpoint exists once the writer is closed.
    pub fn create_writer(
        &self,
        port: usize,
        tuple_type: TupleType,
    ) -> ActivityResult<Box<dyn CheckpointWriter>> {
        Ok(self
            .storage
            .create_writer(self.activity_id, port, tuple_type)?)
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log.push(LogLevel::Info, message);
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log.push(LogLevel::Warning, message);
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log.push(LogLevel::Error, message);
    }

    pub fn update_progress(&mut self, progress: f64) {
        self.progress = progress.clamp(0.0, 1.0);
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Fails if the execution was interrupted. Long running activities call this regularly.
    pub fn check_interrupted(&self) -> ActivityResult<()> {
        if self.is_interrupted() {
            Err(interrupted())
        } else {
            Ok(())
        }
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub(crate) fn append_log(&mut self, log: ActivityLog) {
        self.log.entries.extend(log.entries);
    }

    pub(crate) fn into_log(self) -> ActivityLog {
        self.log
    }
}

/// Context for building a plan fragment.
pub struct FuseContext {
    activity_id: ActivityId,
    log: ActivityLog,
}

impl FuseContext {
    pub fn new(activity_id: ActivityId) -> Self {
        Self {
            activity_id,
            log: ActivityLog::new(activity_id),
        }
    }

    pub fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log.push(LogLevel::Info, message);
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log.push(LogLevel::Warning, message);
    }

    pub(crate) fn into_log(self) -> ActivityLog {
        self.log
    }
}

/// Context for a pipelined activity.
pub struct PipeContext {
    activity_id: ActivityId,
    log: ActivityLog,
    interrupt: Arc<AtomicBool>,
    estimated_tuples: i64,
    progress_interval: u64,
    processed: u64,
    progress: f64,
}

impl PipeContext {
    pub fn new(
        activity_id: ActivityId,
        interrupt: Arc<AtomicBool>,
        estimated_tuples: i64,
        progress_interval: u64,
    ) -> Self {
        Self {
            activity_id,
            log: ActivityLog::new(activity_id),
            interrupt,
            estimated_tuples,
            progress_interval: progress_interval.max(1),
            processed: 0,
            progress: 0.0,
        }
    }

    pub fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    /// Estimated number of output tuples, or a negative value if unknown.
    pub fn estimated_tuple_count(&self) -> i64 {
        self.estimated_tuples
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log.push(LogLevel::Info, message);
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log.push(LogLevel::Warning, message);
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log.push(LogLevel::Error, message);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    pub fn check_interrupted(&self) -> ActivityResult<()> {
        if self.is_interrupted() {
            Err(interrupted())
        } else {
            Ok(())
        }
    }

    /// Counts one processed tuple and updates the progress from the estimate at every
    /// progress interval.
    pub fn tuple_processed(&mut self) {
        self.processed += 1;
        if self.processed % self.progress_interval == 0 && self.estimated_tuples > 0 {
            self.progress = (self.processed as f64 / self.estimated_tuples as f64).min(1.0);
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub(crate) fn into_log(self) -> ActivityLog {
        self.log
    }
}
