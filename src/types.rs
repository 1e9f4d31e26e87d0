//! Small shared types used across the engine's modules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical id of a task, as assigned by the metadata store.
pub type TaskId = i64;

/// The upstream an input is fetched from. Together with [`TaskType`] this
/// resolves to exactly one registered fetch function (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataSource {
    SpotifyApi,
    SpotifyInternal,
    DummyApi,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::SpotifyApi => "spotify-api",
            DataSource::SpotifyInternal => "spotify-internal",
            DataSource::DummyApi => "dummy-api",
        }
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spotify-api" => Ok(DataSource::SpotifyApi),
            "spotify-internal" => Ok(DataSource::SpotifyInternal),
            "dummy-api" => Ok(DataSource::DummyApi),
            other => Err(format!("unrecognized data source: {other}")),
        }
    }
}

/// A task's free-form, data-source-specific type string (e.g. `tracks`).
pub type TaskType = String;

/// The durable state of a task, per the state machine in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Paused,
    Pending,
    Running,
    Pausing,
    Done,
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Paused => "paused",
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Pausing => "pausing",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paused" => Ok(TaskStatus::Paused),
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "pausing" => Ok(TaskStatus::Pausing),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            other => Err(format!("unrecognized task status: {other}")),
        }
    }
}

/// One of the four durable sub-queues belonging to a task (§3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    Inputs,
    Successes,
    Failures,
    InputsWithoutOutput,
}

impl QueueName {
    pub fn table_name(&self) -> &'static str {
        match self {
            QueueName::Inputs => "unique_queue_inputs",
            QueueName::Successes => "queue_successes",
            QueueName::Failures => "queue_failures",
            QueueName::InputsWithoutOutput => "queue_inputs_without_output",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Inputs => "inputs",
            QueueName::Successes => "successes",
            QueueName::Failures => "failures",
            QueueName::InputsWithoutOutput => "inputs-without-output",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inputs" => Ok(QueueName::Inputs),
            "successes" => Ok(QueueName::Successes),
            "failures" => Ok(QueueName::Failures),
            "inputs-without-output" => Ok(QueueName::InputsWithoutOutput),
            other => Err(format!("unrecognized queue name: {other}")),
        }
    }
}

/// Snapshot of the four queue counts for a task (§3 "Derived progress").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemCounts {
    pub successes: i64,
    pub failures: i64,
    pub inputs_without_output: i64,
    pub remaining: i64,
}
