//! Task and result envelopes, and the manager wire protocol.
//!
//! The wire format is one JSON object per line. Every connection opens
//! with a `hello` frame carrying the shared secret; the manager answers
//! `welcome` or `rejected` and closes on rejection.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParallelError, Result};
use crate::task::TaskFailure;

/// Identifies one `run_in_parallel` call across all workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Fresh random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// Content address of a shared payload (SHA-1 of its bytes, hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a payload.
    pub fn for_payload(bytes: &[u8]) -> Self {
        Self(sha1_smol::Sha1::from(bytes).digest().to_string())
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One queued task: function id, small arguments, shared-input key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Job the task belongs to.
    pub job: JobId,
    /// Position of the task's argument in the submitted list.
    pub index: usize,
    /// Registered function id.
    pub function: String,
    /// JSON-encoded arguments.
    pub args: serde_json::Value,
    /// Key of the shared input in the content cache.
    pub cache_key: CacheKey,
}

/// The computed value, or failure, for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Job the task belonged to.
    pub job: JobId,
    /// Position of the task's argument in the submitted list.
    pub index: usize,
    /// JSON-encoded output or the failure.
    pub outcome: std::result::Result<serde_json::Value, TaskFailure>,
}

/// Requests sent to the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    /// Authentication, always the first frame.
    Hello {
        /// Shared secret.
        secret: String,
    },
    /// Enqueue a task.
    PushTask {
        /// The task.
        task: TaskEnvelope,
    },
    /// Dequeue a task, waiting up to `timeout_ms`.
    PopTask {
        /// Longest wait in milliseconds.
        timeout_ms: u64,
    },
    /// Remove every queued task of a job.
    DrainJob {
        /// The job.
        job: JobId,
    },
    /// Deliver a result.
    PushResult {
        /// The result.
        result: ResultEnvelope,
    },
    /// Take the next result of a job, waiting up to `timeout_ms`.
    PopResult {
        /// The job.
        job: JobId,
        /// Longest wait in milliseconds.
        timeout_ms: u64,
    },
    /// Store a payload.
    CacheInsert {
        /// Content key.
        key: CacheKey,
        /// Base64 payload.
        payload: String,
    },
    /// Read a payload.
    CacheFetch {
        /// Content key.
        key: CacheKey,
    },
    /// Drop one reference to a payload.
    CacheRelease {
        /// Content key.
        key: CacheKey,
    },
}

/// Replies from the manager, one per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    /// Secret accepted.
    Welcome,
    /// Secret refused; the connection closes.
    Rejected {
        /// Why.
        reason: String,
    },
    /// Request done.
    Ok,
    /// Answer to `pop_task`.
    Task {
        /// The task, if one arrived in time.
        task: Option<TaskEnvelope>,
    },
    /// Answer to `pop_result`.
    Result {
        /// The result, if one arrived in time.
        result: Option<ResultEnvelope>,
    },
    /// Answer to `drain_job`.
    Drained {
        /// Number of tasks removed.
        count: usize,
    },
    /// Answer to `cache_fetch`.
    Payload {
        /// Base64 payload, if the key is cached.
        payload: Option<String>,
    },
    /// The manager failed to serve the request.
    Error {
        /// Why.
        message: String,
    },
}

/// Base64-encode a payload for the wire.
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 payload from the wire.
pub fn decode_payload(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| ParallelError::Protocol(format!("bad payload encoding: {e}")))
}
