use serde::{Deserialize, Serialize};

/// Commands that can be replicated through Raft
///
/// IMPORTANT: All timestamps must be set BEFORE the command is submitted to Raft.
/// Using `Utc::now()` inside the state machine's `apply()` breaks Raft's determinism
/// guarantee - different nodes would compute different timestamps, causing state divergence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Store `value` under `key`.
    ///
    /// With `if_version` set the write only applies if the key exists at
    /// exactly that version, or with [`ABSENT`] only if the key does not
    /// exist; without it the write is an upsert.
    Put {
        request_id: String,
        key: String,
        value: Vec<u8>,
        if_version: Option<u64>,
        /// Timestamp when command was created (set before Raft replication)
        timestamp: String,
    },
    /// Remove `key`, optionally guarded by `if_version`.
    Remove {
        request_id: String,
        key: String,
        if_version: Option<u64>,
    },
}

impl Command {
    /// Get the request ID for idempotency checking
    pub fn request_id(&self) -> &str {
        match self {
            Command::Put { request_id, .. } | Command::Remove { request_id, .. } => request_id,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Put { key, .. } | Command::Remove { key, .. } => key,
        }
    }
}

// =============================================================================
// Map Types
// =============================================================================

/// `if_version` guard meaning "the key must not exist yet". Versions start
/// at 1, so 0 never matches a stored entry.
pub const ABSENT: u64 = 0;

/// A versioned value stored in the replicated map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    /// Map revision at which this value was written
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

// =============================================================================
// Response Types
// =============================================================================

/// Response from applying a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Entry as stored after a put
    Entry(Entry),
    /// Last stored entry of a removed key
    Removed(Entry),
    /// Create-only put hit an existing key
    AlreadyExists {
        key: String,
    },
    /// Optimistic lock failed
    VersionMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },
    Error {
        code: u32,
        message: String,
    },
}

impl Default for Response {
    fn default() -> Self {
        Response::Error {
            code: 0,
            message: "No response".to_string(),
        }
    }
}
