//! Session checkpoint: ledger + registry + listing cursor, persisted as JSON.
//!
//! Files are replaced atomically (write to a temp file in the same directory,
//! then rename), so a crash mid-save leaves the previous checkpoint intact.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use threadmark_common::{Cursor, MessageId, ThreadRef, ThreadmarkError, TimeWindow};

use crate::registry::RegistrySnapshot;
use crate::resolver::{ResolverContext, Session};

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub session_id: Uuid,
    pub window: TimeWindow,
    pub saved_at: DateTime<Utc>,
    pub ledger: BTreeMap<MessageId, ThreadRef>,
    pub registry: RegistrySnapshot,
    /// Where the listing crawl continues. `None` once the window is exhausted.
    pub last_cursor: Option<Cursor>,
}

impl Checkpoint {
    pub fn capture(session: &Session, ctx: &ResolverContext, last_cursor: Option<Cursor>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            session_id: session.id,
            window: session.window,
            saved_at: Utc::now(),
            ledger: ctx.ledger.snapshot(),
            registry: ctx.registry.snapshot(),
            last_cursor,
        }
    }

    /// Rehydrate the ledger and registry.
    pub fn context(&self) -> ResolverContext {
        ResolverContext::restore(self.ledger.clone(), self.registry.clone())
    }

    pub fn is_complete(&self) -> bool {
        self.last_cursor.is_none()
    }

    /// The session to continue over `window`. A finished crawl has nothing
    /// left to resume; start a new session on top of it instead.
    pub fn resume_session(&self, window: &TimeWindow) -> Result<Session, ThreadmarkError> {
        if self.window != *window {
            return Err(ThreadmarkError::Checkpoint(format!(
                "session {} covers {} .. {}, not {} .. {}",
                self.session_id, self.window.start, self.window.end, window.start, window.end
            )));
        }
        if self.is_complete() {
            return Err(ThreadmarkError::Checkpoint(format!(
                "session {} is already complete",
                self.session_id
            )));
        }
        Ok(Session::resume(self))
    }
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no checkpoint has been written yet.
    pub fn load(&self) -> Result<Option<Checkpoint>, ThreadmarkError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error("read", e)),
        };
        let checkpoint: Checkpoint =
            serde_json::from_str(&raw).map_err(|e| self.error("parse", e))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(ThreadmarkError::Checkpoint(format!(
                "{}: unsupported version {}",
                self.path.display(),
                checkpoint.version
            )));
        }

        info!(
            path = %self.path.display(),
            session_id = %checkpoint.session_id,
            ledger = checkpoint.ledger.len(),
            threads = checkpoint.registry.entries.len(),
            complete = checkpoint.is_complete(),
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), ThreadmarkError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.error("create directory for", e))?;

        let json = serde_json::to_vec_pretty(checkpoint).map_err(|e| self.error("encode", e))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.error("stage", e))?;
        tmp.write_all(&json).map_err(|e| self.error("write", e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.error("replace", e.error))?;

        debug!(
            path = %self.path.display(),
            bytes = json.len(),
            cursor = ?checkpoint.last_cursor,
            "Saved checkpoint"
        );
        Ok(())
    }

    fn error(&self, action: &str, e: impl std::fmt::Display) -> ThreadmarkError {
        ThreadmarkError::Checkpoint(format!("failed to {action} {}: {e}", self.path.display()))
    }
}
