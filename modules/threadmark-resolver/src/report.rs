//! Session report: counts per resolution path plus every audit entry the
//! session produced. Printed at the end of a run and saved as
//! `{checkpoint}.report.json` next to the checkpoint.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use threadmark_common::{ResolutionPath, ThreadRef, ThreadmarkError, TimeWindow};

use crate::error::RegistryConflict;
use crate::registry::PutOutcome;
use crate::resolver::{
    EntryOutcome, LedgerConflict, Overlap, Resolution, ResolverContext, Strategy, UnresolvedReason,
};

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedEntry {
    pub thread_ref: ThreadRef,
    #[serde(flatten)]
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub strategy: Strategy,
    pub window: TimeWindow,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub pages: u32,
    /// Rows skipped because an earlier page of the session listed them.
    pub duplicates: u32,
    pub fast_path: u32,
    pub expansions: u32,
    pub enriched: u32,
    pub ledger_hits: u32,
    pub skipped_replies: u32,
    pub cross_referenced: u32,
    pub fallthroughs: u32,

    pub unresolved: Vec<UnresolvedEntry>,
    pub ledger_conflicts: Vec<LedgerConflict>,
    pub registry_conflicts: Vec<RegistryConflict>,
    pub overlaps: Vec<Overlap>,

    // Totals after the session, including anything restored from a checkpoint.
    pub ledger_size: usize,
    pub origins: usize,
    pub cross_references: usize,
}

impl SessionReport {
    pub fn new(session_id: Uuid, window: TimeWindow, strategy: Strategy) -> Self {
        Self {
            session_id,
            strategy,
            window,
            started_at: Utc::now(),
            finished_at: None,
            pages: 0,
            duplicates: 0,
            fast_path: 0,
            expansions: 0,
            enriched: 0,
            ledger_hits: 0,
            skipped_replies: 0,
            cross_referenced: 0,
            fallthroughs: 0,
            unresolved: Vec::new(),
            ledger_conflicts: Vec::new(),
            registry_conflicts: Vec::new(),
            overlaps: Vec::new(),
            ledger_size: 0,
            origins: 0,
            cross_references: 0,
        }
    }

    pub fn record(&mut self, resolution: &Resolution) {
        if resolution.fell_through {
            self.fallthroughs += 1;
        }
        match &resolution.outcome {
            EntryOutcome::Known { .. } => self.ledger_hits += 1,
            EntryOutcome::Committed { path, put, .. } => {
                match path {
                    ResolutionPath::Listing => self.fast_path += 1,
                    ResolutionPath::Expansion => self.expansions += 1,
                }
                if *put == PutOutcome::Enriched {
                    self.enriched += 1;
                }
            }
            EntryOutcome::CrossReferenced { .. } => self.cross_referenced += 1,
            EntryOutcome::SkippedReply => self.skipped_replies += 1,
            EntryOutcome::Unresolved(reason) => self.unresolved.push(UnresolvedEntry {
                thread_ref: resolution.thread_ref.clone(),
                reason: reason.clone(),
            }),
            // Collected from the registry in `finish`.
            EntryOutcome::Conflicted(_) => {}
        }
        if let Some(conflict) = &resolution.ledger_conflict {
            self.ledger_conflicts.push(conflict.clone());
        }
        self.overlaps.extend(resolution.overlaps.iter().cloned());
    }

    pub fn finish(&mut self, ctx: &ResolverContext) {
        let (origins, cross_references) = ctx.registry.counts();
        self.origins = origins;
        self.cross_references = cross_references;
        self.ledger_size = ctx.ledger.len();
        self.registry_conflicts = ctx.registry.conflicts();
        self.finished_at = Some(Utc::now());
    }

    pub fn is_unresolved(&self, thread_ref: &ThreadRef) -> bool {
        self.unresolved.iter().any(|u| &u.thread_ref == thread_ref)
    }

    /// Report path belonging to a checkpoint path.
    pub fn path_for(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("report.json")
    }

    pub fn save(&self, path: &Path) -> Result<(), ThreadmarkError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| save_error(path, "create directory for", e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| save_error(path, "encode", e))?;
        std::fs::write(path, json).map_err(|e| save_error(path, "write", e))?;
        info!(path = %path.display(), "Session report saved");
        Ok(())
    }
}

fn save_error(path: &Path, action: &str, e: impl std::fmt::Display) -> ThreadmarkError {
    ThreadmarkError::Checkpoint(format!(
        "failed to {action} session report {}: {e}",
        path.display()
    ))
}

impl std::fmt::Display for SessionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Resolver Session Complete ===")?;
        writeln!(f, "Session:            {}", self.session_id)?;
        writeln!(f, "Strategy:           {}", self.strategy)?;
        writeln!(f, "Window:             {} .. {}", self.window.start, self.window.end)?;
        writeln!(f, "Listing pages:      {}", self.pages)?;
        writeln!(f, "Duplicate rows:     {}", self.duplicates)?;
        writeln!(f, "\nEntries:")?;
        writeln!(f, "  Fast path:        {}", self.fast_path)?;
        writeln!(f, "  Expanded:         {}", self.expansions)?;
        writeln!(f, "  Enriched:         {}", self.enriched)?;
        writeln!(f, "  Ledger hits:      {}", self.ledger_hits)?;
        writeln!(f, "  Cross-referenced: {}", self.cross_referenced)?;
        writeln!(f, "  Skipped replies:  {}", self.skipped_replies)?;
        writeln!(f, "  Fallthroughs:     {}", self.fallthroughs)?;
        writeln!(f, "  Unresolved:       {}", self.unresolved.len())?;
        writeln!(f, "\nRegistry:")?;
        writeln!(f, "  Origins:          {}", self.origins)?;
        writeln!(f, "  Cross-references: {}", self.cross_references)?;
        writeln!(f, "  Ledger size:      {}", self.ledger_size)?;
        writeln!(f, "\nAudit:")?;
        writeln!(f, "  Ledger conflicts:   {}", self.ledger_conflicts.len())?;
        writeln!(f, "  Registry conflicts: {}", self.registry_conflicts.len())?;
        writeln!(f, "  Overlaps:           {}", self.overlaps.len())?;
        if !self.unresolved.is_empty() {
            writeln!(f, "\nUnresolved threads:")?;
            for entry in &self.unresolved {
                writeln!(f, "  {} ({})", entry.thread_ref, entry.reason)?;
            }
        }
        Ok(())
    }
}
