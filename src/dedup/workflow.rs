//! Resolution session state machine.
//!
//! ```text
//! Idle ──▶ Presenting ──▶ AwaitingDecision ──▶ Applying ──▶ Presenting (next)
//!   │                            │                              │
//!   └──── exhausted ─────────────┴──────── abort ───────────────┴──▶ Done
//! ```
//!
//! The engine only suspends in `AwaitingDecision`, inside
//! [`DecisionProvider::decide`]. Every other transition is synchronous.
//! A record is purged from the index exactly when its file was deleted (or
//! was found already gone); a failed deletion keeps both file and record.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::actions::delete::{validate_preserves_copy, DeleteError, FileRemover};
use crate::duplicates::{groups, DuplicateGroup, DuplicateGroups};
use crate::error::Result;
use crate::index::{FileRecord, IndexStore};

/// Decision returned by the UI collaborator for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionDecision {
    /// Keep this member, delete the rest.
    KeepOne(PathBuf),
    /// Keep these members, delete the rest.
    KeepMany(Vec<PathBuf>),
    /// Leave the group untouched.
    Skip,
    /// End the session now.
    Abort,
}

/// What the UI collaborator is shown for one group.
#[derive(Debug, Clone)]
pub struct Presentation<'a> {
    /// Zero-based position of the group in this session
    pub index: usize,
    /// Groups known when the session started
    pub total: usize,
    /// The group to resolve
    pub group: &'a DuplicateGroup,
    /// Suggested member to keep (advisory)
    pub suggestion: Option<PathBuf>,
    /// True when the suggestion comes from an earlier decision on the same directories
    pub remembered: bool,
}

/// UI collaborator: turns one presented group into one decision.
pub trait DecisionProvider {
    /// Decide what to do with `presentation.group`.
    fn decide(&mut self, presentation: &Presentation<'_>) -> ResolutionDecision;

    /// Called after a group's decision has been applied.
    fn applied(&mut self, _group: &DuplicateGroup, _outcome: &GroupOutcome) {}
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing pulled yet, or between groups
    Idle,
    /// A group has been pulled
    Presenting,
    /// Waiting on the decision provider
    AwaitingDecision,
    /// Deleting non-kept members
    Applying,
    /// Terminal
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Presenting => "presenting",
            Self::AwaitingDecision => "awaiting-decision",
            Self::Applying => "applying",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Category of a per-file or per-group failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The decision named nothing, or a path outside the group
    InvalidDecision,
    /// No kept member still exists with its recorded size
    KeptCopyMissing,
    /// File changed since it was indexed
    Modified,
    /// Deletion itself failed
    DeleteFailed,
    /// The file is gone but its record could not be purged
    IndexUpdate,
}

/// One reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupFailure {
    /// Failure category
    pub kind: FailureKind,
    /// Affected path, when the failure concerns a single file
    pub path: Option<PathBuf>,
    /// Human-readable detail
    pub message: String,
}

impl DedupFailure {
    fn from_delete(error: &DeleteError) -> Self {
        let kind = match error {
            DeleteError::Modified(_) => FailureKind::Modified,
            _ => FailureKind::DeleteFailed,
        };
        Self {
            kind,
            path: error.path().map(Path::to_path_buf),
            message: error.to_string(),
        }
    }
}

/// Result of applying one decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    /// Files deleted from disk and index
    pub deleted: Vec<PathBuf>,
    /// Files already gone; their records were purged
    pub already_missing: Vec<PathBuf>,
    /// Bytes freed by this group
    pub bytes_reclaimed: u64,
    /// Failures; affected records were kept
    pub failures: Vec<DedupFailure>,
}

/// Totals for one resolution session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupSummary {
    /// Groups handed to the decision provider
    pub groups_presented: u64,
    /// Groups with an applied keep decision
    pub groups_resolved: u64,
    /// Groups skipped (including rejected decisions)
    pub groups_skipped: u64,
    /// Files deleted from disk and index
    pub files_deleted: u64,
    /// Bytes freed
    pub bytes_reclaimed: u64,
    /// Files found already gone and purged
    pub already_missing: u64,
    /// True if the session ended by abort or shutdown
    pub aborted: bool,
    /// Per-file and per-group failures
    pub failures: Vec<DedupFailure>,
}

impl DedupSummary {
    /// Whether any failure was reported.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn absorb(&mut self, outcome: &GroupOutcome) {
        self.files_deleted += outcome.deleted.len() as u64;
        self.already_missing += outcome.already_missing.len() as u64;
        self.bytes_reclaimed = self.bytes_reclaimed.saturating_add(outcome.bytes_reclaimed);
        self.failures.extend(outcome.failures.iter().cloned());
    }
}

enum Step {
    Idle,
    Presenting(DuplicateGroup),
    AwaitingDecision(DuplicateGroup),
    Applying(DuplicateGroup, ResolutionDecision),
    Done,
}

impl Step {
    fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Presenting(_) => SessionState::Presenting,
            Self::AwaitingDecision(_) => SessionState::AwaitingDecision,
            Self::Applying(..) => SessionState::Applying,
            Self::Done => SessionState::Done,
        }
    }
}

/// One run of the resolution workflow over an index.
///
/// [`run`](Self::run) drives the session to completion; [`step`](Self::step)
/// performs a single transition so callers can observe each state.
/// The caller holds the write lock for the lifetime of the session.
pub struct ResolutionSession<'a, P, R> {
    store: &'a IndexStore,
    provider: P,
    remover: R,
    shutdown_flag: Option<Arc<AtomicBool>>,
    preferences: HashMap<BTreeSet<PathBuf>, PathBuf>,
    summary: DedupSummary,
    pending: Option<DuplicateGroups<'a>>,
    total: usize,
    step: Step,
}

impl<'a, P: DecisionProvider, R: FileRemover> ResolutionSession<'a, P, R> {
    /// New session in the `Idle` state.
    pub fn new(store: &'a IndexStore, provider: P, remover: R) -> Self {
        Self {
            store,
            provider,
            remover,
            shutdown_flag: None,
            preferences: HashMap::new(),
            summary: DedupSummary::default(),
            pending: None,
            total: 0,
            step: Step::Idle,
        }
    }

    /// Treat a raised flag as `abort` between groups.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.step.state()
    }

    /// The group being presented, decided on or applied, if any.
    #[must_use]
    pub fn current_group(&self) -> Option<&DuplicateGroup> {
        match &self.step {
            Step::Presenting(group) | Step::AwaitingDecision(group) | Step::Applying(group, _) => {
                Some(group)
            }
            Step::Idle | Step::Done => None,
        }
    }

    /// Totals so far.
    #[must_use]
    pub fn summary(&self) -> &DedupSummary {
        &self.summary
    }

    /// Perform one transition and return the new state.
    ///
    /// `AwaitingDecision` is left by asking the decision provider. Stepping
    /// a `Done` session does nothing.
    ///
    /// # Errors
    ///
    /// Index read failures while pulling the next group. The session is
    /// `Done` afterwards.
    pub fn step(&mut self) -> Result<SessionState> {
        let current = std::mem::replace(&mut self.step, Step::Done);
        self.step = match current {
            Step::Idle => self.next_group()?,
            Step::Presenting(group) => {
                self.summary.groups_presented += 1;
                Step::AwaitingDecision(group)
            }
            Step::AwaitingDecision(group) => {
                let decision = self.await_decision(&group);
                log::debug!("Decision for group {}: {:?}", group.fingerprint.short(), decision);
                match decision {
                    ResolutionDecision::Abort => {
                        self.summary.aborted = true;
                        Step::Done
                    }
                    ResolutionDecision::Skip => {
                        self.summary.groups_skipped += 1;
                        Step::Idle
                    }
                    keep => Step::Applying(group, keep),
                }
            }
            Step::Applying(group, decision) => {
                let outcome = self.apply(&group, &decision);
                self.summary.absorb(&outcome);
                self.provider.applied(&group, &outcome);
                Step::Idle
            }
            Step::Done => Step::Done,
        };
        Ok(self.state())
    }

    /// Drive the session to `Done`.
    ///
    /// # Errors
    ///
    /// Index read failures. Per-file problems are reported in the summary
    /// instead.
    pub fn run(mut self) -> Result<(DedupSummary, P)> {
        while self.step()? != SessionState::Done {}

        log::info!(
            "Dedup session done: {} group(s) presented, {} file(s) deleted, {} bytes reclaimed",
            self.summary.groups_presented,
            self.summary.files_deleted,
            self.summary.bytes_reclaimed
        );
        Ok(self.finish())
    }

    /// End the session, returning the totals and the decision provider.
    pub fn finish(self) -> (DedupSummary, P) {
        (self.summary, self.provider)
    }

    fn next_group(&mut self) -> Result<Step> {
        if self
            .shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
        {
            log::info!("Shutdown requested, ending dedup session");
            self.summary.aborted = true;
            return Ok(Step::Done);
        }
        if self.pending.is_none() {
            let sequence = groups(self.store)?;
            self.total = sequence.total();
            self.pending = Some(sequence);
        }
        match self.pending.as_mut().and_then(Iterator::next) {
            Some(group) => Ok(Step::Presenting(group?)),
            None => Ok(Step::Done),
        }
    }

    fn await_decision(&mut self, group: &DuplicateGroup) -> ResolutionDecision {
        let (suggestion, remembered) = match self.remembered_choice(group) {
            Some(path) => (Some(path), true),
            None => (group.oldest().map(|r| r.path.clone()), false),
        };
        let presentation = Presentation {
            index: (self.summary.groups_presented - 1) as usize,
            total: self.total,
            group,
            suggestion,
            remembered,
        };
        self.provider.decide(&presentation)
    }

    fn remembered_choice(&self, group: &DuplicateGroup) -> Option<PathBuf> {
        if !group.shares_file_name() {
            return None;
        }
        let dir = self.preferences.get(&group.directories())?;
        group
            .members
            .iter()
            .find(|m| m.parent() == Some(dir.as_path()))
            .map(|m| m.path.clone())
    }

    fn remember(&mut self, group: &DuplicateGroup, kept: &Path) {
        if !group.shares_file_name() {
            return;
        }
        if let Some(dir) = kept.parent() {
            self.preferences.insert(group.directories(), dir.to_path_buf());
        }
    }

    fn apply(&mut self, group: &DuplicateGroup, decision: &ResolutionDecision) -> GroupOutcome {
        let mut outcome = GroupOutcome::default();
        let kept: Vec<PathBuf> = match decision {
            ResolutionDecision::KeepOne(path) => vec![path.clone()],
            ResolutionDecision::KeepMany(paths) => paths.clone(),
            ResolutionDecision::Skip | ResolutionDecision::Abort => return outcome,
        };

        if let Some(stranger) = kept.iter().find(|p| !group.contains(p)) {
            self.reject(&mut outcome, FailureKind::InvalidDecision, format!(
                "{} is not a member of this group",
                stranger.display()
            ));
            return outcome;
        }

        let doomed: Vec<&FileRecord> = group
            .members
            .iter()
            .filter(|m| !kept.contains(&m.path))
            .collect();
        let doomed_paths: Vec<PathBuf> = doomed.iter().map(|r| r.path.clone()).collect();
        if let Err(e) = validate_preserves_copy(&doomed_paths, &group.paths()) {
            self.reject(&mut outcome, FailureKind::InvalidDecision, e.to_string());
            return outcome;
        }

        let kept_present = group
            .members
            .iter()
            .filter(|m| kept.contains(&m.path))
            .any(still_present);
        if !kept_present {
            self.reject(
                &mut outcome,
                FailureKind::KeptCopyMissing,
                "no kept copy still exists with its recorded size".to_string(),
            );
            return outcome;
        }

        self.summary.groups_resolved += 1;
        if let ResolutionDecision::KeepOne(path) = decision {
            self.remember(group, path);
        }

        for record in doomed {
            match self.remover.remove(record) {
                Ok(bytes) => {
                    outcome.bytes_reclaimed = outcome.bytes_reclaimed.saturating_add(bytes);
                    outcome.deleted.push(record.path.clone());
                    self.purge(record, &mut outcome);
                }
                Err(DeleteError::NotFound(_)) => {
                    log::debug!("Already gone: {}", record.path.display());
                    outcome.already_missing.push(record.path.clone());
                    self.purge(record, &mut outcome);
                }
                Err(e) => {
                    log::warn!("Could not delete {}: {}", record.path.display(), e);
                    outcome.failures.push(DedupFailure::from_delete(&e));
                }
            }
        }
        outcome
    }

    // The file is gone either way; a record left behind is swept by the next scan.
    fn purge(&self, record: &FileRecord, outcome: &mut GroupOutcome) {
        if let Err(e) = self.store.delete_by_path(&record.path) {
            log::warn!("Could not purge record {}: {}", record.path.display(), e);
            outcome.failures.push(DedupFailure {
                kind: FailureKind::IndexUpdate,
                path: Some(record.path.clone()),
                message: format!("file removed but its record could not be purged: {e}"),
            });
        }
    }

    fn reject(&mut self, outcome: &mut GroupOutcome, kind: FailureKind, message: String) {
        log::warn!("Group left untouched: {}", message);
        self.summary.groups_skipped += 1;
        outcome.failures.push(DedupFailure {
            kind,
            path: None,
            message,
        });
    }
}

fn still_present(record: &FileRecord) -> bool {
    fs::metadata(&record.path)
        .map(|m| m.is_file() && m.len() == record.size)
        .unwrap_or(false)
}
