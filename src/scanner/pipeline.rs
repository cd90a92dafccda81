//! Incremental scan pipeline.
//!
//! # Phases
//!
//! 1. **Walk**: each walked file is compared with its stored record. A record
//!    whose size and mtime are unchanged keeps its digests; new or changed
//!    files get a fresh record. As soon as two walked files share a size,
//!    their prehashes are dispatched to the worker pool, so hashing overlaps
//!    the walk.
//! 2. **Prehash**: any remaining record whose size is shared across the index
//!    and lacks a prehash is prehashed.
//! 3. **Fingerprint**: records sharing (size, prehash) get a full fingerprint.
//! 4. **Complete**: one transaction carries forward records outside the
//!    scanned roots, sweeps the rest of the stale records, and bumps the
//!    completed generation.
//!
//! Hash results travel back over a channel to this thread, the only writer,
//! which commits upserts and digests in batches. On interruption the
//! uncommitted batch is dropped and no sweep happens.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use serde::Serialize;

use super::hasher::{Fingerprint, Hasher};
use super::walker::Walker;
use super::{path_utils, HashError, WalkerConfig};
use crate::config::Settings;
use crate::error::{DuplerError, Result};
use crate::index::{DigestKind, DigestUpdate, FileRecord, IndexStore};
use crate::progress::{Phase, ProgressCallback};

/// Counts reported by a completed scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Files walked
    pub scanned: u64,
    /// New records
    pub added: u64,
    /// Records refreshed because size or mtime changed
    pub updated: u64,
    /// Records confirmed unchanged
    pub unchanged: u64,
    /// Records purged (vanished files, swept or found missing while hashing)
    pub removed: u64,
    /// Digests computed (prehashes and fingerprints)
    pub hashed: u64,
    /// Per-entry errors (unreadable files and directories)
    pub errors: u64,
    /// Generation this scan completed
    pub generation: u64,
}

impl ScanSummary {
    /// Whether any per-entry error occurred.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

#[derive(Debug, Clone)]
struct HashJob {
    path: PathBuf,
    size: u64,
    mtime_ns: i64,
    kind: DigestKind,
}

impl HashJob {
    fn new(record: &FileRecord, kind: DigestKind) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            mtime_ns: record.mtime_ns,
            kind,
        }
    }

    fn run(&self, hasher: &Hasher) -> std::result::Result<Fingerprint, HashError> {
        match self.kind {
            DigestKind::Prehash => hasher.prehash(&self.path, self.size),
            DigestKind::Full => hasher.full_hash(&self.path),
        }
    }
}

type HashOutcome = (HashJob, std::result::Result<Fingerprint, HashError>);

/// First member of a size class seen during the walk.
enum SizeSlot {
    /// Only one file of this size so far; holds its prehash job if it needs one.
    Single(Option<HashJob>),
    /// Two or more files of this size were walked.
    Shared,
}

/// Batches mutations for the index.
struct Writer<'s> {
    store: &'s mut IndexStore,
    batch_size: usize,
    upserts: Vec<FileRecord>,
    digests: Vec<DigestUpdate>,
    removals: Vec<PathBuf>,
}

impl<'s> Writer<'s> {
    fn new(store: &'s mut IndexStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size,
            upserts: Vec::new(),
            digests: Vec::new(),
            removals: Vec::new(),
        }
    }

    fn pending(&self) -> usize {
        self.upserts.len() + self.digests.len() + self.removals.len()
    }

    fn maybe_flush(&mut self) -> Result<()> {
        if self.pending() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending() == 0 {
            return Ok(());
        }
        self.store
            .apply_batch(&self.upserts, &self.digests, &self.removals)?;
        self.upserts.clear();
        self.digests.clear();
        self.removals.clear();
        Ok(())
    }

    fn apply(&mut self, outcome: HashOutcome, summary: &mut ScanSummary) -> Result<()> {
        let (job, result) = outcome;
        match result {
            Ok(digest) => {
                summary.hashed += 1;
                self.digests.push(DigestUpdate {
                    path: job.path,
                    size: job.size,
                    mtime_ns: job.mtime_ns,
                    kind: job.kind,
                    digest,
                });
            }
            Err(HashError::Interrupted(_)) => {}
            Err(HashError::NotFound(path)) => {
                log::debug!("Vanished before hashing: {}", path.display());
                summary.removed += 1;
                self.removals.push(path);
            }
            Err(e) => {
                log::warn!("Cannot read {}: {}", e.path().display(), e);
                summary.errors += 1;
                self.removals.push(job.path);
            }
        }
        self.maybe_flush()
    }
}

/// Drives a scan into an [`IndexStore`].
pub struct Scanner {
    walker_config: WalkerConfig,
    hasher: Hasher,
    workers: usize,
    batch_size: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Scanner {
    /// Build a scanner from workspace settings.
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            walker_config: WalkerConfig::from_settings(settings),
            hasher: Hasher::new().with_prehash_size(settings.prehash_size),
            workers: settings.worker_count(),
            batch_size: settings.batch_size(),
            shutdown_flag: None,
            progress: None,
        }
    }

    /// Honor a shutdown flag in the walker, the hasher and between phases.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.hasher = self.hasher.with_shutdown_flag(Arc::clone(&flag));
        self.shutdown_flag = Some(flag);
        self
    }

    /// Report progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Scan `roots` into `store` under a freshly reserved generation.
    ///
    /// # Errors
    ///
    /// - [`DuplerError::InvalidRoot`] if a root is missing or not a directory
    ///   (checked before anything is written)
    /// - [`DuplerError::Interrupted`] if shutdown was requested; committed
    ///   batches are kept, nothing is swept
    /// - [`DuplerError::Database`] on index failures
    pub fn scan(&self, store: &mut IndexStore, roots: &[PathBuf]) -> Result<ScanSummary> {
        let roots = resolve_roots(roots)?;
        let generation = store.begin_generation()?;
        log::info!(
            "Scanning {} root(s) as generation {}",
            roots.len(),
            generation
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("dupler-hash-{i}"))
            .build()?;

        let mut summary = ScanSummary {
            generation,
            ..ScanSummary::default()
        };
        let mut writer = Writer::new(store, self.batch_size);
        let (tx, rx) = mpsc::channel::<HashOutcome>();

        pool.in_place_scope(|scope| -> Result<()> {
            let hasher = &self.hasher;
            let mut in_flight = 0usize;
            let dispatch = |job: HashJob, in_flight: &mut usize| {
                let tx: Sender<HashOutcome> = tx.clone();
                *in_flight += 1;
                scope.spawn(move |_| {
                    let result = job.run(hasher);
                    let _ = tx.send((job, result));
                });
            };

            // Phase 1: walk
            self.phase_start(Phase::Walk, 0);
            let walker = Walker::new(roots.clone(), self.walker_config.clone());
            let walker = match &self.shutdown_flag {
                Some(flag) => walker.with_shutdown_flag(Arc::clone(flag)),
                None => walker,
            };
            let mut slots: HashMap<u64, SizeSlot> = HashMap::new();

            for item in walker.walk() {
                let entry = match item {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("{}", e);
                        summary.errors += 1;
                        continue;
                    }
                };
                summary.scanned += 1;
                if let Some(progress) = &self.progress {
                    progress.on_progress(Phase::Walk, summary.scanned as usize, &entry.path);
                }

                if entry.path.to_str().is_none() {
                    log::warn!(
                        "Skipping path that is not valid UTF-8: {}",
                        entry.path.display()
                    );
                    summary.errors += 1;
                    continue;
                }

                let record = match writer.store.get(&entry.path)? {
                    Some(mut existing) if existing.is_unchanged(&entry) => {
                        log::trace!("Unchanged: {}", entry.path.display());
                        summary.unchanged += 1;
                        existing.generation = generation;
                        existing
                    }
                    Some(_) => {
                        log::debug!("Changed: {}", entry.path.display());
                        summary.updated += 1;
                        FileRecord::from_entry(&entry, generation)
                    }
                    None => {
                        log::debug!("New: {}", entry.path.display());
                        summary.added += 1;
                        FileRecord::from_entry(&entry, generation)
                    }
                };

                let job = (record.size > 0 && record.prehash.is_none())
                    .then(|| HashJob::new(&record, DigestKind::Prehash));
                let size = record.size;
                writer.upserts.push(record);

                if size > 0 {
                    match slots.entry(size) {
                        Entry::Vacant(slot) => {
                            slot.insert(SizeSlot::Single(job));
                        }
                        Entry::Occupied(mut slot) => {
                            if let SizeSlot::Single(Some(first)) =
                                std::mem::replace(slot.get_mut(), SizeSlot::Shared)
                            {
                                dispatch(first, &mut in_flight);
                            }
                            if let Some(job) = job {
                                dispatch(job, &mut in_flight);
                            }
                        }
                    }
                }

                writer.maybe_flush()?;
                for outcome in rx.try_iter() {
                    in_flight -= 1;
                    writer.apply(outcome, &mut summary)?;
                }
            }
            self.phase_end(Phase::Walk);

            drain(&rx, &mut in_flight, &mut writer, &mut summary, |_| {})?;
            if self.is_shutdown_requested() {
                return Err(DuplerError::Interrupted);
            }
            writer.flush()?;

            // Phases 2 and 3: remaining prehashes, then full fingerprints
            for (phase, kind) in [
                (Phase::Prehash, DigestKind::Prehash),
                (Phase::FullHash, DigestKind::Full),
            ] {
                let pending = match kind {
                    DigestKind::Prehash => writer.store.records_needing_prehash()?,
                    DigestKind::Full => writer.store.records_needing_fingerprint()?,
                };
                log::info!("{}: {} file(s)", phase.label(), pending.len());

                if !pending.is_empty() {
                    self.phase_start(phase, pending.len());
                    for record in &pending {
                        if self.is_shutdown_requested() {
                            break;
                        }
                        dispatch(HashJob::new(record, kind), &mut in_flight);
                    }

                    let mut done = 0usize;
                    drain(&rx, &mut in_flight, &mut writer, &mut summary, |job| {
                        done += 1;
                        if let Some(progress) = &self.progress {
                            progress.on_progress(phase, done, &job.path);
                            progress.on_item_completed(job.size);
                        }
                    })?;
                    self.phase_end(phase);
                }

                if self.is_shutdown_requested() {
                    return Err(DuplerError::Interrupted);
                }
                writer.flush()?;
            }
            Ok(())
        })?;

        let removed = writer
            .store
            .complete_generation(generation, Some(&roots))?;
        summary.removed += removed as u64;

        log::info!(
            "Scan complete: {} scanned, {} added, {} updated, {} removed, {} errors",
            summary.scanned,
            summary.added,
            summary.updated,
            summary.removed,
            summary.errors
        );
        Ok(summary)
    }

    fn phase_start(&self, phase: Phase, total: usize) {
        if let Some(progress) = &self.progress {
            progress.on_phase_start(phase, total);
        }
    }

    fn phase_end(&self, phase: Phase) {
        if let Some(progress) = &self.progress {
            progress.on_phase_end(phase);
        }
    }
}

/// Receive until every dispatched job has reported back.
fn drain(
    rx: &Receiver<HashOutcome>,
    in_flight: &mut usize,
    writer: &mut Writer<'_>,
    summary: &mut ScanSummary,
    mut on_done: impl FnMut(&HashJob),
) -> Result<()> {
    while *in_flight > 0 {
        let Ok(outcome) = rx.recv() else {
            break;
        };
        *in_flight -= 1;
        on_done(&outcome.0);
        writer.apply(outcome, summary)?;
    }
    Ok(())
}

/// Canonicalize roots and drop nested duplicates.
fn resolve_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut resolved = Vec::with_capacity(roots.len());
    for root in roots {
        let real = path_utils::normalize_absolute(root)
            .map_err(|_| DuplerError::InvalidRoot(root.clone()))?;
        if !real.is_dir() {
            return Err(DuplerError::InvalidRoot(root.clone()));
        }
        resolved.push(real);
    }
    Ok(path_utils::collapse_roots(resolved))
}
