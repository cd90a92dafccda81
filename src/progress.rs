//! Progress reporting using indicatif.
//!
//! The scan pipeline reports through the [`ProgressCallback`] trait;
//! [`Progress`] renders one bar per [`Phase`] in the terminal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Stages of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Directory traversal and metadata comparison.
    Walk,
    /// Prefix digests for size collisions.
    Prehash,
    /// Full fingerprints for prehash collisions.
    FullHash,
}

impl Phase {
    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Walk => "Walking",
            Self::Prehash => "Prehashing",
            Self::FullHash => "Fingerprinting",
        }
    }
}

/// Receives progress updates from the scan pipeline.
pub trait ProgressCallback: Send + Sync {
    /// A phase started. `total` is 0 when unknown (walking).
    fn on_phase_start(&self, phase: Phase, total: usize);

    /// An item was processed (`current` is 1-based).
    fn on_progress(&self, phase: Phase, current: usize, path: &Path);

    /// An item of `bytes` bytes finished hashing.
    fn on_item_completed(&self, _bytes: u64) {}

    /// A phase finished.
    fn on_phase_end(&self, phase: Phase);

    /// Free-form status message.
    fn on_message(&self, _message: &str) {}
}

/// Terminal progress reporter.
pub struct Progress {
    multi: MultiProgress,
    bars: Mutex<HashMap<Phase, ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a reporter; with `quiet` nothing is drawn.
    ///
    /// ```
    /// use dupler::progress::Progress;
    ///
    /// let progress = Progress::new(true);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            quiet,
        }
    }

    fn bars(&self) -> MutexGuard<'_, HashMap<Phase, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn style(phase: Phase) -> ProgressStyle {
        match phase {
            Phase::Walk => {
                ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            }
            Phase::Prehash => ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-"),
            Phase::FullHash => ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-"),
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: Phase, total: usize) {
        if self.quiet {
            return;
        }

        let pb = match phase {
            Phase::Walk => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.enable_steady_tick(Duration::from_millis(100));
                pb
            }
            _ => self.multi.add(ProgressBar::new(total as u64)),
        };
        pb.set_style(Self::style(phase));
        pb.set_message(phase.label());
        self.bars().insert(phase, pb);
    }

    fn on_progress(&self, phase: Phase, current: usize, path: &Path) {
        if self.quiet {
            return;
        }

        if let Some(pb) = self.bars().get(&phase) {
            pb.set_position(current as u64);
            pb.set_message(truncate_path(&path.to_string_lossy(), 30));
        }
    }

    fn on_phase_end(&self, phase: Phase) {
        if self.quiet {
            return;
        }

        if let Some(pb) = self.bars().remove(&phase) {
            pb.finish_with_message(format!("{} complete", phase.label()));
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }

        if let Err(e) = self.multi.println(message) {
            log::debug!("Progress output failed: {}", e);
        }
    }
}

/// Shorten a path to its file name when it does not fit.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let tail: String = file_name
            .chars()
            .skip(name_len.saturating_sub(max_len.saturating_sub(3)))
            .collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_path_unchanged() {
        assert_eq!(truncate_path("/a/b.txt", 30), "/a/b.txt");
    }

    #[test]
    fn test_truncate_long_path_keeps_name() {
        let path = "/very/long/directory/structure/that/goes/on/photo.jpg";
        assert_eq!(truncate_path(path, 30), ".../photo.jpg");
    }

    #[test]
    fn test_truncate_long_name_is_char_safe() {
        let name = "é".repeat(40);
        let path = format!("/x/{name}");
        let truncated = truncate_path(&path, 30);
        assert!(truncated.starts_with("..."));
        assert_eq!(truncated.chars().count(), 30);
    }

    #[test]
    fn test_quiet_progress_is_silent() {
        let progress = Progress::new(true);
        progress.on_phase_start(Phase::Prehash, 10);
        progress.on_progress(Phase::Prehash, 1, Path::new("/a"));
        progress.on_phase_end(Phase::Prehash);
        assert!(progress.bars().is_empty());
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(Phase::Walk.label(), "Walking");
        assert_eq!(Phase::FullHash.label(), "Fingerprinting");
    }
}
