//! Line-oriented terminal decision provider.
//!
//! Each group is printed as a numbered list; one line of input answers it:
//!
//! | Input      | Decision |
//! |------------|----------|
//! | `2`        | keep member 2 |
//! | `1,3` `1 3`| keep members 1 and 3 |
//! | `k`        | keep the suggested member (marked `*`) |
//! | empty, `s` | skip |
//! | `q`        | abort |
//!
//! Nothing is deleted without an explicit answer.
//!
//! End of input aborts the session, and so does an answer typed after
//! Ctrl+C when a shutdown flag is attached.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytesize::ByteSize;
use yansi::Paint;

use crate::dedup::{DecisionProvider, GroupOutcome, Presentation, ResolutionDecision};
use crate::duplicates::DuplicateGroup;

/// Reads decisions from `input`, writes prompts to `output`.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    /// Prompt over the given streams.
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            shutdown_flag: None,
        }
    }

    /// Abort instead of applying an answer read after shutdown was requested.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Consume the prompt, returning the output stream.
    pub fn into_output(self) -> W {
        self.output
    }

    fn render(&mut self, p: &Presentation<'_>) -> std::io::Result<()> {
        let group = p.group;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "{}  {} copies of {}, {} reclaimable  [{}]",
            format!("Group {}/{}", p.index + 1, p.total).bold(),
            group.len(),
            ByteSize::b(group.size),
            ByteSize::b(group.reclaimable_bytes()).green(),
            group.fingerprint.short().dim()
        )?;
        for (i, member) in group.members.iter().enumerate() {
            let suggested = p.suggestion.as_deref() == Some(member.path.as_path());
            let marker = if suggested { "*" } else { " " };
            writeln!(
                self.output,
                "  [{}] {} {}",
                i + 1,
                marker.yellow(),
                member.path.display()
            )?;
        }
        if p.remembered {
            writeln!(self.output, "  {}", "* same choice as an earlier group in these directories".dim())?;
        }
        write!(
            self.output,
            "Keep [1-{}, list, k = suggested, Enter/s = skip, q = quit]: ",
            group.len()
        )?;
        self.output.flush()
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(e) => {
                log::error!("Failed to read decision: {}", e);
                None
            }
        }
    }
}

/// Parse one answer for `group`. `None` means the answer is not understood.
#[must_use]
pub fn parse_answer(
    answer: &str,
    group: &DuplicateGroup,
    suggestion: Option<&PathBuf>,
) -> Option<ResolutionDecision> {
    let answer = answer.trim();
    match answer.to_ascii_lowercase().as_str() {
        "" | "s" | "skip" => return Some(ResolutionDecision::Skip),
        "k" | "keep" => return suggestion.cloned().map(ResolutionDecision::KeepOne),
        "q" | "quit" | "abort" => return Some(ResolutionDecision::Abort),
        _ => {}
    }

    let mut kept = Vec::new();
    for token in answer.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        let n: usize = token.parse().ok()?;
        let member = group.members.get(n.checked_sub(1)?)?;
        if !kept.contains(&member.path) {
            kept.push(member.path.clone());
        }
    }

    match kept.len() {
        0 => None,
        1 => kept.pop().map(ResolutionDecision::KeepOne),
        _ => Some(ResolutionDecision::KeepMany(kept)),
    }
}

impl<R: BufRead, W: Write> DecisionProvider for TerminalPrompt<R, W> {
    fn decide(&mut self, presentation: &Presentation<'_>) -> ResolutionDecision {
        loop {
            if let Err(e) = self.render(presentation) {
                log::error!("Failed to write prompt: {}", e);
                return ResolutionDecision::Abort;
            }
            let Some(line) = self.read_line() else {
                return ResolutionDecision::Abort;
            };
            if self
                .shutdown_flag
                .as_ref()
                .is_some_and(|f| f.load(Ordering::SeqCst))
            {
                return ResolutionDecision::Abort;
            }
            match parse_answer(&line, presentation.group, presentation.suggestion.as_ref()) {
                Some(decision) => return decision,
                None => {
                    let _ = writeln!(self.output, "{}", "Not understood, try again.".red());
                }
            }
        }
    }

    fn applied(&mut self, _group: &DuplicateGroup, outcome: &GroupOutcome) {
        let _ = writeln!(
            self.output,
            "Deleted {} file(s), freed {}",
            outcome.deleted.len(),
            ByteSize::b(outcome.bytes_reclaimed)
        );
        for failure in &outcome.failures {
            let _ = writeln!(self.output, "  {} {}", "failed:".red(), failure.message);
        }
    }
}
