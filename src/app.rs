//! Binary glue: runs a parsed [`Cli`] and renders results.
//!
//! Results go to stdout (text, or JSON with `--json`); prompts, progress
//! and logs go to stderr.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytesize::ByteSize;
use serde::Serialize;
use yansi::Paint;

use crate::cli::{Cli, Commands, ExcludeArgs};
use crate::commands::{Dupler, GcSummary, IndexStatus, InitSummary};
use crate::config::{DeleteMode, MatchTarget};
use crate::dedup::DedupSummary;
use crate::error::ExitCode;
use crate::logging::init_logging;
use crate::progress::Progress;
use crate::prompt::TerminalPrompt;
use crate::scanner::ScanSummary;
use crate::signal::install_handler;

/// Run the command line, returning the process exit code.
///
/// # Errors
///
/// Any fatal error; the caller maps it to an exit code.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);
    if cli.no_color {
        yansi::disable();
    }

    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    let json = cli.json;

    match cli.command {
        Commands::Init(args) => {
            let dir = args.dir.unwrap_or(cwd);
            let summary = Dupler::init(&dir, args.force)?;
            emit(json, &summary, print_init)?;
            Ok(ExitCode::Success)
        }
        Commands::Scan(args) => {
            let handler = install_handler()?;
            let progress = Progress::new(cli.quiet || json || args.no_progress);
            let dupler = Dupler::open(&cwd)?
                .with_shutdown_flag(handler.get_flag())
                .with_progress(Arc::new(progress));
            let summary = dupler.scan(&args.roots)?;
            emit(json, &summary, print_scan)?;
            Ok(if summary.has_errors() {
                ExitCode::PartialSuccess
            } else {
                ExitCode::Success
            })
        }
        Commands::Dedup(args) => {
            let handler = install_handler()?;
            let opened = Dupler::open(&cwd)?;
            let mut settings = opened.settings().clone();
            if args.trash {
                settings.delete_mode = DeleteMode::Trash;
            }
            if args.no_verify {
                settings.verify_before_delete = false;
            }
            let dupler = Dupler::with_settings(opened.workspace().clone(), settings)
                .with_shutdown_flag(handler.get_flag());

            let prompt = TerminalPrompt::new(io::stdin().lock(), io::stderr())
                .with_shutdown_flag(handler.get_flag());
            let (summary, _) = dupler.dedup(prompt)?;
            emit(json, &summary, print_dedup)?;
            Ok(if summary.has_failures() {
                ExitCode::PartialSuccess
            } else {
                ExitCode::Success
            })
        }
        Commands::Find(args) => {
            let dupler = Dupler::open(&cwd)?;
            let mut engine = dupler.query()?;
            if args.full_path {
                engine = engine.with_target(MatchTarget::Path);
            }
            if args.case_sensitive {
                engine = engine.with_case_sensitive(true);
            }
            let matcher = engine.compile(&args.pattern)?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            if json {
                let paths: Vec<PathBuf> = engine.find(&matcher).collect::<Result<_, _>>()?;
                writeln!(out, "{}", serde_json::to_string_pretty(&paths)?)?;
            } else {
                for path in engine.find(&matcher) {
                    writeln!(out, "{}", path?.display())?;
                }
            }
            Ok(ExitCode::Success)
        }
        Commands::Exclude(args) => {
            let mut dupler = Dupler::open(&cwd)?;
            run_exclude(&mut dupler, &args, json)?;
            Ok(ExitCode::Success)
        }
        Commands::Gc => {
            let summary = Dupler::open(&cwd)?.gc()?;
            emit(json, &summary, print_gc)?;
            Ok(ExitCode::Success)
        }
        Commands::Unlock => {
            let removed = Dupler::unlock(&cwd)?;
            emit(json, &removed, |out, removed| {
                if *removed {
                    writeln!(out, "Removed index lock")
                } else {
                    writeln!(out, "Index was not locked")
                }
            })?;
            Ok(ExitCode::Success)
        }
        Commands::Status => {
            let status = Dupler::open(&cwd)?.status()?;
            emit(json, &status, print_status)?;
            Ok(ExitCode::Success)
        }
    }
}

fn run_exclude(dupler: &mut Dupler, args: &ExcludeArgs, json: bool) -> anyhow::Result<()> {
    let kind = if args.dir { "directory" } else { "file" };

    if args.patterns.is_empty() {
        let list = dupler.exclude_list();
        return emit(json, &list, |out, list| {
            writeln!(out, "Files      : {:?}", list.files)?;
            writeln!(out, "Directories: {:?}", list.directories)
        });
    }

    if args.test {
        let checks = dupler.exclude_test(&args.patterns, args.dir);
        return emit(json, &checks, |out, checks| {
            for check in checks {
                let verdict = if check.valid {
                    "Valid".green()
                } else {
                    "Invalid".red()
                };
                writeln!(out, "{} {}", verdict, check.name)?;
            }
            Ok(())
        });
    }

    let (verb, changed) = if args.remove {
        ("Removed", dupler.exclude_remove(&args.patterns, args.dir)?)
    } else {
        ("Added", dupler.exclude_add(&args.patterns, args.dir)?)
    };
    emit(json, &changed, |out, changed| {
        if changed.is_empty() {
            writeln!(out, "No {kind} patterns changed")
        } else {
            writeln!(out, "{verb} {kind} pattern(s): {}", changed.join(", "))
        }
    })
}

fn emit<T: Serialize>(
    json: bool,
    value: &T,
    text: impl FnOnce(&mut dyn Write, &T) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    } else {
        text(&mut out, value)?;
    }
    Ok(())
}

fn print_init(out: &mut dyn Write, s: &InitSummary) -> io::Result<()> {
    let action = if s.replaced { "Reinitialized" } else { "Initialized" };
    writeln!(out, "{} dupler index in {}", action, s.base_dir.display())
}

fn print_scan(out: &mut dyn Write, s: &ScanSummary) -> io::Result<()> {
    writeln!(out, "{} (generation {})", "Scan complete".bold(), s.generation)?;
    writeln!(out, "  scanned   {}", s.scanned)?;
    writeln!(out, "  added     {}", s.added)?;
    writeln!(out, "  updated   {}", s.updated)?;
    writeln!(out, "  unchanged {}", s.unchanged)?;
    writeln!(out, "  removed   {}", s.removed)?;
    writeln!(out, "  hashed    {}", s.hashed)?;
    if s.has_errors() {
        writeln!(out, "  {}    {}", "errors".red(), s.errors)?;
    }
    Ok(())
}

fn print_dedup(out: &mut dyn Write, s: &DedupSummary) -> io::Result<()> {
    let title = if s.aborted { "Dedup aborted" } else { "Dedup complete" };
    writeln!(out, "{}", title.bold())?;
    writeln!(out, "  groups presented {}", s.groups_presented)?;
    writeln!(out, "  files deleted    {}", s.files_deleted)?;
    writeln!(out, "  bytes reclaimed  {}", ByteSize::b(s.bytes_reclaimed))?;
    if s.already_missing > 0 {
        writeln!(out, "  already missing  {}", s.already_missing)?;
    }
    for failure in &s.failures {
        match &failure.path {
            Some(path) => writeln!(out, "  {} {}: {}", "failed".red(), path.display(), failure.message)?,
            None => writeln!(out, "  {} {}", "failed".red(), failure.message)?,
        }
    }
    Ok(())
}

fn print_gc(out: &mut dyn Write, s: &GcSummary) -> io::Result<()> {
    writeln!(out, "Checked {} record(s), purged {}", s.checked, s.purged)
}

fn print_status(out: &mut dyn Write, s: &IndexStatus) -> io::Result<()> {
    writeln!(out, "{} {}", "Index".bold(), s.base_dir.display())?;
    writeln!(out, "  generation   {}", s.generation)?;
    for root in &s.roots {
        writeln!(out, "  root         {}", root.display())?;
    }
    writeln!(
        out,
        "  files        {} ({})",
        s.counts.records,
        ByteSize::b(s.counts.total_bytes)
    )?;
    writeln!(out, "  fingerprinted {}", s.counts.fingerprinted)?;
    writeln!(
        out,
        "  duplicates   {} group(s), {} file(s), {} reclaimable",
        s.duplicates.groups,
        s.duplicates.duplicate_files,
        ByteSize::b(s.duplicates.reclaimable_bytes).green()
    )
}
