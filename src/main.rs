use anyhow::{bail, Context};
use clap::Parser;
use rusqlite::Connection;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forum_repair::checkpoint::{validate_resume, Checkpoint, FileStateStore, StateStore};
use forum_repair::cli::{Args, Command, RunArgs};
use forum_repair::report::{create_report_metadata, RepairReport, ReportWriter};
use forum_repair::scanner::percent_complete;
use forum_repair::{
    schema, Catalog, Completion, Localizer, MessageCatalog, Progress, RepairConfig, RunState,
    ScanDriver, ScanMode, StepOutcome, WordTokenizer,
};

const DETECT_KEY: &str = "detect";
const FIX_KEY: &str = "fix";
/// Result of the last finished detect run, awaiting operator approval
const DETECTED_KEY: &str = "detected";

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

/// Shared handles for one command
struct Session {
    conn: Connection,
    catalog: Catalog,
    config: RepairConfig,
    messages: MessageCatalog,
    tokenizer: WordTokenizer,
    store: FileStateStore,
}

impl Session {
    fn open(args: &Args, database: &Path) -> anyhow::Result<Self> {
        let config = args.repair_config().context("loading configuration")?;
        let mut messages = MessageCatalog::english();
        if let Some(path) = &args.messages {
            messages = messages
                .with_overrides_file(path)
                .with_context(|| format!("loading messages from {}", path.display()))?;
        }

        if !database.exists() {
            bail!("database {} does not exist", database.display());
        }
        let conn = Connection::open(database)
            .with_context(|| format!("opening {}", database.display()))?;
        let missing = schema::missing_tables(&conn)?;
        if !missing.is_empty() {
            bail!("not a forum database, missing tables: {}", missing.join(", "));
        }

        let store = FileStateStore::open(args.state_dir(), config.backup_checkpoints)
            .context("opening state directory")?;
        Ok(Self {
            conn,
            catalog: Catalog::standard()?,
            config,
            messages,
            tokenizer: WordTokenizer::default(),
            store,
        })
    }

    /// Drive invocations until done, or for one invocation with `--single-step`
    fn drive(
        &mut self,
        mode: ScanMode,
        run_key: &str,
        initial: RunState,
        single_step: bool,
    ) -> anyhow::Result<Option<(Completion, u32)>> {
        let driver = ScanDriver::new(
            &self.conn,
            &self.catalog,
            &self.config,
            &self.messages,
            &self.tokenizer,
        );
        loop {
            // earlier CLI calls of a --single-step run are counted in the checkpoint
            let before = self
                .store
                .load(run_key)?
                .map_or(initial.invocations, |checkpoint| checkpoint.state.invocations);
            match driver.resume_or_start(mode, initial.clone(), &mut self.store, run_key)? {
                StepOutcome::Done(completion) => return Ok(Some((completion, before + 1))),
                StepOutcome::Paused(progress) => {
                    print_progress(&progress);
                    if single_step {
                        println!("Paused; run the same command again to continue.");
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn write_report(&self, run: &RunArgs, completion: &Completion, invocations: u32) -> anyhow::Result<()> {
        let metadata = create_report_metadata(&run.database, self.catalog.fingerprint(), invocations);
        let report = RepairReport::from_completion(metadata, completion)?;
        let path = ReportWriter::new(&run.output)?.write(&report)?;
        println!("Report: {}", path.display());
        Ok(())
    }
}

fn print_progress(progress: &Progress) {
    println!(
        "  {:>5.1}%  {}  (paused: {}, {} diagnostics so far)",
        progress.percent_complete,
        progress.current_rule,
        progress.reason,
        progress.diagnostics.len()
    );
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("Invalid arguments: {}", e);
        std::process::exit(1);
    }
    init_tracing(args.log_json);

    match &args.command {
        Command::Detect(run) => detect(&args, run),
        Command::Fix { run, yes } => fix(&args, run, *yes),
        Command::Status { database } => status(&args, database),
        Command::Reset { database } => reset(&args, database),
    }
}

fn detect(args: &Args, run: &RunArgs) -> anyhow::Result<()> {
    let mut session = Session::open(args, &run.database)?;
    let Some((completion, invocations)) =
        session.drive(ScanMode::Detect, DETECT_KEY, RunState::new(), run.single_step)?
    else {
        return Ok(());
    };
    let Completion::Detect { to_fix, diagnostics } = &completion else {
        bail!("detect run finished in fix mode");
    };

    println!();
    for message in diagnostics {
        println!("  - {message}");
    }
    println!();
    if to_fix.is_empty() {
        println!("No problems found.");
        session.store.clear(DETECTED_KEY)?;
    } else {
        println!("Rules to fix ({}):", to_fix.len());
        for id in to_fix {
            println!("  {:<32} {}", id, session.messages.rule_label(id));
        }
        let detected = RunState {
            rule_cursor: session.catalog.len(),
            to_fix: to_fix.clone(),
            diagnostics: diagnostics.clone(),
            ..RunState::default()
        };
        let checkpoint = Checkpoint::new(
            DETECTED_KEY,
            ScanMode::Detect,
            session.catalog.fingerprint(),
            detected,
        );
        session.store.save(&checkpoint)?;
        println!();
        println!("Run `forum-repair fix {}` to apply fixes.", run.database.display());
    }

    session.write_report(run, &completion, invocations)
}

fn fix(args: &Args, run: &RunArgs, yes: bool) -> anyhow::Result<()> {
    let mut session = Session::open(args, &run.database)?;

    let initial = if session.store.load(FIX_KEY)?.is_some() {
        println!("Resuming interrupted fix run.");
        RunState::new()
    } else {
        let Some(detected) = session.store.load(DETECTED_KEY)? else {
            bail!("no detect result recorded; run `forum-repair detect` first");
        };
        validate_resume(&detected, &session.catalog, ScanMode::Detect)
            .into_result()
            .context("recorded detect result is stale; run detect again")?;
        let to_fix = detected.state.to_fix;
        if to_fix.is_empty() {
            println!("Nothing to fix.");
            return Ok(());
        }

        println!("The following rules will be fixed:");
        for id in &to_fix {
            println!("  {:<32} {}", id, session.messages.rule_label(id));
        }
        if !yes && !confirm("Proceed? [y/N] ")? {
            println!("Aborted.");
            return Ok(());
        }
        RunState::for_fix(to_fix)
    };

    let Some((completion, invocations)) =
        session.drive(ScanMode::Fix, FIX_KEY, initial, run.single_step)?
    else {
        return Ok(());
    };
    session.store.clear(DETECTED_KEY)?;

    if let Completion::Fix { fixed, unresolved } = &completion {
        println!("Fixed {} rules.", fixed.len());
        if !unresolved.is_empty() {
            println!(
                "Still pending after {} passes: {}",
                session.config.max_fix_passes,
                unresolved.join(", ")
            );
            println!("Run detect again to verify.");
        }
    }
    session.write_report(run, &completion, invocations)
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn status(args: &Args, database: &Path) -> anyhow::Result<()> {
    let store = FileStateStore::open(args.state_dir(), false)?;
    let catalog = Catalog::standard()?;
    let keys = store.keys()?;
    if keys.is_empty() {
        println!("No pending runs for {}.", database.display());
        return Ok(());
    }

    for key in keys {
        let Some(checkpoint) = store.load(&key)? else {
            continue;
        };
        let state = &checkpoint.state;
        let stale = !validate_resume(&checkpoint, &catalog, checkpoint.mode).is_valid;
        println!(
            "{key}: {} run, saved {}{}",
            checkpoint.mode,
            checkpoint.created_at.format("%Y-%m-%d %H:%M:%S"),
            if stale { " (stale)" } else { "" }
        );
        if key != DETECTED_KEY {
            println!(
                "  {:.1}% complete, pass {}, rule {}/{}",
                percent_complete(state.rule_cursor, 0, None, catalog.len()),
                state.pass + 1,
                state.rule_cursor,
                catalog.len()
            );
        }
        if !state.to_fix.is_empty() {
            println!("  to fix: {}", state.to_fix.join(", "));
        }
    }
    Ok(())
}

fn reset(args: &Args, database: &Path) -> anyhow::Result<()> {
    let mut store = FileStateStore::open(args.state_dir(), false)?;
    let keys = store.keys()?;
    for key in &keys {
        store.clear(key)?;
    }
    println!("Discarded {} saved runs for {}.", keys.len(), database.display());
    Ok(())
}
