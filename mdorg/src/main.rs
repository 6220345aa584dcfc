use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mdorg::buffer::{Document, LineSource, Patch};
use mdorg::clock::{self, ClockPolicy};
use mdorg::core::{EditError, Status, Token};
use mdorg::grammar;
use mdorg::mutator;
use mdorg::outline;
use mdorg::planning::{self, PlanningKind};
use mdorg::weekday::WeekdayStyle;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(
    name = "mdorg",
    about = "Task markup for Markdown notes: TODO/DONE, priorities, timestamps and CLOCK entries",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the task tokens recognized on each line.
    Inspect(InspectArgs),

    /// Increment or decrement the field under a cursor position.
    Adjust(AdjustArgs),

    /// Start a CLOCK entry under the heading.
    ClockIn(ClockArgs),

    /// Close the open CLOCK entry under the heading.
    ClockOut(ClockArgs),

    /// Set (or clear, if already set) TODO/DONE on the heading.
    Status(StatusArgs),

    /// Add `[#A]` to the heading, or remove its priority.
    Priority(TargetArgs),

    /// Add or remove the heading's CREATED line.
    Created(StampArgs),

    /// Add, remove or convert to a SCHEDULED line.
    Scheduled(StampArgs),

    /// Add, remove or convert to a DEADLINE line.
    Deadline(StampArgs),
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// Markdown file to inspect.
    file: PathBuf,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Markdown file to edit.
    file: PathBuf,
    /// 1-based line; heading commands act on the nearest heading at or above it.
    #[arg(long)]
    line: usize,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct AdjustArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// 1-based character column of the cursor.
    #[arg(long)]
    col: usize,
    /// Signed step to apply.
    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    delta: i64,
}

#[derive(Debug, Args)]
struct StampArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Instant to stamp instead of the local clock (YYYY-MM-DDTHH:MM:SS).
    #[arg(long)]
    at: Option<NaiveDateTime>,
    /// Weekday label style when the heading has none to copy.
    #[arg(long, value_enum, default_value_t = StyleArg::LatinShort)]
    weekday_style: StyleArg,
}

#[derive(Debug, Args)]
struct ClockArgs {
    #[command(flatten)]
    stamp: StampArgs,
    /// Snap clock-in down and clock-out up to this many minutes (0 disables).
    #[arg(long, env = "MDORG_CLOCK_ROUND_MINUTES")]
    round_minutes: Option<u32>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(value_enum)]
    status: StatusArg,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StatusArg {
    Todo,
    Done,
}

impl From<StatusArg> for Status {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Todo => Status::Todo,
            StatusArg::Done => Status::Done,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StyleArg {
    LatinShort,
    LatinFull,
    CyrillicShort,
    CyrillicFull,
}

impl From<StyleArg> for WeekdayStyle {
    fn from(arg: StyleArg) -> Self {
        match arg {
            StyleArg::LatinShort => WeekdayStyle::LatinShort,
            StyleArg::LatinFull => WeekdayStyle::LatinFull,
            StyleArg::CyrillicShort => WeekdayStyle::CyrillicShort,
            StyleArg::CyrillicFull => WeekdayStyle::CyrillicFull,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Inspect(args) => handle_inspect(args),
        command => handle_edit(command),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::default().add_directive(level.into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Serialize)]
struct InspectRow {
    line: usize,
    #[serde(flatten)]
    token: Token,
}

/// Line-level token for each line, or its embedded timestamps when the line is prose.
fn inspect_rows(doc: &Document) -> Vec<InspectRow> {
    let mut rows = Vec::new();
    for (index, text) in doc.lines().iter().enumerate() {
        let line = index + 1;
        match grammar::line_token(text) {
            Some(token) => rows.push(InspectRow { line, token }),
            None => rows.extend(
                grammar::inline_timestamps(text)
                    .into_iter()
                    .map(|ts| InspectRow {
                        line,
                        token: Token::Timestamp(ts),
                    }),
            ),
        }
    }
    rows
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let InspectArgs { file, json } = args;
    let text = fs::read_to_string(&file).with_context(|| format!("reading {:?}", file))?;
    let rows = inspect_rows(&Document::from_text(&text));

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in rows {
            println!("{}: {:?}", row.line, row.token);
        }
    }
    Ok(())
}

fn target_of(command: &Commands) -> Option<&TargetArgs> {
    match command {
        Commands::Inspect(_) => None,
        Commands::Adjust(args) => Some(&args.target),
        Commands::ClockIn(args) | Commands::ClockOut(args) => Some(&args.stamp.target),
        Commands::Status(args) => Some(&args.target),
        Commands::Priority(args) => Some(args),
        Commands::Created(args) | Commands::Scheduled(args) | Commands::Deadline(args) => {
            Some(&args.target)
        }
    }
}

fn handle_edit(command: Commands) -> Result<()> {
    let target = target_of(&command).context("command does not edit a file")?;
    let path = &target.file;
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let mut doc = Document::from_text(&text);

    let now = Local::now().naive_local();
    let Some(patch) = edit_document(&command, &doc, now)? else {
        return Ok(());
    };
    patch.apply(&mut doc);
    let edited = doc.to_text();

    if target.in_place {
        fs::write(path, edited.as_bytes()).with_context(|| format!("writing {:?}", path))?;
    } else {
        print!("{edited}");
        if !edited.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

/// Work out the patch for an edit command. Soft failures are logged and yield `None`.
fn edit_document(command: &Commands, doc: &Document, now: NaiveDateTime) -> Result<Option<Patch>> {
    let Some(target) = target_of(command) else {
        return Ok(None);
    };
    let line = line_index(doc, target.line)?;

    let result = match command {
        Commands::Inspect(_) => return Ok(None),
        Commands::Adjust(args) => {
            let text = doc.line(line).unwrap_or_default();
            let col = args.col.saturating_sub(1);
            mutator::adjust(text, col, args.delta).map(|edited| Patch::replace_line(doc, line, &edited))
        }
        Commands::ClockIn(args) => {
            let heading = heading_for(doc, line)?;
            let policy = clock_policy(args);
            clock::start_session(doc, heading, args.stamp.at.unwrap_or(now), &policy)
        }
        Commands::ClockOut(args) => {
            let heading = heading_for(doc, line)?;
            let policy = clock_policy(args);
            clock::finish_session(doc, heading, args.stamp.at.unwrap_or(now), &policy)
        }
        Commands::Status(args) => {
            let heading = heading_for(doc, line)?;
            let text = doc.line(heading).unwrap_or_default();
            planning::set_status(text, args.status.into())
                .map(|edited| Patch::replace_line(doc, heading, &edited))
                .ok_or(EditError::NoTokenAtCursor)
        }
        Commands::Priority(_) => {
            let heading = heading_for(doc, line)?;
            let text = doc.line(heading).unwrap_or_default();
            planning::toggle_priority(text)
                .map(|edited| Patch::replace_line(doc, heading, &edited))
                .ok_or(EditError::NoTokenAtCursor)
        }
        Commands::Created(args) => {
            let heading = heading_for(doc, line)?;
            planning::toggle_created(doc, heading, args.at.unwrap_or(now), args.weekday_style.into())
        }
        Commands::Scheduled(args) | Commands::Deadline(args) => {
            let heading = heading_for(doc, line)?;
            let kind = if matches!(command, Commands::Scheduled(_)) {
                PlanningKind::Scheduled
            } else {
                PlanningKind::Deadline
            };
            planning::toggle_planning(
                doc,
                heading,
                kind,
                args.at.unwrap_or(now),
                args.weekday_style.into(),
            )
        }
    };

    match result {
        Ok(patch) => Ok(Some(patch)),
        Err(err @ EditError::LineOutOfRange(_)) => Err(err.into()),
        Err(err) => {
            warn!("{err}; file left unchanged");
            Ok(None)
        }
    }
}

fn clock_policy(args: &ClockArgs) -> ClockPolicy {
    ClockPolicy {
        round_minutes: args.round_minutes,
        weekday_style: args.stamp.weekday_style.into(),
    }
}

fn line_index(doc: &Document, line: usize) -> Result<usize> {
    if line == 0 || line > doc.line_count() {
        anyhow::bail!(
            "line {} is outside the file (1..={})",
            line,
            doc.line_count()
        );
    }
    Ok(line - 1)
}

fn heading_for(doc: &Document, line: usize) -> Result<usize> {
    outline::nearest_heading(doc, line)
        .with_context(|| format!("no heading at or above line {}", line + 1))
}
