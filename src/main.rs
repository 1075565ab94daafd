// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use course_ledger::{
    delete_record, extract_records, get_all_records, get_events_for_entity, get_staged_records,
    guardian_summaries, import_text, insert_record, process_raw, query_records, render_notice,
    run_with_deadline, setup_database, stage_raw_records, summary_for_guardian, update_record,
    verify_count, write_csv, LedgerConfig, NewRecord, NoticeLanguage, RecordFilter, RecordUpdate,
    ReconciliationEngine, Roster, SqliteStore, ENTITY_COURSE_RECORD,
};
use rusqlite::Connection;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Course fee ledger: turn calendar exports into billable lessons
#[derive(Parser, Debug)]
#[command(name = "course-ledger")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides the config file
    #[arg(long, global = true, env = "COURSE_LEDGER_DB")]
    db: Option<PathBuf>,

    /// Roster CSV, overrides the config file
    #[arg(long, global = true, env = "COURSE_LEDGER_ROSTER")]
    roster: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, process and upsert a schedule export ("-" reads stdin)
    Import { input: String },

    /// Store raw schedule blocks without processing them
    Stage { input: String },

    /// Process everything in the staging table and upsert it
    ProcessStaged,

    /// List stored course records
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Per-guardian totals
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Print the fee notice for one guardian
    Notice {
        #[arg(long)]
        guardian: String,

        /// en, zh-cn or zh-tw; defaults to the guardian's roster language
        #[arg(long)]
        lang: Option<NoticeLanguage>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Add a lesson by hand for a roster student (audited)
    Add {
        /// Roster name (comma-separated for a shared lesson)
        #[arg(long)]
        student: String,

        /// YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,

        /// HH:MM
        #[arg(long)]
        start: NaiveTime,

        /// HH:MM
        #[arg(long)]
        end: NaiveTime,

        /// Defaults to the span between start and end
        #[arg(long)]
        hours: Option<f64>,

        #[arg(long)]
        title: String,
    },

    /// Edit a stored record (audited); unset flags keep their value
    Edit {
        id: String,

        /// New roster name; fee, status, guardian and group follow it
        #[arg(long)]
        student: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        start: Option<NaiveTime>,

        #[arg(long)]
        end: Option<NaiveTime>,

        #[arg(long)]
        hours: Option<f64>,
    },

    /// Write all records to a CSV file
    Export { output: PathBuf },

    /// Delete a record by id (audited)
    Delete { id: String },

    /// Show the audit trail of a record
    History { id: String },

    /// Browse records in the terminal
    Ui,
}

#[derive(clap::Args, Debug, Default)]
struct FilterArgs {
    /// Substring of the student name
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    group: Option<i64>,

    /// First date (YYYY-MM-DD), inclusive
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last date (YYYY-MM-DD), inclusive
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl From<FilterArgs> for RecordFilter {
    fn from(args: FilterArgs) -> Self {
        RecordFilter {
            name: args.name,
            group_id: args.group,
            from: args.from,
            to: args.to,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "course_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = LedgerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(roster) = cli.roster {
        config.roster_path = roster;
    }

    match cli.command {
        Command::Import { input } => run_import(&config, &input),
        Command::Stage { input } => run_stage(&config, &input),
        Command::ProcessStaged => run_process_staged(&config),
        Command::List { filter } => run_list(&config, filter.into()),
        Command::Summary { filter } => run_summary(&config, filter.into()),
        Command::Notice { guardian, lang, filter } => {
            run_notice(&config, &guardian, lang, filter.into())
        }
        Command::Add { student, date, start, end, hours, title } => {
            let new = NewRecord {
                name: student,
                date,
                start_time: start,
                end_time: end,
                hours,
                title,
            };
            run_add(&config, &new)
        }
        Command::Edit { id, student, title, date, start, end, hours } => {
            let update = RecordUpdate {
                name: student,
                title,
                date,
                start_time: start,
                end_time: end,
                hours,
            };
            run_edit(&config, &id, &update)
        }
        Command::Export { output } => run_export(&config, &output),
        Command::Delete { id } => run_delete(&config, &id),
        Command::History { id } => run_history(&config, &id),
        Command::Ui => run_ui_mode(&config),
    }
}

fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("opening database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {}", input))
    }
}

fn load_roster(config: &LedgerConfig) -> Result<Roster> {
    let roster = Roster::from_csv_path(&config.roster_path)?;
    info!(students = roster.len(), path = %config.roster_path.display(), "roster loaded");
    Ok(roster)
}

fn run_import(config: &LedgerConfig, input: &str) -> Result<()> {
    println!("📥 Importing schedule export");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let text = read_input(input)?;
    let roster = load_roster(config)?;
    let engine = ReconciliationEngine::with_batch_size(config.batch_size);
    let db_path = config.database_path.clone();

    // Connection is opened on the worker so a stuck store cannot block the deadline
    let outcome = run_with_deadline(config.timeout(), move || {
        let conn = Connection::open(&db_path)?;
        setup_database(&conn)?;
        let store = SqliteStore::new(&conn).with_actor("cli");
        import_text(&text, &roster, &store, &engine)
    })?;

    println!("✓ {}", outcome.process.summary());
    println!("✓ {}", outcome.upsert.summary());

    let conn = open_database(&config.database_path)?;
    println!("✓ Database contains {} course records", verify_count(&conn)?);

    Ok(())
}

fn run_stage(config: &LedgerConfig, input: &str) -> Result<()> {
    let text = read_input(input)?;
    let raws = extract_records(&text);
    let conn = open_database(&config.database_path)?;

    let report = stage_raw_records(&conn, &raws, config.batch_size)?;
    println!(
        "✓ Staged {} blocks ({} new, {} refreshed)",
        report.total, report.inserted, report.updated
    );
    Ok(())
}

fn run_process_staged(config: &LedgerConfig) -> Result<()> {
    let roster = load_roster(config)?;
    let engine = ReconciliationEngine::with_batch_size(config.batch_size);
    let db_path = config.database_path.clone();

    let (process, upsert) = run_with_deadline(config.timeout(), move || {
        let conn = Connection::open(&db_path)?;
        setup_database(&conn)?;
        let raws = get_staged_records(&conn)?;
        let processed = process_raw(&raws, &roster);
        let store = SqliteStore::new(&conn).with_actor("cli");
        let upsert = engine.reconcile(&store, &processed.records)?;
        Ok((processed.report, upsert))
    })?;

    println!("✓ {}", process.summary());
    println!("✓ {}", upsert.summary());
    Ok(())
}

fn run_list(config: &LedgerConfig, filter: RecordFilter) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let records = query_records(&conn, &filter)?;

    for r in &records {
        println!(
            "{}  {:<10} {:<20} {:>5.2}h  {:>8.2}  {:<16} {}",
            r.date, r.status, r.name, r.hours, r.total_fee(), r.guardian, r.id
        );
    }
    println!("{} record(s)", records.len());
    Ok(())
}

fn run_summary(config: &LedgerConfig, filter: RecordFilter) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let records = get_all_records(&conn)?;

    for s in guardian_summaries(&records, &filter) {
        println!(
            "{:<20} {:<30} {:>3} lessons {:>6.1}h  {} {:>9.2}  ({} – {})",
            s.guardian,
            s.students.join(", "),
            s.records.len(),
            s.total_hours,
            config.payment.currency,
            s.total_fee,
            s.first_date,
            s.last_date
        );
    }
    Ok(())
}

fn run_notice(
    config: &LedgerConfig,
    guardian: &str,
    lang: Option<NoticeLanguage>,
    filter: RecordFilter,
) -> Result<()> {
    let lang = match lang {
        Some(lang) => lang,
        None => load_roster(config)?.guardian_language(guardian).into(),
    };

    let conn = open_database(&config.database_path)?;
    let records = get_all_records(&conn)?;

    let Some(summary) = summary_for_guardian(&records, guardian, &filter) else {
        bail!("no records for guardian {:?} in the selected range", guardian);
    };
    let Some(text) = render_notice(&summary, lang, &config.payment) else {
        bail!("nothing to bill for {:?}", guardian);
    };

    println!("{}", text);
    Ok(())
}

fn run_add(config: &LedgerConfig, new: &NewRecord) -> Result<()> {
    let roster = load_roster(config)?;
    let record = new.build(&roster)?;

    let conn = open_database(&config.database_path)?;
    insert_record(&conn, &record, "cli")?;

    println!(
        "✓ Added {} on {} ({:.2}h × {:.2}) id {}",
        record.name, record.date, record.hours, record.fee_per_hour, record.id
    );
    Ok(())
}

fn run_edit(config: &LedgerConfig, id: &str, update: &RecordUpdate) -> Result<()> {
    let roster = load_roster(config)?;
    let conn = open_database(&config.database_path)?;
    let record = update_record(&conn, id, update, &roster, "cli")?;

    println!(
        "✓ Updated {}: {} {} – {} ({:.2}h)",
        record.id,
        record.name,
        record.start.format("%Y-%m-%d %H:%M"),
        record.end.format("%H:%M"),
        record.hours
    );
    Ok(())
}

fn run_export(config: &LedgerConfig, output: &Path) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let records = get_all_records(&conn)?;

    let file = std::fs::File::create(output)
        .with_context(|| format!("creating {}", output.display()))?;
    write_csv(&records, file)?;

    println!("✓ Exported {} records to {}", records.len(), output.display());
    Ok(())
}

fn run_delete(config: &LedgerConfig, id: &str) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let removed = delete_record(&conn, id, "cli")?;
    println!("✓ Deleted {} on {} ({})", removed.name, removed.date, removed.title);
    Ok(())
}

fn run_history(config: &LedgerConfig, id: &str) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let events = get_events_for_entity(&conn, ENTITY_COURSE_RECORD, id)?;

    if events.is_empty() {
        println!("No history for {}", id);
    }
    for event in events {
        println!(
            "{}  {:<16} {:<10} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.actor,
            event.data
        );
    }
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &LedgerConfig) -> Result<()> {
    if !config.database_path.exists() {
        bail!(
            "database {} not found; run `course-ledger import <file>` first",
            config.database_path.display()
        );
    }

    let conn = open_database(&config.database_path)?;
    let records = get_all_records(&conn)?;
    let summaries = guardian_summaries(&records, &RecordFilter::default());

    let mut app = ui::App::new(records, summaries, config.payment.clone());
    ui::run_ui(&mut app)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &LedgerConfig) -> Result<()> {
    bail!("TUI mode not available; rebuild with `--features tui` or run ledger-server")
}
