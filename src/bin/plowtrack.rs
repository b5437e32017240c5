//! plowtrack CLI: operator interface to the clearance tracker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use plowtrack::config::Config;
use plowtrack::db::Db;
use plowtrack::engine::{BatchTransition, Engine, StatusView};
use plowtrack::model::{Actor, ClockTime, Roster, StreetId, TimeWindow, UserId};
use plowtrack::realtime::Reconciler;
use plowtrack::store::ClearanceStore;
use plowtrack::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "plowtrack", about = "Street clearance tracking for winter road service")]
struct Cli {
    /// Acting user id (falls back to PLOWTRACK_ACTOR)
    #[arg(long, global = true)]
    actor: Option<Uuid>,
    /// Acting role: admin, worker, or readonly
    #[arg(long, global = true, default_value = "worker")]
    role: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Street status operations
    Status {
        #[command(subcommand)]
        action: StatusAction,
    },
    /// Apply one transition across several streets
    Batch {
        #[command(subcommand)]
        action: BatchAction,
    },
    /// Watch one street's status live
    Watch {
        /// Street ID
        street: Uuid,
        /// Service date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Full refresh interval in seconds
        #[arg(long, default_value_t = 60)]
        refresh_secs: u64,
    },
    /// Work-log operations
    Worklog {
        #[command(subcommand)]
        action: WorklogAction,
    },
    /// Administrative operations
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum StatusAction {
    /// Show current status and completed rounds
    Show {
        street: Uuid,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Mark a crew en route
    Start {
        street: Uuid,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Complete the current round
    Complete {
        street: Uuid,
        /// Minutes of work to record
        #[arg(long)]
        minutes: u32,
        /// Explicit start time (HH:MM), taken verbatim
        #[arg(long)]
        at: Option<ClockTime>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Reset the current round back to open
    Reset {
        street: Uuid,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Replace the assigned crew
    Roster {
        street: Uuid,
        /// Crew member ids
        #[arg(required = true)]
        users: Vec<Uuid>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Roll a done street over to the next round
    NewRound {
        street: Uuid,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum BatchAction {
    /// Mark every street en route
    Start {
        #[arg(required = true)]
        streets: Vec<Uuid>,
        /// Shared crew for the whole selection
        #[arg(long, value_delimiter = ',')]
        crew: Vec<Uuid>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Complete every street over back-to-back windows
    Complete {
        #[arg(required = true)]
        streets: Vec<Uuid>,
        /// Minutes of work per street
        #[arg(long)]
        minutes: u32,
        /// Explicit start of the first window (HH:MM)
        #[arg(long)]
        at: Option<ClockTime>,
        #[arg(long, value_delimiter = ',')]
        crew: Vec<Uuid>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Reset every street back to open
    Reset {
        #[arg(required = true)]
        streets: Vec<Uuid>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum WorklogAction {
    /// List a user's entries for a day
    List {
        user: Uuid,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Record a manual entry
    Add {
        /// User to credit
        user: Uuid,
        /// Start time (HH:MM)
        #[arg(long)]
        from: ClockTime,
        /// End time (HH:MM)
        #[arg(long)]
        to: ClockTime,
        #[arg(long)]
        street: Option<Uuid>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Delete a street/day record and its round ledger
    Purge {
        street: Uuid,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Check database connectivity
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Watch {
            street,
            date,
            refresh_secs,
        } => {
            cmd_watch(
                &config,
                StreetId(street),
                date.unwrap_or_else(today),
                refresh_secs,
            )
            .await
        }
        command => {
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;
            let engine = Engine::new(Arc::new(db));

            match command {
                Command::Watch { .. } => unreachable!("handled above"),
                Command::Status { action } => {
                    cmd_status(&engine, &config, &cli.actor, &cli.role, action).await
                }
                Command::Batch { action } => {
                    cmd_batch(&engine, &config, &cli.actor, &cli.role, action).await
                }
                Command::Worklog { action } => {
                    cmd_worklog(&engine, &config, &cli.actor, &cli.role, action).await
                }
                Command::Admin { action } => {
                    cmd_admin(&engine, &config, &cli.actor, &cli.role, action).await
                }
            }
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn resolve_actor(cli_actor: &Option<Uuid>, role: &str, config: &Config) -> anyhow::Result<Actor> {
    let user = cli_actor
        .map(UserId)
        .or(config.default_actor)
        .ok_or_else(|| anyhow::anyhow!("no acting user: pass --actor or set PLOWTRACK_ACTOR"))?;
    Ok(Actor::new(user, role.parse()?))
}

async fn cmd_status(
    engine: &Engine<Db>,
    config: &Config,
    cli_actor: &Option<Uuid>,
    role: &str,
    action: StatusAction,
) -> anyhow::Result<()> {
    match action {
        StatusAction::Show { street, date } => {
            let view = engine
                .status(StreetId(street), date.unwrap_or_else(today))
                .await?;
            print_view(&view);
            Ok(())
        }
        StatusAction::Start { street, date } => {
            let actor = resolve_actor(cli_actor, role, config)?;
            let record = engine
                .start(StreetId(street), date.unwrap_or_else(today), actor)
                .await?;
            println!("{}: {}", record.key(), record.status);
            Ok(())
        }
        StatusAction::Complete {
            street,
            minutes,
            at,
            notes,
            date,
        } => {
            let actor = resolve_actor(cli_actor, role, config)?;
            let date = date.unwrap_or_else(today);
            let window = engine.resolve_window(actor.user, date, minutes, at).await?;
            let record = engine
                .complete(StreetId(street), date, actor, window, notes.as_deref())
                .await?;
            println!("{}: {} ({})", record.key(), record.status, window);
            Ok(())
        }
        StatusAction::Reset { street, date } => {
            let actor = resolve_actor(cli_actor, role, config)?;
            let record = engine
                .reset(StreetId(street), date.unwrap_or_else(today), actor)
                .await?;
            println!("{}: {} (round {})", record.key(), record.status, record.current_round);
            Ok(())
        }
        StatusAction::Roster { street, users, date } => {
            let actor = resolve_actor(cli_actor, role, config)?;
            let roster: Roster = users.into_iter().map(UserId).collect();
            let record = engine
                .set_roster(StreetId(street), date.unwrap_or_else(today), actor, roster)
                .await?;
            println!("{}: crew {}", record.key(), roster_display(&record.assigned_users));
            Ok(())
        }
        StatusAction::NewRound { street, date } => {
            let actor = resolve_actor(cli_actor, role, config)?;
            let record = engine
                .start_new_round(StreetId(street), date.unwrap_or_else(today), actor)
                .await?;
            println!("{}: round {} open", record.key(), record.current_round);
            Ok(())
        }
    }
}

async fn cmd_batch(
    engine: &Engine<Db>,
    config: &Config,
    cli_actor: &Option<Uuid>,
    role: &str,
    action: BatchAction,
) -> anyhow::Result<()> {
    let actor = resolve_actor(cli_actor, role, config)?;

    let (streets, date, roster, transition) = match action {
        BatchAction::Start { streets, crew, date } => (
            streets,
            date,
            crew,
            BatchTransition::Start,
        ),
        BatchAction::Complete {
            streets,
            minutes,
            at,
            crew,
            notes,
            date,
        } => (
            streets,
            date,
            crew,
            BatchTransition::Complete {
                duration_min: minutes,
                explicit_start: at,
                notes,
            },
        ),
        BatchAction::Reset { streets, date } => (streets, date, Vec::new(), BatchTransition::Reset),
    };

    let streets: Vec<StreetId> = streets.into_iter().map(StreetId).collect();
    let roster: Option<Roster> = if roster.is_empty() {
        None
    } else {
        Some(roster.into_iter().map(UserId).collect())
    };

    let report = engine
        .batch_apply(
            &streets,
            date.unwrap_or_else(today),
            actor,
            roster.as_ref(),
            transition,
        )
        .await?;

    println!("Applied to {} of {} street(s)", report.succeeded.len(), streets.len());
    for (street, e) in &report.failed {
        println!("  failed {street}: {e}");
    }
    report.into_result()?;
    Ok(())
}

async fn cmd_worklog(
    engine: &Engine<Db>,
    config: &Config,
    cli_actor: &Option<Uuid>,
    role: &str,
    action: WorklogAction,
) -> anyhow::Result<()> {
    match action {
        WorklogAction::List { user, date } => {
            let date = date.unwrap_or_else(today);
            let entries = engine
                .store()
                .list_work_logs_for_user(UserId(user), date)
                .await?;

            if entries.is_empty() {
                println!("No work logs found.");
                return Ok(());
            }

            println!("{:<8}  {:<5}  {:<5}  {:<8}  NOTES", "ID", "FROM", "TO", "STREET");
            println!("{}", "-".repeat(60));
            let mut total = 0u32;
            for entry in &entries {
                let street = entry
                    .street_id
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<8}  {:<5}  {:<5}  {:<8}  {}",
                    &entry.id.to_string()[..8],
                    entry.start_time.to_string(),
                    entry.end_time.to_string(),
                    street,
                    entry.notes.as_deref().unwrap_or("-")
                );
                total += entry.end_time.minutes_since(entry.start_time);
            }
            println!("\n{} entr(ies), {} min total", entries.len(), total);
            Ok(())
        }
        WorklogAction::Add {
            user,
            from,
            to,
            street,
            notes,
            date,
        } => {
            let actor = resolve_actor(cli_actor, role, config)?;
            let entry = engine
                .record_work(
                    actor,
                    UserId(user),
                    street.map(StreetId),
                    date.unwrap_or_else(today),
                    TimeWindow::new(from, to),
                    notes.as_deref(),
                )
                .await?;
            println!(
                "Recorded {} for {} ({}-{})",
                entry.id, entry.user_id, entry.start_time, entry.end_time
            );
            Ok(())
        }
    }
}

async fn cmd_admin(
    engine: &Engine<Db>,
    config: &Config,
    cli_actor: &Option<Uuid>,
    role: &str,
    action: AdminAction,
) -> anyhow::Result<()> {
    match action {
        AdminAction::Purge { street, date } => {
            let actor = resolve_actor(cli_actor, role, config)?;
            let date = date.unwrap_or_else(today);
            engine.purge(StreetId(street), date, actor).await?;
            println!("Purged {}@{date}", StreetId(street));
            Ok(())
        }
        AdminAction::Health => {
            engine.store().as_ref().health_check().await?;
            println!("Database: ok");
            Ok(())
        }
    }
}

async fn cmd_watch(
    config: &Config,
    street: StreetId,
    date: NaiveDate,
    refresh_secs: u64,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "plowtrack".to_string(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let mut reconciler = Reconciler::attach(Arc::new(db), street, date)
        .await?
        .with_refresh_interval(Duration::from_secs(refresh_secs));

    let stopper = reconciler.stopper();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stopper.stop();
    });

    let mut rx = reconciler.watch();
    let printer = tokio::spawn(async move {
        loop {
            {
                let view = rx.borrow_and_update().clone();
                println!();
                print_view(&view);
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    });

    reconciler.run().await;
    printer.abort();
    Ok(())
}

fn print_view(view: &StatusView) {
    let record = &view.record;
    println!("Street:    {}", record.street_id.0);
    println!("Date:      {}", record.date);
    println!("Status:    {}", record.status);
    println!("Round:     {}/{}", record.current_round, record.total_rounds);
    println!("Started:   {}", fmt_time(record.started_at));
    println!("Finished:  {}", fmt_time(record.finished_at));
    println!("Crew:      {}", roster_display(&record.assigned_users));
    if let Some(by) = record.changed_by {
        println!("Changed:   by {} at {}", by, record.updated_at.format("%Y-%m-%d %H:%M"));
    }

    if !view.completed_rounds.is_empty() {
        println!();
        println!("{:<6}  {:<9}  {:<17}  {:<17}  CREW", "ROUND", "STATUS", "STARTED", "FINISHED");
        println!("{}", "-".repeat(70));
        for round in &view.completed_rounds {
            println!(
                "{:<6}  {:<9}  {:<17}  {:<17}  {}",
                round.round_number,
                round.status.to_string(),
                fmt_time(round.started_at),
                fmt_time(round.finished_at),
                roster_display(&round.assigned_users)
            );
        }
    }
}

fn fmt_time(t: Option<chrono::NaiveDateTime>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn roster_display(roster: &Roster) -> String {
    if roster.is_empty() {
        return "-".to_string();
    }
    roster
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
