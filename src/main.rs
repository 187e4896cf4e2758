use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use stable_ledger::budget::{month_of, parse_month};
use stable_ledger::{
    describe_rule, expand_occurrences, get_all_operations, insert_operations,
    load_csv, open_database, parse_rrule, AppConfig, AutomationEngine, EnvelopeStatus, StableData, StableState,
};

const USAGE: &str = "\
Usage: stable-ledger <command>

Commands:
  import <csv> [account]         Import a bank CSV export
  balances                       Account balances
  envelopes [YYYY-MM]            Envelope consumption for a month
  rrule <start> <rule> [n]       Expand a recurrence rule
  recommendations                Current action cards";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let config = AppConfig::load()?;

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let csv = args.get(2).context("import needs a CSV path")?;
            let account = args.get(3).map(String::as_str).unwrap_or("default");
            run_import(&config, Path::new(csv), account)
        }
        Some("balances") => run_balances(&config),
        Some("envelopes") => run_envelopes(&config, args.get(2).map(String::as_str)),
        Some("rrule") => {
            let (start, rule) = match (args.get(2), args.get(3)) {
                (Some(start), Some(rule)) => (start, rule),
                _ => bail!("rrule needs <start> and <rule>\n\n{}", USAGE),
            };
            let count = match args.get(4) {
                Some(n) => n.parse().with_context(|| format!("Invalid occurrence count: {}", n))?,
                None => config.max_occurrences,
            };
            run_rrule(start, rule, count)
        }
        Some("recommendations") => run_recommendations(&config),
        _ => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

fn load_state(config: &AppConfig) -> Result<StableState> {
    let data = StableData::load(&config.data_path)?;
    let conn = open_database(&config.database_path)?;
    let operations = get_all_operations(&conn)?;
    Ok(StableState::new(data, operations))
}

fn run_import(config: &AppConfig, csv_path: &Path, account: &str) -> Result<()> {
    println!("🐎 Stable Ledger - CSV import");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load CSV
    println!("\n📂 Loading {:?}...", csv_path);
    let mut operations = load_csv(csv_path, account)?;
    println!("✓ Loaded {} operations from CSV", operations.len());

    // 2. Automation rules
    let data = StableData::load(&config.data_path)?;
    let engine = AutomationEngine::from_rules(data.rules);
    let classified = operations
        .iter_mut()
        .map(|op| engine.apply(op))
        .filter(|changed| *changed)
        .count();
    println!("✓ {} operations matched one of {} rules", classified, engine.rule_count());

    // 3. Store
    println!("\n💾 Inserting operations...");
    let conn = open_database(&config.database_path)?;
    let summary = insert_operations(&conn, &operations)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ New operations: {}", summary.inserted);
    println!("✓ Duplicates skipped: {}", summary.duplicates);

    Ok(())
}

fn run_balances(config: &AppConfig) -> Result<()> {
    let state = load_state(config)?;
    let balances = state.account_balances();

    if balances.is_empty() {
        println!("No accounts in {:?}", config.data_path);
        return Ok(());
    }

    println!("🏦 Balances");
    for balance in balances {
        println!("  {:<30} {:>12.2} {}", balance.name, balance.balance, balance.currency);
    }
    Ok(())
}

fn run_envelopes(config: &AppConfig, month: Option<&str>) -> Result<()> {
    let (year, month) = match month {
        Some(value) => parse_month(value)?,
        None => month_of(Local::now().date_naive()),
    };

    let state = load_state(config)?;
    let report = state.envelope_report(year, month)?;

    println!("✉️  Envelopes {}-{:02}", year, month);
    for entry in report {
        let marker = match entry.consumption.status() {
            EnvelopeStatus::Ok => "✓",
            EnvelopeStatus::Warning => "⚠️",
            EnvelopeStatus::Exceeded => "❌",
        };
        println!(
            "  {} {:<24} {:>9.2} / {:>9.2} {} ({:.0}%)",
            marker,
            entry.envelope.name,
            entry.consumption.consumed,
            entry.consumption.budget,
            config.currency,
            entry.consumption.percentage,
        );
    }
    Ok(())
}

/// `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM`
fn parse_start(value: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Ok(dt);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid start date: {}", value))?;
    date.and_hms_opt(0, 0, 0).context("Invalid start time")
}

fn run_rrule(start: &str, rule: &str, count: usize) -> Result<()> {
    let start = parse_start(start)?;
    let parsed = parse_rrule(rule)?;
    let occurrences = expand_occurrences(start, rule, count)?;

    println!("🔁 {}", describe_rule(&parsed));
    for dt in occurrences {
        println!("  {}", dt.format("%a %Y-%m-%d %H:%M"));
    }
    Ok(())
}

fn run_recommendations(config: &AppConfig) -> Result<()> {
    let state = load_state(config)?;
    let cards = state.recommendations(Local::now().date_naive(), None);

    if cards.is_empty() {
        println!("✅ Nothing to report");
        return Ok(());
    }

    println!("💡 {} recommendations", cards.len());
    for card in cards {
        println!("\n[{:?}] {}", card.priority, card.title);
        println!("  {}", card.message);
        if let Some(action) = card.suggested_action {
            println!("  → {}", action);
        }
    }
    Ok(())
}
