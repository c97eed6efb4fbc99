use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use sha2::{Digest, Sha256};

use iriscope_contracts::history::{HistoryEntry, HistoryLog};
use iriscope_contracts::log::{LogFields, SessionLog};
use iriscope_contracts::report::AnalysisReport;
use iriscope_contracts::session::{SessionState, FREE_SCAN_LIMIT};
use iriscope_contracts::store::{JsonFileStore, StoreError};
use iriscope_engine::{
    analyze_image, capture_with_release, thumbnail_data_url, AnalysisBackend, CannedBackend,
    FileCapture, GeminiBackend, RetryPolicy,
};

#[derive(Debug, Parser)]
#[command(name = "iriscope", version, about = "Iris photo analysis pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze an iris photo and record the result in history.
    Analyze(AnalyzeArgs),
    /// Inspect or prune the saved scan history.
    History(HistoryArgs),
    /// Show session state: scans used, window, history size.
    Status(StatusArgs),
    /// Toggle the premium flag for this session store.
    Premium(PremiumArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Path to the photo to analyze.
    image: PathBuf,
    #[arg(long, default_value = ".iriscope")]
    data_dir: PathBuf,
    /// Analysis collaborator: "gemini" or "canned" (offline sample).
    #[arg(long, default_value = "gemini")]
    backend: String,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long, default_value = ".iriscope")]
    data_dir: PathBuf,
    #[command(subcommand)]
    action: HistoryAction,
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    List,
    Remove {
        /// Entry id as shown by `history list`.
        id: i64,
    },
    Clear,
}

#[derive(Debug, Parser)]
struct StatusArgs {
    #[arg(long, default_value = ".iriscope")]
    data_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct PremiumArgs {
    #[arg(long, default_value = ".iriscope")]
    data_dir: PathBuf,
    /// "on" or "off".
    #[arg(value_parser = ["on", "off"])]
    state: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("iriscope error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::History(args) => run_history(args),
        Command::Status(args) => run_status(args),
        Command::Premium(args) => run_premium(args),
    }
}

fn store_at(data_dir: &Path) -> JsonFileStore {
    JsonFileStore::new(data_dir.join("store.json"))
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let mut store = store_at(&args.data_dir);
    let log = SessionLog::new(args.data_dir.join("session.jsonl"));
    let mut session = SessionState::load(&mut store, Utc::now())
        .map_err(|err| anyhow::anyhow!("session state unavailable: {err}"))?;

    if !session.can_scan() {
        eprintln!(
            "You have used your {FREE_SCAN_LIMIT} free scans this week. \
             Run `iriscope premium on` for unlimited scans."
        );
        return Ok(2);
    }

    let mut source = FileCapture::new(&args.image);
    let raw = match capture_with_release(&mut source) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("{}", err.user_message());
            eprintln!("  detail: {err}");
            return Ok(1);
        }
    };

    let backend = make_backend(&args.backend, args.model.clone())?;
    let policy = RetryPolicy::from_env();
    let mut status = |line: &str| eprintln!("{line}");

    let outcome = match analyze_image(&raw, backend.as_ref(), &policy, &mut status, Some(&log)) {
        Ok(outcome) => outcome,
        Err(err) => {
            let mut fields = LogFields::new();
            fields.insert("error".to_string(), Value::from(err.to_string()));
            let _ = log.error("analysis failed", fields);
            eprintln!("{}", err.user_message());
            eprintln!("  detail: {err}");
            return Ok(1);
        }
    };

    record_history(&mut store, &log, &raw.bytes, &outcome);

    session
        .record_scan(&mut store)
        .map_err(|err| anyhow::anyhow!("scan counter write failed: {err}"))?;
    if let Some(left) = session.scans_left() {
        eprintln!("You have {left} free scan(s) left this week.");
    }

    println!("{}", render_report(&outcome.report));
    Ok(0)
}

/// Persists the scan. A quota failure is recovered here: the entry is rolled
/// back by the history log and the user sees one storage-full notice; the
/// analysis itself still counts as a success.
fn record_history(
    store: &mut JsonFileStore,
    log: &SessionLog,
    capture_bytes: &[u8],
    outcome: &iriscope_engine::AnalysisOutcome,
) {
    let thumbnail = match thumbnail_data_url(capture_bytes) {
        Ok(url) => url,
        Err(err) => {
            let mut fields = LogFields::new();
            fields.insert("error".to_string(), Value::from(err.to_string()));
            let _ = log.warn("thumbnail failed; history entry skipped", fields);
            return;
        }
    };
    let fingerprint = hex::encode(Sha256::digest(&outcome.image.bytes));
    let entry = HistoryEntry::new(Utc::now(), thumbnail, fingerprint, outcome.report.clone());

    let mut history = HistoryLog::load(store);
    match history.record(store, entry) {
        Ok(()) => {}
        Err(StoreError::QuotaExceeded) => {
            let mut fields = LogFields::new();
            fields.insert("history_len".to_string(), Value::from(history.len()));
            let _ = log.error("history write hit storage quota", fields);
            eprintln!(
                "Storage full: your analysis succeeded but could not be saved to history. \
                 Delete older scans with `iriscope history remove` to make space."
            );
        }
        Err(err) => {
            eprintln!("History could not be saved: {err}");
        }
    }
}

fn make_backend(name: &str, model: Option<String>) -> Result<Box<dyn AnalysisBackend>> {
    match name {
        "gemini" => Ok(match model {
            Some(model) => Box::new(GeminiBackend::with_model(model)),
            None => Box::new(GeminiBackend::new()),
        }),
        "canned" => Ok(Box::new(CannedBackend::sample())),
        other => bail!("unknown backend '{other}' (expected 'gemini' or 'canned')"),
    }
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let mut store = store_at(&args.data_dir);
    let mut history = HistoryLog::load(&mut store);
    match args.action {
        HistoryAction::List => {
            if history.is_empty() {
                println!("No scans recorded yet.");
                return Ok(0);
            }
            for entry in history.entries() {
                println!(
                    "{}  {}  {} ({}% rarity)",
                    entry.id,
                    entry.created_at,
                    entry.report.dominant_color.name,
                    entry.report.rarity_index.percentage,
                );
            }
            Ok(0)
        }
        HistoryAction::Remove { id } => {
            let removed = history
                .remove(&mut store, id)
                .map_err(|err| anyhow::anyhow!("history write failed: {err}"))?;
            if removed {
                println!("Removed entry {id}.");
                Ok(0)
            } else {
                eprintln!("No history entry with id {id}.");
                Ok(1)
            }
        }
        HistoryAction::Clear => {
            history
                .clear(&mut store)
                .map_err(|err| anyhow::anyhow!("history write failed: {err}"))?;
            println!("History cleared.");
            Ok(0)
        }
    }
}

fn run_status(args: StatusArgs) -> Result<i32> {
    let mut store = store_at(&args.data_dir);
    let session = SessionState::load(&mut store, Utc::now())
        .map_err(|err| anyhow::anyhow!("session state unavailable: {err}"))?;
    let history = HistoryLog::load(&mut store);

    println!(
        "premium: {}",
        if session.premium() { "yes" } else { "no" }
    );
    match session.scans_left() {
        Some(left) => println!(
            "scans: {} used, {} left in the window started {}",
            session.scans_used(),
            left,
            session.window_started_at().to_rfc3339(),
        ),
        None => println!("scans: unlimited"),
    }
    println!("history: {} entries", history.len());
    Ok(0)
}

fn run_premium(args: PremiumArgs) -> Result<i32> {
    let mut store = store_at(&args.data_dir);
    let mut session = SessionState::load(&mut store, Utc::now())
        .map_err(|err| anyhow::anyhow!("session state unavailable: {err}"))?;
    let enabled = args.state == "on";
    session
        .set_premium(&mut store, enabled)
        .map_err(|err| anyhow::anyhow!("premium flag write failed: {err}"))?;
    println!(
        "Premium {}.",
        if enabled { "enabled, enjoy unlimited scans" } else { "disabled" }
    );
    Ok(0)
}

fn render_report(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Dominant color: {} ({}, {}% confidence)",
        report.dominant_color.name, report.dominant_color.hex_code, report.dominant_color.confidence
    );
    let _ = writeln!(
        out,
        "Rarity: {}/100 ({})",
        report.rarity_index.percentage, report.rarity_index.title
    );
    let _ = writeln!(out, "  {}", report.rarity_index.description);
    let _ = writeln!(out);

    for (label, section) in [
        ("Ancestry", (&report.ancestry.title, &report.ancestry.description)),
        (
            "Health clues",
            (&report.health_clues.title, &report.health_clues.description),
        ),
        (
            "Biometric signature",
            (
                &report.biometric_signature.title,
                &report.biometric_signature.description,
            ),
        ),
        (
            "Personality vibe",
            (
                &report.personality_vibe.title,
                &report.personality_vibe.description,
            ),
        ),
        (
            "Pigment oddities",
            (
                &report.pigment_oddities.title,
                &report.pigment_oddities.description,
            ),
        ),
    ] {
        let _ = writeln!(out, "{label}: {}", section.0);
        let _ = writeln!(out, "  {}", section.1);
    }

    let metrics = &report.ancestry.metrics;
    let _ = writeln!(
        out,
        "Ancestry metrics: prevalence {}, hotspots {}, probability {}",
        metrics.global_prevalence,
        metrics.regional_hotspots.join(", "),
        metrics.genetic_probability,
    );

    let _ = writeln!(out, "\nHealth indicators:");
    for indicator in &report.health_indicators {
        let _ = writeln!(out, "  {} [{}]: {}", indicator.name, indicator.level, indicator.description);
    }

    let _ = writeln!(out, "Unique patterns:");
    for pattern in &report.unique_patterns {
        let _ = writeln!(out, "  {}: {}", pattern.name, pattern.description);
    }

    let _ = writeln!(out, "Color composition:");
    for component in &report.color_composition {
        let _ = writeln!(
            out,
            "  {} {} {}%",
            component.color_name, component.hex_code, component.percentage
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;

    use chrono::Utc;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use iriscope_contracts::history::HistoryLog;
    use iriscope_contracts::session::SessionState;

    use super::{make_backend, render_report, run_analyze, store_at, AnalyzeArgs};

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_pixel(width, height, Rgb([70, 110, 160]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode fixture");
        fs::write(path, cursor.into_inner()).expect("write fixture");
    }

    #[test]
    fn make_backend_rejects_unknown_names() {
        assert!(make_backend("canned", None).is_ok());
        assert!(make_backend("gemini", Some("gemini-2.5-flash".to_string())).is_ok());
        assert!(make_backend("psychic", None).is_err());
    }

    #[test]
    fn analyze_against_canned_backend_records_history_and_scan() {
        let temp = tempfile::tempdir().expect("tempdir");
        let image_path = temp.path().join("eye.png");
        write_png(&image_path, 800, 600);
        let data_dir = temp.path().join("data");

        let code = run_analyze(AnalyzeArgs {
            image: image_path,
            data_dir: data_dir.clone(),
            backend: "canned".to_string(),
            model: None,
        })
        .expect("analyze runs");
        assert_eq!(code, 0);

        let mut store = store_at(&data_dir);
        let history = HistoryLog::load(&mut store);
        assert_eq!(history.len(), 1);
        assert!(history.entries()[0]
            .thumbnail
            .starts_with("data:image/jpeg;base64,"));
        assert_eq!(history.entries()[0].fingerprint.len(), 64);

        let session = SessionState::load(&mut store, Utc::now()).expect("session");
        assert_eq!(session.scans_used(), 1);
    }

    #[test]
    fn missing_image_is_a_user_error_not_a_crash() {
        let temp = tempfile::tempdir().expect("tempdir");
        let code = run_analyze(AnalyzeArgs {
            image: temp.path().join("absent.png"),
            data_dir: temp.path().join("data"),
            backend: "canned".to_string(),
            model: None,
        })
        .expect("analyze returns a code");
        assert_eq!(code, 1);
    }

    #[test]
    fn rendered_report_covers_every_section() {
        let parsed: serde_json::Value =
            serde_json::from_str(include_str!("../../iriscope-engine/resources/sample_report.json"))
                .expect("sample json");
        let report = iriscope_engine::validate_report(&parsed).expect("valid sample");
        let rendered = render_report(&report);
        for needle in [
            "Dominant color",
            "Rarity",
            "Ancestry",
            "Health clues",
            "Biometric signature",
            "Personality vibe",
            "Pigment oddities",
            "Health indicators",
            "Unique patterns",
            "Color composition",
        ] {
            assert!(rendered.contains(needle), "missing {needle}");
        }
    }
}
