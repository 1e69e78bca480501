use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::records::StudentRegistry;
use rollcall_core::{DetectorOptions, OnnxFaceAnalyzer, StudentId};
use rollcall_hw::Camera;
use rollcall_session::{
    SessionConfig, SessionController, SessionEvent, SessionSummary, V4l2CameraProvider,
};
use rollcall_store::{AttendanceFilter, EmbeddingStore, LocalImageStore, SqliteRecords};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod register;
mod report;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance taking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student from a photo containing exactly one face
    Enroll {
        /// Student's display name
        #[arg(short, long)]
        name: String,
        /// Path to a JPEG/PNG photo
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Take attendance from the camera until Ctrl-C
    Run {
        /// Maximum match distance in [0, 1] (overrides config)
        #[arg(short, long)]
        tolerance: Option<f32>,
    },
    /// List students with a stored encoding
    List,
    /// Remove a student and their encoding
    Remove {
        /// Student ID to remove
        id: StudentId,
    },
    /// Print attendance records
    Report {
        /// Only this date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Only this student
        #[arg(short, long)]
        student: Option<StudentId>,
        /// CSV instead of a table
        #[arg(long, conflicts_with = "json")]
        csv: bool,
        /// JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Devices = cli.command {
        return list_devices();
    }

    let config = Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll { name, image } => enroll(&config, &name, &image),
        Commands::Run { tolerance } => run(config, tolerance).await,
        Commands::List => list(&config),
        Commands::Remove { id } => remove(&config, id),
        Commands::Report {
            date,
            student,
            csv,
            json,
        } => print_report(&config, AttendanceFilter { date, student_id: student }, csv, json),
        Commands::Devices => list_devices(),
    }
}

fn load_analyzer(config: &Config) -> Result<OnnxFaceAnalyzer> {
    let (scrfd, arcface) = config.require_models()?;
    let options = DetectorOptions {
        confidence_threshold: config.confidence_threshold,
        ..DetectorOptions::default()
    };
    let analyzer = OnnxFaceAnalyzer::load(&scrfd, &arcface, options)?;
    tracing::info!(scrfd = %scrfd, arcface = %arcface, "models loaded");
    Ok(analyzer)
}

fn enroll(config: &Config, name: &str, image: &Path) -> Result<()> {
    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let filename = image
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut analyzer = load_analyzer(config)?;
    let records = SqliteRecords::open(&config.db_path)?;
    let images = LocalImageStore::new(&config.image_dir);
    let encodings = EmbeddingStore::open(&config.encodings_path);

    let id = register::register_student(
        &mut analyzer,
        &records,
        &images,
        &encodings,
        name,
        &bytes,
        &filename,
    )?;
    println!("Enrolled {} as student {id}", name.trim());
    Ok(())
}

async fn run(mut config: Config, tolerance: Option<f32>) -> Result<()> {
    if let Some(t) = tolerance {
        if !(0.0..=1.0).contains(&t) {
            bail!("tolerance must be within [0, 1], got {t}");
        }
        config.tolerance = t;
    }

    // Fail before spawning anything if models are missing.
    config.require_models()?;

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();

    let session_stop = stop.clone();
    let session = std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || -> Result<SessionSummary> {
            let analyzer = load_analyzer(&config)?;
            let ledger = SqliteRecords::open(&config.db_path)?;
            let provider = V4l2CameraProvider {
                device: config.camera_device.clone(),
                width: config.camera_width,
                height: config.camera_height,
                warmup_frames: config.warmup_frames,
            };
            let session_config = SessionConfig {
                tolerance: config.tolerance,
                frame_interval: config.frame_interval,
            };
            let mut controller = SessionController::new(
                provider,
                analyzer,
                ledger,
                EmbeddingStore::open(&config.encodings_path),
                session_config,
            );
            let summary = controller.run(&session_stop, |event| {
                let _ = tx.send(event.clone());
            })?;
            Ok(summary)
        })
        .context("failed to spawn session thread")?;

    tracing::info!("session running; press Ctrl-C to stop");
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => print_event(&event),
                // Sender dropped: the session thread has finished.
                None => break,
            },
            signal = tokio::signal::ctrl_c(), if !stop.load(Ordering::Relaxed) => {
                signal?;
                tracing::info!("stopping session");
                stop.store(true, Ordering::Relaxed);
            }
        }
    }

    let summary = tokio::task::spawn_blocking(move || session.join())
        .await?
        .map_err(|_| anyhow::anyhow!("session thread panicked"))??;
    tracing::info!(frames = summary.frames, marked = summary.marked.len(), "session finished");
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Started { encodings } => {
            println!("Session started with {encodings} known students");
        }
        SessionEvent::StoreDegraded { error } => {
            eprintln!("warning: encoding cache unreadable ({error}); nobody will be recognised");
        }
        SessionEvent::Recorded {
            student_id,
            name,
            record,
        } => {
            println!("{} present at {} (id {student_id})", name, record.time);
        }
        SessionEvent::AlreadyRecorded { student_id, name } => {
            println!("{name} already marked today (id {student_id})");
        }
        SessionEvent::RecordWriteFailure {
            student_id,
            name,
            error,
        } => {
            eprintln!("error: could not record {name} (id {student_id}): {error}");
        }
        SessionEvent::Stopped(summary) => {
            println!(
                "Session stopped after {} frames; {} students marked",
                summary.frames,
                summary.marked.len()
            );
        }
    }
}

fn list(config: &Config) -> Result<()> {
    let known = EmbeddingStore::open(&config.encodings_path).load()?;
    if known.is_empty() {
        println!("No students enrolled");
        return Ok(());
    }
    println!("{:<10} NAME", "ID");
    for (id, name) in known.names() {
        println!("{id:<10} {name}");
    }
    Ok(())
}

fn remove(config: &Config, id: StudentId) -> Result<()> {
    let removed_encoding = EmbeddingStore::open(&config.encodings_path).remove(id)?;
    let removed_student = SqliteRecords::open(&config.db_path)?.delete_student(id)?;
    if !removed_encoding && !removed_student {
        bail!("no student with id {id}");
    }
    println!("Removed student {id}");
    Ok(())
}

fn print_report(config: &Config, filter: AttendanceFilter, csv: bool, json: bool) -> Result<()> {
    let db = SqliteRecords::open(&config.db_path)?;
    let records = db.attendance_records(&filter)?;
    let students = db.students()?;
    let rows = report::rows(&records, &students);

    let mut out = std::io::stdout().lock();
    if csv {
        report::write_csv(&mut out, &rows)?;
    } else if json {
        for row in &rows {
            serde_json::to_writer(&mut out, row)?;
            std::io::Write::write_all(&mut out, b"\n")?;
        }
    } else {
        report::write_table(&mut out, &rows)?;
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return Ok(());
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_report_args() {
        let cli = Cli::try_parse_from(["rollcall", "report", "--date", "2026-10-17", "--csv"]).unwrap();
        match cli.command {
            Commands::Report { date, student, csv, json } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 17));
                assert_eq!(student, None);
                assert!(csv);
                assert!(!json);
            }
            _ => panic!("expected report"),
        }
        assert!(Cli::try_parse_from(["rollcall", "report", "--csv", "--json"]).is_err());
        assert!(Cli::try_parse_from(["rollcall", "report", "--date", "17/10/2026"]).is_err());
    }
}
