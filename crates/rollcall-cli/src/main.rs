use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::enrollment::{self, EnrollmentCapture, EnrollmentForm};
use rollcall_core::ledger::Ledger;
use rollcall_core::recognition::RecognitionEngine;
use rollcall_core::scoring::{self, SessionTally};
use rollcall_core::store::HistoryFilter;
use rollcall_core::subjects::{self, SubjectEdit};
use rollcall_core::training::{self, TrainingError};
use rollcall_core::{EventBus, ScrfdDetector, Store, SubjectSummary};
use rollcall_hw::{Camera, FrameSource, ImageDirSource};
use rollcall_store::SqliteStore;
use std::path::PathBuf;

mod config;
mod pipeline;
mod session;

use config::Config;
use pipeline::{Acquisition, QueuePolicy};
use session::CaptureOutcome;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face enrollment, recognition and attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Read frames from a directory of images instead of the camera
    #[arg(long, value_name = "DIR")]
    from_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new subject: capture five face samples and store the profile
    Enroll {
        #[arg(short, long)]
        key: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        gender: String,
        #[arg(short, long)]
        class: String,
        /// Representative (avatar) image file
        #[arg(short, long)]
        representative: Option<PathBuf>,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Re-capture all five face samples of an existing subject
    Resample {
        key: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Retrain the classifier from every stored sample
    Train,
    /// Recognize faces and record attendance on confirmation
    Attend {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// List all subjects
    List,
    /// Find subjects whose key contains a fragment
    Search {
        #[arg(default_value = "")]
        fragment: String,
    },
    /// List the subjects of one class
    Roster { class: String },
    /// Show one subject and today's attendance
    Show { key: String },
    /// Change a subject's fields or representative image
    Edit {
        key: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        representative: Option<PathBuf>,
    },
    /// Delete a subject and all of its attendance records
    Delete {
        key: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Attendance history, newest first
    History {
        /// Only records whose subject key or name contains this
        #[arg(long)]
        filter: Option<String>,
        /// Only records of this subject
        #[arg(long, conflicts_with = "filter")]
        key: Option<String>,
    },
    /// Compute and store a subject's coursework score from session counts
    Score {
        key: String,
        #[arg(long, default_value_t = 0)]
        present: u32,
        #[arg(long, default_value_t = 0)]
        excused: u32,
        #[arg(long, default_value_t = 0)]
        unexcused: u32,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    if let Commands::Devices = cli.command {
        return list_devices();
    }

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let events = EventBus::new();
    let event_log = session::spawn_event_log(&events);

    let result = run(cli.command, &config, &store, &events).await;
    drop(events);
    if let Err(e) = event_log.await {
        tracing::warn!(error = %e, "event log task failed");
    }
    result
}

async fn run(command: Commands, config: &Config, store: &SqliteStore, events: &EventBus) -> Result<()> {
    match command {
        Commands::Enroll {
            key,
            name,
            gender,
            class,
            representative,
            source,
        } => {
            let form = EnrollmentForm {
                key,
                name,
                gender,
                class,
                representative,
            };
            // Catch an obvious duplicate before making anyone sit for capture.
            if store.subject_exists(form.key.trim())? {
                bail!("subject {} already exists; use `rollcall resample` to re-capture", form.key.trim());
            }
            let Some(capture) = capture_samples(config, &source).await? else {
                return Ok(());
            };
            let profile = enrollment::commit_enrollment(store, events, &form, &capture)?;
            println!("Enrolled {} ({}). Run `rollcall train` to include them in recognition.", profile.summary.key, profile.summary.name);
        }
        Commands::Resample { key, source } => {
            subjects::profile(store, &key)?;
            let Some(capture) = capture_samples(config, &source).await? else {
                return Ok(());
            };
            enrollment::replace_samples(store, events, &key, &capture)?;
            println!("Replaced face samples of {}. Run `rollcall train` to apply.", key.trim());
        }
        Commands::Train => match training::train(store, &config.classifier_paths(), events) {
            Ok((_, report)) => println!(
                "Trained on {} samples from {} subjects ({} skipped).",
                report.samples, report.subjects, report.skipped
            ),
            Err(TrainingError::NoData) => {
                println!("No usable face samples; the previous model (if any) stays in effect.")
            }
            Err(e) => return Err(e).context("training failed"),
        },
        Commands::Attend { source } => {
            let model = match training::load(&config.classifier_paths()) {
                Ok(model) => Some(model),
                Err(e) => {
                    tracing::warn!(error = %e, "no usable classifier; continuing without one");
                    None
                }
            };
            let engine = RecognitionEngine::new(model, config.confidence_threshold);
            let mut detector = ScrfdDetector::load(&config.scrfd_model_path())?;
            let mut acquisition = start_acquisition(config, &source)?;
            let ledger = Ledger::new(store, events);
            session::run_attendance(
                &mut acquisition,
                &mut detector,
                &engine,
                store,
                &ledger,
                config.recognize_tick,
            )
            .await?;
        }
        Commands::List => print_subjects(&store.subjects()?),
        Commands::Search { fragment } => print_subjects(&subjects::search(store, &fragment)?),
        Commands::Roster { class } => print_subjects(&subjects::roster(store, &class)?),
        Commands::Show { key } => {
            let profile = subjects::profile(store, &key)?;
            let s = &profile.summary;
            println!("Key:    {}", s.key);
            println!("Name:   {}", s.name);
            println!("Gender: {}", s.gender);
            println!("Class:  {}", s.class);
            if let Some(score) = s.score {
                println!("Score:  {score:.1}");
            }
            let today = chrono::Local::now().date_naive();
            match Ledger::new(store, events).latest_on(&s.key, today)? {
                Some(entry) => println!("Today:  present, last check-in {}", entry.time),
                None => println!("Today:  not marked"),
            }
        }
        Commands::Edit {
            key,
            name,
            gender,
            class,
            representative,
        } => {
            let current = subjects::profile(store, &key)?.summary;
            let edit = SubjectEdit {
                name: name.unwrap_or(current.name),
                gender: gender.unwrap_or(current.gender),
                class: class.unwrap_or(current.class),
                representative,
            };
            subjects::edit_subject(store, &key, &edit)?;
            println!("Updated {}.", current.key);
        }
        Commands::Delete { key, yes } => {
            if !yes {
                bail!("deleting {key} also removes all of its attendance records; pass --yes to confirm");
            }
            match Ledger::new(store, events).delete_subject(key.trim())? {
                Some(d) => println!("Deleted {} and {} attendance records.", key.trim(), d.attendance_removed),
                None => bail!("no such subject: {}", key.trim()),
            }
        }
        Commands::History { filter, key } => {
            let filter = match (filter, key) {
                (_, Some(key)) => HistoryFilter::Subject(key.trim().to_string()),
                (Some(f), None) => HistoryFilter::Matching(subjects::validate_search(&f)?.to_string()),
                (None, None) => HistoryFilter::All,
            };
            let entries = Ledger::new(store, events).history(&filter)?;
            if entries.is_empty() {
                println!("No attendance records.");
            }
            for e in entries {
                println!(
                    "{}  {}  {:<12} {:<24} {:<8} {}",
                    e.date,
                    e.time,
                    e.subject_key,
                    e.name,
                    e.class,
                    e.status.as_str()
                );
            }
        }
        Commands::Score {
            key,
            present,
            excused,
            unexcused,
        } => {
            let tally = SessionTally {
                present,
                excused,
                unexcused,
            };
            let score = scoring::record_session_score(store, key.trim(), tally)?;
            println!("Score for {}: {score:.1}", key.trim());
        }
        Commands::Devices => list_devices()?,
    }

    Ok(())
}

fn open_source(config: &Config, args: &SourceArgs) -> Result<(Box<dyn FrameSource>, QueuePolicy)> {
    match &args.from_dir {
        Some(dir) => Ok((Box::new(ImageDirSource::open(dir)?), QueuePolicy::Lossless)),
        None => {
            let camera = Camera::open(&config.camera_device)
                .with_context(|| format!("opening camera {}", config.camera_device))?;
            tracing::info!(device = %config.camera_device, format = ?camera.pixel_format(), "camera opened");
            Ok((Box::new(camera), QueuePolicy::DropNewest))
        }
    }
}

fn start_acquisition(config: &Config, args: &SourceArgs) -> Result<Acquisition> {
    let (source, policy) = open_source(config, args)?;
    Acquisition::spawn(source, config.queue_capacity, policy).context("starting frame acquisition")
}

/// Run a capture session. `None` when the user cancelled or the source ran dry.
async fn capture_samples(config: &Config, args: &SourceArgs) -> Result<Option<EnrollmentCapture>> {
    let mut detector = ScrfdDetector::load(&config.scrfd_model_path())?;
    let mut acquisition = start_acquisition(config, args)?;
    let mut capture = EnrollmentCapture::new(config.capture_config());

    println!("Look at the camera. Capturing five samples...");
    let outcome = session::run_capture(&mut acquisition, &mut detector, &mut capture, config.enroll_tick).await?;
    drop(acquisition);

    match outcome {
        CaptureOutcome::Complete => Ok(Some(capture)),
        CaptureOutcome::Cancelled => {
            println!("Capture cancelled with {} of 5 samples; nothing saved.", capture.samples().len());
            Ok(None)
        }
        CaptureOutcome::SourceExhausted => {
            println!(
                "Frame source ended with {} of 5 samples; nothing saved.",
                capture.samples().len()
            );
            Ok(None)
        }
    }
}

fn print_subjects(list: &[SubjectSummary]) {
    if list.is_empty() {
        println!("No subjects.");
        return;
    }
    for s in list {
        let score = s.score.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".into());
        println!("{:<12} {:<24} {:<6} {:<8} {}", s.key, s.name, s.gender, s.class, score);
    }
}

fn list_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found.");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}
