//! Tick-driven enrollment and attendance sessions.
//!
//! Each tick pulls at most one frame and runs the whole per-frame pipeline to
//! completion before the next tick. Ctrl-C stops the session cooperatively.

use crate::pipeline::{Acquisition, Pulled};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use rollcall_core::enrollment::{CaptureState, EnrollmentCapture, EnrollmentProgress};
use rollcall_core::ledger::{DayStatus, Ledger, LedgerError};
use rollcall_core::recognition::{NoMatchReason, Recognition, RecognitionEngine};
use rollcall_core::{EventBus, FaceDetector, RollEvent, Store};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How an enrollment capture session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Complete,
    Cancelled,
    SourceExhausted,
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Feed frames into `capture` until it has five samples, the source ends, or the user cancels.
pub async fn run_capture(
    acquisition: &mut Acquisition,
    detector: &mut dyn FaceDetector,
    capture: &mut EnrollmentCapture,
    tick: Duration,
) -> Result<CaptureOutcome> {
    let mut interval = ticker(tick);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    capture.start();
    let mut last_shown: Option<EnrollmentProgress> = None;

    while capture.wants_frames() {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                capture.stop();
                acquisition.stop();
                return Ok(CaptureOutcome::Cancelled);
            }
        }

        let frame = match acquisition.pull() {
            Pulled::Frame(frame) => frame,
            Pulled::Empty => continue,
            Pulled::Closed => {
                capture.stop();
                return Ok(CaptureOutcome::SourceExhausted);
            }
            Pulled::Failed(e) => return Err(e).context("camera failed during enrollment"),
        };

        let faces = match detector.detect(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "detection failed; skipping frame");
                continue;
            }
        };
        let progress = capture.tick(&frame.image, &faces);
        if last_shown.as_ref() != Some(&progress) {
            print_progress(&progress);
            last_shown = Some(progress);
        }
    }

    acquisition.stop();
    Ok(if capture.is_complete() { CaptureOutcome::Complete } else { CaptureOutcome::Cancelled })
}

fn print_progress(p: &EnrollmentProgress) {
    if p.multiple_faces {
        println!("  [{}/5] more than one face in view, only one person please", p.samples);
        return;
    }
    match (p.state, p.quality) {
        (CaptureState::Complete, _) => println!("  [5/5] capture complete"),
        (_, Some(q)) if p.captured => println!("  [{}/5] sample captured (quality {q:.0})", p.samples),
        (_, Some(q)) => println!("  [{}/5] quality {q:.0}, hold still and face the light", p.samples),
        (_, None) => println!("  [{}/5] waiting for a face", p.samples),
    }
}

/// The engine's current view, reduced to what is worth printing on change.
#[derive(Debug, Clone, PartialEq)]
enum Shown {
    Subject(String),
    Unrecognized,
    NoFace,
}

/// Recognize continuously; pressing Enter records attendance for the current match.
///
/// Typing `q` or pressing Ctrl-C ends the session.
pub async fn run_attendance(
    acquisition: &mut Acquisition,
    detector: &mut dyn FaceDetector,
    engine: &RecognitionEngine,
    store: &dyn Store,
    ledger: &Ledger<'_>,
    tick: Duration,
) -> Result<()> {
    let mut interval = ticker(tick);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut current = Recognition::NoMatch(NoMatchReason::NoFace);
    let mut shown: Option<Shown> = None;

    if !engine.has_model() {
        println!("No trained model: every face will be unrecognized until `rollcall train` is run.");
    }
    println!("Recognizing. Press Enter to confirm attendance, q then Enter to quit.");
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            line = stdin.next_line() => {
                match line.context("reading stdin")? {
                    Some(l) if l.trim().eq_ignore_ascii_case("q") => break,
                    None => break,
                    Some(_) => confirm(ledger, &current, now()),
                }
                continue;
            }
            _ = &mut ctrl_c => break,
        }

        let frame = match acquisition.pull() {
            Pulled::Frame(frame) => frame,
            Pulled::Empty => continue,
            Pulled::Closed => {
                println!("Frame source ended.");
                break;
            }
            Pulled::Failed(e) => return Err(e).context("camera failed during recognition"),
        };

        let faces = match detector.detect(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "detection failed; skipping frame");
                Vec::new()
            }
        };
        current = engine.recognize(&frame.image, &faces, store);

        let view = match &current {
            Recognition::Matched(m) => Shown::Subject(m.subject.key.clone()),
            Recognition::NoMatch(NoMatchReason::NoFace) => Shown::NoFace,
            Recognition::NoMatch(_) => Shown::Unrecognized,
        };
        if shown.as_ref() != Some(&view) {
            print_recognition(ledger, &current);
            shown = Some(view);
        }
    }

    acquisition.stop();
    Ok(())
}

fn print_recognition(ledger: &Ledger<'_>, recognition: &Recognition) {
    match recognition {
        Recognition::Matched(m) => {
            let s = &m.subject;
            let today = match ledger.day_status(&s.key, now().date()) {
                Ok(DayStatus::NotMarked) => "not yet marked today".to_string(),
                Ok(DayStatus::Marked(n)) => format!("marked {n}x today"),
                Err(e) => {
                    tracing::warn!(error = %e, "could not read today's status");
                    "status unavailable".to_string()
                }
            };
            println!(
                "Recognized {}: {} ({}, {}) distance {:.1}, {today}",
                s.key, s.name, s.class, s.gender, m.distance
            );
        }
        Recognition::NoMatch(NoMatchReason::NoFace) => println!("No face in view."),
        Recognition::NoMatch(NoMatchReason::ModelUnavailable) => {
            println!("Unrecognized (no trained model; run `rollcall train`).")
        }
        Recognition::NoMatch(_) => println!("Unrecognized."),
    }
}

fn confirm(ledger: &Ledger<'_>, current: &Recognition, at: NaiveDateTime) {
    match ledger.mark_attendance(current, at) {
        Ok(record) => println!(
            "Attendance recorded for {} on {} at {} (check-in #{} today).",
            record.subject_key, record.date, record.time, record.ordinal
        ),
        Err(LedgerError::Rejected) => println!("No recognized subject in view; nothing recorded."),
        Err(LedgerError::Store(e)) => {
            tracing::warn!(error = %e, "attendance write failed");
            println!("Could not record attendance: {e}");
        }
    }
}

/// Log every published event until the bus is dropped. Resolves to the number logged.
pub fn spawn_event_log(events: &EventBus) -> JoinHandle<usize> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut logged = 0;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    log_event(&event);
                    logged += 1;
                }
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
        logged
    })
}

fn log_event(event: &RollEvent) {
    match event {
        RollEvent::EnrollmentCompleted { key } => tracing::info!(key, "subject enrolled"),
        RollEvent::SamplesReplaced { key } => tracing::info!(key, "face samples replaced"),
        RollEvent::ModelTrained { subjects, samples } => tracing::info!(subjects, samples, "classifier trained"),
        RollEvent::AttendanceRecorded(r) => tracing::info!(
            key = %r.subject_key,
            date = %r.date,
            time = %r.time,
            ordinal = r.ordinal,
            "attendance recorded"
        ),
        RollEvent::SubjectDeleted { key, attendance_removed } => {
            tracing::info!(key, attendance_removed, "subject deleted")
        }
    }
}

/// Local wall-clock time at second resolution.
fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
