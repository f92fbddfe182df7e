//! # Run Tracking
//!
//! Records per-session runs (parameters, turns, end) as JSON lines.
//!
//! One `Tracker` exists per process and is shared by every session. Each
//! session opens its own `TrackingRun`. Sessions only serialize and enqueue a
//! record; a dedicated writer thread owns the sink and does one `write_all`
//! per line, so file I/O never runs on an async worker and concurrent sessions
//! never interleave records. Tracking is strictly best effort: sink failures
//! are logged and dropped, never returned to the session.

use crate::config::{AgentConfig, LlmConfig, TrackingConfig};
use crate::session::EndReason;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest stored preview of a turn's input or response.
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TrackingEvent<'a> {
    RunStarted {
        run_id: Uuid,
        experiment: &'a str,
        timestamp: DateTime<Utc>,
    },
    Params {
        run_id: Uuid,
        llm_provider: &'a str,
        llm_model: &'a str,
        temperature: f32,
        agent_description: &'a str,
        max_iterations: u32,
    },
    Turn {
        run_id: Uuid,
        input_length: usize,
        response_length: usize,
        latest_input: String,
        latest_response: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_sec: Option<f64>,
    },
    RunEnded {
        run_id: Uuid,
        status: EndReason,
        duration_sec: f64,
        total_turns: u64,
        timestamp: DateTime<Utc>,
    },
}

enum WriterCommand {
    Line(Vec<u8>),
    /// Answered once every earlier line has been written
    Flush(mpsc::SyncSender<()>),
}

pub struct Tracker {
    sink: Option<mpsc::Sender<WriterCommand>>,
}

impl Tracker {
    /// A tracker that records nothing.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Append to `config.path`, or record nothing when tracking is off.
    pub fn from_config(config: &TrackingConfig) -> anyhow::Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .with_context(|| format!("Failed to open tracking file {}", config.path))?;

        Self::with_writer(file)
    }

    /// Hand `writer` to a dedicated writer thread.
    pub fn with_writer(writer: impl Write + Send + 'static) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("tracking-writer".to_string())
            .spawn(move || write_lines(writer, rx))
            .context("Failed to start tracking writer")?;

        Ok(Self { sink: Some(tx) })
    }

    /// Block until every record enqueued so far has reached the sink.
    pub fn flush(&self) {
        let Some(sink) = &self.sink else {
            return;
        };

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        if sink.send(WriterCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn start_run(self: &Arc<Self>, experiment: &str) -> TrackingRun {
        let run = TrackingRun {
            tracker: Arc::clone(self),
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            ended: AtomicBool::new(false),
        };
        self.record(&TrackingEvent::RunStarted {
            run_id: run.run_id,
            experiment,
            timestamp: Utc::now(),
        });
        debug!("Started tracking run {} ({})", run.run_id, experiment);
        run
    }

    fn record(&self, event: &TrackingEvent<'_>) {
        let Some(sink) = &self.sink else {
            return;
        };

        let mut line = match serde_json::to_vec(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize tracking event: {}", e);
                return;
            }
        };
        line.push(b'\n');

        if sink.send(WriterCommand::Line(line)).is_err() {
            warn!("Tracking writer has stopped, dropping event");
        }
    }
}

fn write_lines(mut writer: impl Write, commands: mpsc::Receiver<WriterCommand>) {
    for command in commands {
        match command {
            WriterCommand::Line(line) => {
                if let Err(e) = writer.write_all(&line).and_then(|_| writer.flush()) {
                    warn!("Failed to write tracking event: {}", e);
                }
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// One session's run. Ending is idempotent.
pub struct TrackingRun {
    tracker: Arc<Tracker>,
    run_id: Uuid,
    started: Instant,
    ended: AtomicBool,
}

impl TrackingRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn log_static(&self, model: &LlmConfig, agent: &AgentConfig) {
        self.tracker.record(&TrackingEvent::Params {
            run_id: self.run_id,
            llm_provider: &model.provider,
            llm_model: &model.model,
            temperature: model.temperature,
            agent_description: &agent.description,
            max_iterations: agent.max_iterations,
        });
    }

    pub fn log_turn(&self, input: &str, output: &str, duration_sec: Option<f64>) {
        self.tracker.record(&TrackingEvent::Turn {
            run_id: self.run_id,
            input_length: input.chars().count(),
            response_length: output.chars().count(),
            latest_input: preview(input),
            latest_response: preview(output),
            duration_sec,
        });
    }

    /// Write the end record. Only the first call has any effect.
    pub fn end_run(&self, reason: EndReason, total_turns: u64) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tracker.record(&TrackingEvent::RunEnded {
            run_id: self.run_id,
            status: reason,
            duration_sec: self.started.elapsed().as_secs_f64(),
            total_turns,
            timestamp: Utc::now(),
        });
        debug!("Ended tracking run {} ({})", self.run_id, reason);
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
