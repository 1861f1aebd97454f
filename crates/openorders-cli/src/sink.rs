//! Concrete notification sinks
//!
//! | Kind | Session | Commit |
//! |------|---------|--------|
//! | `dry-run` | logs each request | no-op |
//! | `spool` | writes a hidden JSON file per request | renames pending files into view |
//! | `command` | runs a program per request | no-op |

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use chrono::{Local, NaiveDateTime};
use openorders_core::{MailRequest, NotificationSink, SinkConfig, SinkError, SinkSession};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Build the sink named in the `[sink]` section
pub fn from_config(config: &SinkConfig) -> Box<dyn NotificationSink> {
    match config {
        SinkConfig::DryRun => Box::new(DryRunSink),
        SinkConfig::Spool { dir } => Box::new(SpoolSink::new(dir.clone())),
        SinkConfig::Command {
            program,
            args,
            connect_args,
            benign_marker,
        } => Box::new(CommandSink {
            program: program.clone(),
            args: args.clone(),
            connect_args: connect_args.clone(),
            benign_marker: benign_marker.clone(),
        }),
    }
}

// ============================================================================
// Dry run
// ============================================================================

/// Logs requests instead of sending them
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunSink;

struct DryRunSession;

impl NotificationSink for DryRunSink {
    fn connect(&self) -> Result<Box<dyn SinkSession + '_>, SinkError> {
        Ok(Box::new(DryRunSession))
    }
}

impl SinkSession for DryRunSession {
    fn submit(&mut self, request: &MailRequest) -> Result<(), SinkError> {
        info!(
            "[dry-run] to: {:?}, cc: {:?}, attachment: {:?}, body: {:?}",
            request.recipients, request.copy_recipients, request.attachment, request.body
        );
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

// ============================================================================
// Spool directory
// ============================================================================

/// Drops each committed request as a JSON file into a directory watched by
/// the mail relay.
///
/// Pending requests live in dot-files that the relay ignores; commit renames
/// them to their visible name. Uncommitted requests vanish with the session.
#[derive(Clone, Debug)]
pub struct SpoolSink {
    dir: PathBuf,
}

impl SpoolSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[derive(Serialize)]
struct SpoolEntry<'a> {
    queued_at: NaiveDateTime,
    #[serde(flatten)]
    request: &'a MailRequest,
}

struct SpoolSession<'a> {
    dir: &'a Path,
    pending: Vec<NamedTempFile>,
}

impl NotificationSink for SpoolSink {
    fn connect(&self) -> Result<Box<dyn SinkSession + '_>, SinkError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SinkError::Connect(format!("{}: {e}", self.dir.display())))?;
        Ok(Box::new(SpoolSession {
            dir: &self.dir,
            pending: Vec::new(),
        }))
    }
}

impl SinkSession for SpoolSession<'_> {
    fn submit(&mut self, request: &MailRequest) -> Result<(), SinkError> {
        let entry = SpoolEntry {
            queued_at: Local::now().naive_local(),
            request,
        };
        let json = serde_json::to_vec_pretty(&entry).map_err(|e| SinkError::Failed(e.to_string()))?;

        let mut file = tempfile::Builder::new()
            .prefix(".mail-")
            .suffix(".json")
            .tempfile_in(self.dir)
            .map_err(|e| SinkError::Failed(e.to_string()))?;
        file.write_all(&json)
            .map_err(|e| SinkError::Failed(e.to_string()))?;
        self.pending.push(file);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        for file in self.pending.drain(..) {
            let visible = visible_name(file.path());
            file.persist(&visible)
                .map_err(|e| SinkError::Failed(e.error.to_string()))?;
            debug!("Spooled {}", visible.display());
        }
        Ok(())
    }
}

/// `.mail-XXXX.json` -> `mail-XXXX.json` in the same directory
fn visible_name(pending: &Path) -> PathBuf {
    let name = pending
        .file_name()
        .map(|n| n.to_string_lossy().trim_start_matches('.').to_string())
        .unwrap_or_default();
    pending.with_file_name(name)
}

// ============================================================================
// External command
// ============================================================================

/// Runs an external program once per request.
///
/// A zero exit status is a delivery; otherwise stderr (or stdout) becomes the
/// failure detail. When `benign_marker` occurs in the output the request
/// counts as delivered with the benign "no result set" condition.
#[derive(Clone, Debug)]
pub struct CommandSink {
    pub program: String,
    pub args: Vec<String>,
    pub connect_args: Option<Vec<String>>,
    pub benign_marker: Option<String>,
}

struct CommandSession<'a> {
    sink: &'a CommandSink,
}

impl CommandSink {
    fn run(&self, args: &[String]) -> std::io::Result<Output> {
        Command::new(&self.program).args(args).output()
    }

    fn is_benign(&self, output: &Output) -> bool {
        let Some(marker) = self.benign_marker.as_deref() else {
            return false;
        };
        String::from_utf8_lossy(&output.stdout).contains(marker)
            || String::from_utf8_lossy(&output.stderr).contains(marker)
    }
}

impl NotificationSink for CommandSink {
    fn connect(&self) -> Result<Box<dyn SinkSession + '_>, SinkError> {
        if let Some(probe) = &self.connect_args {
            let output = self
                .run(probe)
                .map_err(|e| SinkError::Connect(format!("{}: {e}", self.program)))?;
            if !output.status.success() {
                return Err(SinkError::Connect(failure_detail(&output)));
            }
        }
        Ok(Box::new(CommandSession { sink: self }))
    }
}

impl SinkSession for CommandSession<'_> {
    fn submit(&mut self, request: &MailRequest) -> Result<(), SinkError> {
        let args: Vec<String> = self
            .sink
            .args
            .iter()
            .map(|arg| fill_request(arg, request))
            .collect();

        let output = self
            .sink
            .run(&args)
            .map_err(|e| SinkError::Failed(format!("{}: {e}", self.sink.program)))?;

        if self.sink.is_benign(&output) {
            return Err(SinkError::NoResultSet);
        }
        if !output.status.success() {
            return Err(SinkError::Failed(failure_detail(&output)));
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

fn fill_request(template: &str, request: &MailRequest) -> String {
    template
        .replace("{attachment}", &request.attachment)
        .replace("{body}", &request.body)
        .replace("{recipients}", &request.recipients)
        .replace("{copy_recipients}", &request.copy_recipients)
}

fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    if detail.is_empty() {
        output.status.to_string()
    } else {
        detail.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
