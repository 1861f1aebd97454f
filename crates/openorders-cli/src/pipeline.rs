//! One trigger run: every segment of the trigger, in order
//!
//! Per segment:
//!
//! ```text
//! extract missing? ── yes ──> alert ops "ERROR: <path> was not found."
//!        │ no
//! filter ─> persist styled workbook
//!        │
//! no rows? ── yes ──> alert ops with the no-data message
//!        │ no
//! resolve recipients (missing list file halts the process)
//!        │
//! deliver the workbook with the report body
//! ```
//!
//! Any other error ends only its segment: it is logged, relayed to the
//! operations contact as `Error: <detail>.` and the next segment runs.

use std::path::PathBuf;

use openorders_core::{
    Delivery, NotificationSink, Notifier, ReportConfig, RunContext, SinkError, SinkSession,
    TriggerConfig,
};
use openorders_ingest::{resolve_recipients, DatasetFilter, IngestError};
use openorders_render::{RenderError, WorkbookFormatter};
use thiserror::Error;
use tracing::{error, info};

/// Conditions that stop the whole process
#[derive(Debug, Error)]
pub enum PipelineHalt {
    #[error("{0}")]
    Connect(#[source] SinkError),

    #[error("Recipient list {} was not found", .0.display())]
    RecipientsMissing(PathBuf),
}

/// Failure of a single segment
#[derive(Debug, Error)]
enum SegmentError {
    #[error(transparent)]
    Halt(#[from] PipelineHalt),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// What happened to one segment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Source extract absent, operations alerted
    ExtractMissing(Delivery),
    /// Filter left no rows, operations alerted
    NoData(Delivery),
    /// Workbook sent to the segment's recipients
    Reported(Delivery),
    /// Segment failed, operations alerted with `message`
    Failed { message: String, delivery: Delivery },
}

/// Runs triggers against one immutable configuration
pub struct Pipeline<'a> {
    config: &'a ReportConfig,
    notifier: Notifier,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self {
            config,
            notifier: Notifier::new(config.operations_address.clone()),
        }
    }

    /// Process every segment of `trigger` through one sink session
    pub fn run_trigger(
        &self,
        sink: &dyn NotificationSink,
        trigger: &TriggerConfig,
        ctx: &RunContext,
    ) -> Result<Vec<SegmentOutcome>, PipelineHalt> {
        let mut session = sink.connect().map_err(|e| {
            error!("Connection to notification sink failed: {e}");
            PipelineHalt::Connect(e)
        })?;

        let mut outcomes = Vec::with_capacity(trigger.segments.len());
        for segment in &trigger.segments {
            match self.run_segment(session.as_mut(), segment, ctx) {
                Ok(outcome) => outcomes.push(outcome),
                Err(SegmentError::Halt(halt)) => return Err(halt),
                Err(e) => {
                    error!("Error: {e}.");
                    let message = format!("Error: {e}.").replace('\'', "");
                    let delivery =
                        self.notifier
                            .alert(session.as_mut(), &self.extract_name(segment, ctx), &message);
                    outcomes.push(SegmentOutcome::Failed { message, delivery });
                }
            }
        }
        Ok(outcomes)
    }

    fn run_segment(
        &self,
        session: &mut dyn SinkSession,
        segment: &str,
        ctx: &RunContext,
    ) -> Result<SegmentOutcome, SegmentError> {
        let paths = &self.config.paths;
        let extract = paths.extract.render(segment, ctx);

        if !extract.exists() {
            error!("{}", IngestError::MissingFile(extract.clone()));
            let body = format!("ERROR: {} was not found.", extract.display());
            let delivery = self
                .notifier
                .alert(session, &self.extract_name(segment, ctx), &body);
            return Ok(SegmentOutcome::ExtractMissing(delivery));
        }

        let filtered = DatasetFilter::new(&self.config.filter).run(&extract, ctx)?;
        info!("Information: {segment}.");

        let output = paths.output.render(segment, ctx);
        WorkbookFormatter::from_config(&self.config.workbook, &filtered.date_columns)
            .persist(&filtered.table, &output)?;
        let output_name = output.display().to_string();

        if filtered.table.is_empty() {
            info!("{}", self.config.messages.no_data);
            let delivery = self
                .notifier
                .alert(session, &output_name, &self.config.messages.no_data);
            return Ok(SegmentOutcome::NoData(delivery));
        }

        let recipients_path = paths.recipients.render(segment, ctx);
        let copy_path = paths.copy_recipients.render(segment, ctx);
        let recipients = resolve_recipients(&recipients_path, &copy_path).map_err(|e| match e {
            IngestError::MissingFile(path) => SegmentError::Halt(PipelineHalt::RecipientsMissing(path)),
            other => SegmentError::Ingest(other),
        })?;

        let body = self.config.messages.report_body(segment, ctx);
        let delivery = self.notifier.deliver(
            session,
            &output_name,
            &body,
            &recipients.to,
            &recipients.cc,
        );
        Ok(SegmentOutcome::Reported(delivery))
    }

    /// File name of the segment's extract, used as the alert attachment
    fn extract_name(&self, segment: &str, ctx: &RunContext) -> String {
        let path = self.config.paths.extract.render(segment, ctx);
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
