//! Report configuration
//!
//! The whole pipeline is driven by one immutable [`ReportConfig`], loaded once
//! at startup from TOML and passed by reference into every component.
//!
//! ```toml
//! operations_address = "ops@example.com"
//!
//! [filter]
//! designated_column = "Requested"
//! date_columns = ["Requested"]
//!
//! [paths]
//! extract = "/data/{segment}/extract.xlsx"
//! output = "/srv/{segment}_{date}.xlsx"
//! recipients = "/data/{segment}_to.xlsx"
//! copy_recipients = "/data/{segment}_cc.xlsx"
//!
//! [[schedule.triggers]]
//! label = "afternoon"
//! at = "13:05:00"
//! segments = ["1500"]
//! terminal = true
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RunContext;

// ============================================================================
// Errors
// ============================================================================

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Root
// ============================================================================

/// Complete pipeline configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Address that receives alerts and never receives attachments
    pub operations_address: String,
    pub filter: FilterConfig,
    #[serde(default)]
    pub workbook: WorkbookConfig,
    pub paths: PathConfig,
    #[serde(default)]
    pub messages: MessageConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

impl ReportConfig {
    /// Parse configuration from TOML text (no validation)
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read, parse and validate a configuration file.
    ///
    /// Returns the config together with non-fatal warnings.
    pub fn load(path: &Path) -> Result<(Self, Vec<String>), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        let warnings = config.validate()?;
        Ok((config, warnings))
    }

    /// Check cross-field invariants.
    ///
    /// Overlapping column categories are legal (the first category in
    /// configured order wins) but reported as warnings.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.operations_address.trim().is_empty() {
            return Err(ConfigError::Invalid("operations_address is empty".into()));
        }
        if !self
            .filter
            .date_columns
            .contains(&self.filter.designated_column)
        {
            return Err(ConfigError::Invalid(format!(
                "filter.designated_column '{}' must be listed in filter.date_columns",
                self.filter.designated_column
            )));
        }
        if !(1..=31).contains(&self.filter.day_threshold) {
            return Err(ConfigError::Invalid(format!(
                "filter.day_threshold must be within 1..=31, got {}",
                self.filter.day_threshold
            )));
        }

        self.schedule.validate()?;

        let mut warnings = Vec::new();
        let mut owner: HashMap<&str, &str> = HashMap::new();
        for category in &self.workbook.categories {
            for column in category.columns() {
                if let Some(first) = owner.insert(column.as_str(), category.name()) {
                    warnings.push(format!(
                        "column '{}' is in categories '{}' and '{}'; '{}' takes priority",
                        column,
                        first,
                        category.name(),
                        first
                    ));
                    owner.insert(column.as_str(), first);
                }
            }
        }
        if self.workbook.categories.is_empty() {
            warnings.push("workbook.categories is empty; no cells will be color-coded".into());
        }

        Ok(warnings)
    }

    /// Look up a trigger by label
    pub fn trigger(&self, label: &str) -> Option<&TriggerConfig> {
        self.schedule.triggers.iter().find(|t| t.label == label)
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Dataset filter settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Date column the calendar filter is keyed on
    pub designated_column: String,
    /// Filter is active only while the day of month is below this value
    #[serde(default = "default_day_threshold")]
    pub day_threshold: u32,
    /// Columns coerced to dates on load and written as date formulas
    pub date_columns: Vec<String>,
}

fn default_day_threshold() -> u32 {
    26
}

/// Workbook styling settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkbookConfig {
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    /// Literal cell values that always get the highlight fill
    #[serde(default)]
    pub highlight_values: Vec<String>,
    /// Added to the longest value of each column
    #[serde(default = "default_width_padding")]
    pub width_padding: usize,
    /// Column categories in priority order
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            sheet_name: default_sheet_name(),
            highlight_values: Vec::new(),
            width_padding: default_width_padding(),
            categories: Vec::new(),
        }
    }
}

fn default_sheet_name() -> String {
    "Sheet1".into()
}

fn default_width_padding() -> usize {
    6
}

/// A named set of columns and the rule that flags their cells red
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum CategoryConfig {
    /// Any non-null value is flagged (the column should be empty)
    NotBlank { name: String, columns: Vec<String> },
    /// Values from `values` are flagged
    FlagValues {
        name: String,
        columns: Vec<String>,
        values: Vec<String>,
    },
}

impl CategoryConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::NotBlank { name, .. } | Self::FlagValues { name, .. } => name,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            Self::NotBlank { columns, .. } | Self::FlagValues { columns, .. } => columns,
        }
    }
}

/// Per-segment file locations
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathConfig {
    pub extract: PathTemplate,
    pub output: PathTemplate,
    pub recipients: PathTemplate,
    pub copy_recipients: PathTemplate,
}

/// Path with `{segment}` and `{date}` placeholders
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathTemplate(pub String);

impl PathTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn render(&self, segment: &str, ctx: &RunContext) -> PathBuf {
        PathBuf::from(fill_placeholders(&self.0, segment, ctx))
    }
}

/// Message bodies
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageConfig {
    /// Body sent with a report; accepts `{segment}` and `{date}`
    #[serde(default = "default_report_message")]
    pub report: String,
    #[serde(default = "default_no_data_message")]
    pub no_data: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            report: default_report_message(),
            no_data: default_no_data_message(),
        }
    }
}

impl MessageConfig {
    pub fn report_body(&self, segment: &str, ctx: &RunContext) -> String {
        fill_placeholders(&self.report, segment, ctx)
    }
}

fn default_report_message() -> String {
    "Please find the open orders report for {segment} of {date} attached.".into()
}

fn default_no_data_message() -> String {
    "The excel file contains no data.".into()
}

fn fill_placeholders(template: &str, segment: &str, ctx: &RunContext) -> String {
    template
        .replace("{segment}", segment)
        .replace("{date}", &ctx.display_date())
}

// ============================================================================
// Schedule
// ============================================================================

/// What to do when the scheduler wakes after a trigger's grace window
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissedPolicy {
    /// Skip that day's run for the trigger
    #[default]
    Skip,
    /// Run it late
    CatchUp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub missed: MissedPolicy,
    /// Lateness (seconds) still counted as on time
    #[serde(default)]
    pub grace_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    pub triggers: Vec<TriggerConfig>,
}

fn default_heartbeat_secs() -> u64 {
    60
}

impl ScheduleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.triggers.is_empty() {
            return Err(ConfigError::Invalid("schedule.triggers is empty".into()));
        }
        if self.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("schedule.heartbeat_secs must be > 0".into()));
        }

        let mut labels = HashSet::new();
        for trigger in &self.triggers {
            if !labels.insert(trigger.label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate trigger label '{}'",
                    trigger.label
                )));
            }
            if trigger.segments.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "trigger '{}' has no segments",
                    trigger.label
                )));
            }
        }

        let terminal: Vec<&TriggerConfig> = self.triggers.iter().filter(|t| t.terminal).collect();
        let [last] = terminal.as_slice() else {
            return Err(ConfigError::Invalid(format!(
                "exactly one terminal trigger is required, found {}",
                terminal.len()
            )));
        };
        if let Some(later) = self.triggers.iter().find(|t| t.at >= last.at && !t.terminal) {
            return Err(ConfigError::Invalid(format!(
                "trigger '{}' at {} never fires: terminal trigger '{}' is at {}",
                later.label, later.at, last.label, last.at
            )));
        }
        Ok(())
    }
}

/// A named time of day bound to an ordered list of segments
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    pub label: String,
    /// Wall-clock time, `HH:MM:SS`
    pub at: NaiveTime,
    pub segments: Vec<String>,
    /// The process exits after this trigger's run
    #[serde(default)]
    pub terminal: bool,
}

// ============================================================================
// Sink
// ============================================================================

/// Which notification sink to deliver through
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SinkConfig {
    /// Log mail requests instead of sending them
    #[default]
    DryRun,
    /// Write each request as a JSON file into `dir`; committed on finalize
    Spool { dir: PathBuf },
    /// Run an external program per request
    Command {
        program: String,
        /// Arguments with `{attachment}`, `{body}`, `{recipients}`, `{copy_recipients}`
        args: Vec<String>,
        /// Probe run once per trigger; a failure counts as a connection failure
        #[serde(default)]
        connect_args: Option<Vec<String>>,
        /// Output fragment identifying the benign "no result set" condition
        #[serde(default)]
        benign_marker: Option<String>,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    const EXAMPLE: &str = include_str!("../../../openorders.example.toml");

    fn minimal(schedule: &str) -> String {
        format!(
            r#"
operations_address = "ops@example.com"

[filter]
designated_column = "Requested"
date_columns = ["Requested"]

[paths]
extract = "/in/{{segment}}.xlsx"
output = "/out/{{segment}}_{{date}}.xlsx"
recipients = "/r/{{segment}}_to.xlsx"
copy_recipients = "/r/{{segment}}_cc.xlsx"

{schedule}
"#
        )
    }

    const TWO_TRIGGERS: &str = r#"
[[schedule.triggers]]
label = "morning"
at = "09:00:30"
segments = ["1500", "1600"]

[[schedule.triggers]]
label = "afternoon"
at = "13:05:00"
segments = ["1500"]
terminal = true
"#;

    fn ctx() -> RunContext {
        RunContext::new(
            NaiveDate::from_ymd_opt(2026, 10, 16)
                .unwrap()
                .and_hms_opt(9, 0, 30)
                .unwrap(),
        )
    }

    #[test]
    fn example_config_is_valid() {
        let config = ReportConfig::from_toml_str(EXAMPLE).unwrap();
        let warnings = config.validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert_eq!(config.workbook.categories.len(), 5);
        assert_eq!(config.schedule.triggers.len(), 2);
        assert!(matches!(config.sink, SinkConfig::Spool { .. }));
    }

    #[test]
    fn defaults_apply() {
        let config = ReportConfig::from_toml_str(&minimal(TWO_TRIGGERS)).unwrap();
        assert_eq!(config.filter.day_threshold, 26);
        assert_eq!(config.workbook.width_padding, 6);
        assert_eq!(config.workbook.sheet_name, "Sheet1");
        assert_eq!(config.messages.no_data, "The excel file contains no data.");
        assert_eq!(config.schedule.missed, MissedPolicy::Skip);
        assert_eq!(config.schedule.grace_secs, 0);
        assert_eq!(config.schedule.heartbeat_secs, 60);
        assert_eq!(config.sink, SinkConfig::DryRun);
    }

    #[test]
    fn trigger_time_parses_seconds() {
        let config = ReportConfig::from_toml_str(&minimal(TWO_TRIGGERS)).unwrap();
        let morning = config.trigger("morning").unwrap();
        assert_eq!(morning.at, NaiveTime::from_hms_opt(9, 0, 30).unwrap());
        assert_eq!(morning.segments, vec!["1500", "1600"]);
        assert!(!morning.terminal);
    }

    #[test]
    fn path_template_substitutes_segment_and_date() {
        let config = ReportConfig::from_toml_str(&minimal(TWO_TRIGGERS)).unwrap();
        let path = config.paths.output.render("1500", &ctx());
        assert_eq!(path, PathBuf::from("/out/1500_16.10.2026.xlsx"));
    }

    #[test]
    fn report_body_substitutes_placeholders() {
        let messages = MessageConfig {
            report: "Report {segment} / {date}".into(),
            ..MessageConfig::default()
        };
        assert_eq!(messages.report_body("1700", &ctx()), "Report 1700 / 16.10.2026");
    }

    #[test]
    fn designated_column_must_be_a_date_column() {
        let text = minimal(TWO_TRIGGERS).replace(
            "date_columns = [\"Requested\"]",
            "date_columns = [\"Confirmed\"]",
        );
        let config = ReportConfig::from_toml_str(&text).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("designated_column"));
    }

    #[test]
    fn exactly_one_terminal_trigger_required() {
        let text = minimal(TWO_TRIGGERS).replace("terminal = true", "");
        let config = ReportConfig::from_toml_str(&text).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn trigger_after_terminal_is_rejected() {
        let text = minimal(TWO_TRIGGERS).replace("09:00:30", "14:00:00");
        let config = ReportConfig::from_toml_str(&text).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("never fires"));
    }

    #[test]
    fn duplicate_labels_rejected() {
        let text = minimal(TWO_TRIGGERS).replace("\"afternoon\"", "\"morning\"");
        let config = ReportConfig::from_toml_str(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        let text = minimal(TWO_TRIGGERS).replace("[filter]", "[filter]\nthreshold = 3");
        assert!(matches!(
            ReportConfig::from_toml_str(&text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overlapping_categories_warn() {
        let text = format!(
            "{}\n{}",
            minimal(TWO_TRIGGERS),
            r#"
[workbook]
[[workbook.categories]]
name = "a"
rule = "not-blank"
columns = ["Block"]

[[workbook.categories]]
name = "b"
rule = "flag-values"
columns = ["Block"]
values = ["X"]
"#
        );
        let config = ReportConfig::from_toml_str(&text).unwrap();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'a' takes priority"));
    }

    #[test]
    fn command_sink_parses() {
        let text = format!(
            "{}\n{}",
            minimal(TWO_TRIGGERS),
            r#"
[sink]
kind = "command"
program = "sqlcmd"
args = ["-Q", "EXEC send '{recipients}'"]
benign_marker = "no results"
"#
        );
        let config = ReportConfig::from_toml_str(&text).unwrap();
        match config.sink {
            SinkConfig::Command {
                program,
                connect_args,
                benign_marker,
                ..
            } => {
                assert_eq!(program, "sqlcmd");
                assert_eq!(connect_args, None);
                assert_eq!(benign_marker.as_deref(), Some("no results"));
            }
            other => panic!("unexpected sink {other:?}"),
        }
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReportConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
