//! Notification delivery
//!
//! The mail-dispatch backend is an opaque sink: one session is opened per
//! trigger firing, each message is submitted into it and the session is
//! committed after every submission, whatever the outcome.
//!
//! [`Notifier::deliver`] never fails. What happened is reported as a
//! [`Delivery`] value so callers (and tests) can tell the branches apart.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

// ============================================================================
// Sink Abstraction
// ============================================================================

/// One message handed to the sink
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRequest {
    /// Path of the file to attach, or empty for none
    pub attachment: String,
    pub body: String,
    /// `"; "`-joined primary recipients
    pub recipients: String,
    /// `"; "`-joined copy recipients
    pub copy_recipients: String,
}

/// Sink failure
#[derive(Debug, Error)]
pub enum SinkError {
    /// The dispatch call succeeded but produced no result set for the driver
    #[error("Statement returned no result set")]
    NoResultSet,

    #[error("Cannot connect to notification sink: {0}")]
    Connect(String),

    #[error("{0}")]
    Failed(String),
}

/// Backend able to open delivery sessions
pub trait NotificationSink {
    /// Open a session. A failure here is fatal to the process.
    fn connect(&self) -> Result<Box<dyn SinkSession + '_>, SinkError>;
}

/// An open connection with a pending transaction
pub trait SinkSession {
    fn submit(&mut self, request: &MailRequest) -> Result<(), SinkError>;

    /// Finalize whatever `submit` left pending
    fn commit(&mut self) -> Result<(), SinkError>;
}

// ============================================================================
// Notifier
// ============================================================================

/// Outcome of a delivery attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The sink reported a failure that was logged and swallowed
    Ignored(IgnoredFailure),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoredFailure {
    /// Benign driver condition, not logged as an error
    NoResultSet,
    /// Any other failure, with its detail
    Failed(String),
}

impl Delivery {
    /// True when the message reached the sink (benign condition included)
    pub fn reached_sink(&self) -> bool {
        matches!(
            self,
            Delivery::Delivered | Delivery::Ignored(IgnoredFailure::NoResultSet)
        )
    }
}

/// Routes report and alert messages into a sink session
#[derive(Clone, Debug)]
pub struct Notifier {
    operations_address: String,
}

impl Notifier {
    pub fn new(operations_address: impl Into<String>) -> Self {
        Self {
            operations_address: operations_address.into(),
        }
    }

    pub fn operations_address(&self) -> &str {
        &self.operations_address
    }

    /// Build the request actually handed to the sink.
    ///
    /// The operations contact is an alerting address: messages to it never
    /// carry an attachment.
    pub fn prepare(
        &self,
        attachment: &str,
        body: &str,
        recipients: &str,
        copy_recipients: &str,
    ) -> MailRequest {
        let attachment = if recipients == self.operations_address {
            String::new()
        } else {
            attachment.to_string()
        };
        MailRequest {
            attachment,
            body: body.to_string(),
            recipients: recipients.to_string(),
            copy_recipients: copy_recipients.to_string(),
        }
    }

    /// Submit a message and finalize the session transaction.
    pub fn deliver(
        &self,
        session: &mut dyn SinkSession,
        attachment: &str,
        body: &str,
        recipients: &str,
        copy_recipients: &str,
    ) -> Delivery {
        let request = self.prepare(attachment, body, recipients, copy_recipients);

        let outcome = match session.submit(&request) {
            Ok(()) => Delivery::Delivered,
            Err(SinkError::NoResultSet) => Delivery::Ignored(IgnoredFailure::NoResultSet),
            Err(e) => {
                error!("Error {e}");
                Delivery::Ignored(IgnoredFailure::Failed(e.to_string()))
            }
        };

        if let Err(e) = session.commit() {
            warn!("Commit after delivery failed: {e}");
        }

        if outcome.reached_sink() {
            info!(
                "Email has been successfully sent to the following email address(es). \
                 Recipients: {}, Copy Recipients: {}",
                request.recipients, request.copy_recipients
            );
        }

        outcome
    }

    /// Send a message to the operations contact with no copy recipients
    pub fn alert(&self, session: &mut dyn SinkSession, attachment: &str, body: &str) -> Delivery {
        let ops = self.operations_address.clone();
        self.deliver(session, attachment, body, &ops, "")
    }
}

// ============================================================================
// Tests
// ============================================================================
