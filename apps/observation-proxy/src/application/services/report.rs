//! Spot Report Collector
//!
//! Accepts externally submitted reports, resolves their location source to
//! a fix, attaches an optional JPEG image and publishes the result on the
//! dedicated `spot_report_data` output.
//!
//! Submissions arrive either directly through [`ReportCollector::submit`]
//! or as [`ReportRequest`]s over an mpsc channel consumed by
//! [`ReportCollector::run`]; each request is answered on its own oneshot.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{ImageError, ImagePort, LocationError, LocationPort};
use crate::domain::report::{
    ReportSubmission, SPOT_REPORT_OUTPUT, build_spot_report, spot_report_schema,
};
use crate::infrastructure::broadcast::{OutputError, OutputHub, SharedOutput};
use crate::infrastructure::metrics;

/// Report could not be turned into a record.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReportError {
    /// Location source unknown or without fix.
    #[error(transparent)]
    Location(#[from] LocationError),

    /// Referenced image could not be loaded.
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// A report accepted and published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedReport {
    /// Generated report identifier.
    pub report_id: String,
    /// Whether an image was attached.
    pub has_image: bool,
}

/// Answer to a queued report request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Report published.
    Accepted(SubmittedReport),
    /// Report rejected.
    Rejected {
        /// Why the report was rejected.
        reason: String,
    },
}

/// A queued submission with an optional reply channel.
#[derive(Debug)]
pub struct ReportRequest {
    /// The submission.
    pub submission: ReportSubmission,
    /// Where to send the outcome.
    pub reply: Option<oneshot::Sender<ReportOutcome>>,
}

/// Publishes spot reports on their own output.
pub struct ReportCollector {
    location: Arc<dyn LocationPort>,
    images: Arc<dyn ImagePort>,
    output: SharedOutput,
}

impl ReportCollector {
    /// Register the `spot_report_data` output and create the collector.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::DuplicateName`] if the output already exists.
    pub fn new(
        hub: &OutputHub,
        location: Arc<dyn LocationPort>,
        images: Arc<dyn ImagePort>,
    ) -> Result<Self, OutputError> {
        let output = hub.register(SPOT_REPORT_OUTPUT, spot_report_schema())?;
        Ok(Self {
            location,
            images,
            output,
        })
    }

    /// Name of the report output.
    #[must_use]
    pub fn output_name(&self) -> &str {
        self.output.name()
    }

    /// Build and publish one report.
    ///
    /// # Errors
    ///
    /// Fails if the location source has no fix or the image cannot be loaded;
    /// nothing is published in that case.
    #[tracing::instrument(skip_all, fields(category = %submission.category, source = %submission.location_source))]
    pub async fn submit(&self, submission: &ReportSubmission) -> Result<SubmittedReport, ReportError> {
        let fix = self.location.last_known(&submission.location_source)?;

        let image = match submission.image_reference.as_deref() {
            Some(reference) => Some(self.images.load_jpeg(reference).await?),
            None => None,
        };

        let report_id = Uuid::new_v4().to_string();
        let has_image = image.is_some();
        let record = build_spot_report(&report_id, submission, &fix, image);
        let reached = self.output.publish(record);
        metrics::record_republished(self.output.name(), reached);

        tracing::info!(report_id = %report_id, has_image, "Spot report published");
        Ok(SubmittedReport {
            report_id,
            has_image,
        })
    }

    /// Serve queued requests until cancelled or the channel closes.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ReportRequest>, cancel: CancellationToken) {
        loop {
            let request = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Report collector cancelled");
                    break;
                }
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let outcome = match self.submit(&request.submission).await {
                Ok(report) => {
                    metrics::record_report("accepted");
                    ReportOutcome::Accepted(report)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Spot report rejected");
                    metrics::record_report("rejected");
                    ReportOutcome::Rejected {
                        reason: e.to_string(),
                    }
                }
            };

            if let Some(reply) = request.reply {
                // Caller may have given up waiting.
                let _ = reply.send(outcome);
            }
        }
    }
}
