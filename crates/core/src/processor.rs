//! The queue processor: lifecycle of a single queue entry.
//!
//! ```text
//! Pending -> Processing -> Archived | Skipped | Errored
//! ```
//!
//! Every terminal outcome removes the entry from the queue. Failures while parsing or handling
//! the message never reach the caller: they are classified and then either dropped or captured
//! as an [`ErrorEntry`]. The caller only sees duplicate-processing rejections and failures of
//! the stores that record the outcome.

use crate::classifier::{Classification, ErrorClassifier};
use crate::constants::MAX_ERROR_DETAILS_LEN;
use crate::error::{Hl7Error, ParseCause};
use crate::model::{ArchiveEntry, ErrorEntry, QueueEntry, QueueState};
use crate::router::MessageRouter;
use crate::store::{ArchiveStore, ErrorStore, QueueStore};
use crate::{CoreError, CoreResult};
use hl7_wire::Message;
use std::collections::HashSet;
use std::sync::Arc;

/// Turns raw queue text into a structured message.
pub trait MessageParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Message, Hl7Error>;
}

/// Parser for pipe-delimited HL7 v2 text.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipeParser;

impl MessageParser for PipeParser {
    fn parse(&self, raw: &str) -> Result<Message, Hl7Error> {
        Message::parse(raw)
            .map_err(|e| Hl7Error::parse("Unable to parse HL7 message", ParseCause::Wire(e)))
    }
}

/// Terminal outcome of processing one entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Archived,
    Skipped,
    Errored,
}

/// A queue entry together with what became of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedEntry {
    pub entry: QueueEntry,
    pub disposition: Disposition,
}

pub struct QueueProcessor {
    queue: Arc<dyn QueueStore>,
    archive: Arc<dyn ArchiveStore>,
    errors: Arc<dyn ErrorStore>,
    parser: Arc<dyn MessageParser>,
    router: Arc<MessageRouter>,
    classifier: ErrorClassifier,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        archive: Arc<dyn ArchiveStore>,
        errors: Arc<dyn ErrorStore>,
        parser: Arc<dyn MessageParser>,
        router: Arc<MessageRouter>,
        classifier: ErrorClassifier,
    ) -> Self {
        Self {
            queue,
            archive,
            errors,
            parser,
            router,
            classifier,
        }
    }

    /// Processes one queue entry to a terminal disposition.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateProcessing`] if the entry is already being processed. Nothing is
    ///   written in that case.
    /// - Any store error raised while claiming the entry or recording its outcome.
    pub fn process(&self, mut entry: QueueEntry) -> CoreResult<ProcessedEntry> {
        if entry.state == QueueState::Processing {
            tracing::warn!(
                "rejecting queue entry {} (key={}): already processing",
                entry.id,
                entry.key()
            );
            return Err(CoreError::DuplicateProcessing {
                id: entry.id,
                key: entry.key(),
            });
        }

        self.queue.begin_processing(&mut entry)?;
        tracing::debug!("processing queue entry {} from source {}", entry.id, entry.source);

        let disposition = match self.handle(&entry) {
            Ok(()) => {
                self.queue.delete(&entry.id)?;
                tracing::info!("archived HL7 message {}", entry.key());
                Disposition::Archived
            }
            Err(error) => match self.classifier.classify(&error, &entry) {
                Classification::Skippable => {
                    tracing::warn!(
                        "skipping HL7 message {} from source {}: {}",
                        entry.key(),
                        entry.source,
                        error
                    );
                    self.queue.delete(&entry.id)?;
                    Disposition::Skipped
                }
                Classification::Fatal => {
                    self.capture_fatal(&entry, &error)?;
                    Disposition::Errored
                }
            },
        };

        Ok(ProcessedEntry { entry, disposition })
    }

    /// Processes up to `limit` pending entries, oldest first.
    ///
    /// Entries another processor claims first are logged and passed over. The pass stops early
    /// if the store offers an entry it has already offered, so an entry that can never be
    /// claimed does not spin the loop.
    pub fn process_pending(&self, limit: usize) -> CoreResult<Vec<ProcessedEntry>> {
        let mut processed = Vec::new();
        let mut seen = HashSet::new();
        for _ in 0..limit {
            let Some(entry) = self.queue.next_pending()? else {
                break;
            };
            if !seen.insert(entry.id) {
                tracing::warn!(
                    "queue entry {} (key={}) is still pending after a claim attempt; ending pass",
                    entry.id,
                    entry.key()
                );
                break;
            }
            match self.process(entry) {
                Ok(done) => processed.push(done),
                Err(CoreError::DuplicateProcessing { id, key }) => {
                    tracing::warn!("queue entry {} (key={}) was claimed elsewhere", id, key);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(processed)
    }

    /// Parses, routes and archives the entry.
    fn handle(&self, entry: &QueueEntry) -> Result<(), Hl7Error> {
        let message = self.parser.parse(&entry.data)?;
        self.router.dispatch(&message)?;
        self.archive
            .save(&ArchiveEntry::from_queue_entry(entry))
            .map_err(|e| Hl7Error::unclassified("Unable to archive HL7 message", e))
    }

    fn capture_fatal(&self, entry: &QueueEntry, error: &Hl7Error) -> CoreResult<()> {
        let summary = if error.is_message_failure() {
            format!("Trouble parsing HL7 message ({})", entry.key())
        } else {
            format!(
                "Exception while attempting to process HL7 queue entry ({})",
                entry.key()
            )
        };
        let details = render_error_details(error);
        tracing::error!("{}: {}", summary, details);

        self.errors
            .save(&ErrorEntry::from_queue_entry(entry, summary, details))?;
        self.queue.delete(&entry.id)
    }
}

/// Renders an error and its cause chain, one cause per line, bounded to
/// [`MAX_ERROR_DETAILS_LEN`] bytes.
pub fn render_error_details(error: &(dyn std::error::Error + 'static)) -> String {
    let mut details = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        details.push_str("\ncaused by: ");
        details.push_str(&cause.to_string());
        source = cause.source();
    }
    truncate_details(details)
}

fn truncate_details(mut details: String) -> String {
    const ELLIPSIS: &str = "...";
    if details.len() <= MAX_ERROR_DETAILS_LEN {
        return details;
    }
    let mut end = MAX_ERROR_DETAILS_LEN - ELLIPSIS.len();
    while !details.is_char_boundary(end) {
        end -= 1;
    }
    details.truncate(end);
    details.push_str(ELLIPSIS);
    details
}
