//! Fatal-vs-skippable classification of processing failures.

use crate::config::CoreConfig;
use crate::error::{Hl7Error, ParseCause};
use crate::model::QueueEntry;

/// What to do with a failed queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Drop the entry without recording an error.
    Skippable,
    /// Record the failure for operator review.
    Fatal,
}

/// Decides whether a failure is recorded or dropped.
///
/// The only skippable failure is a message from a non-local source whose patient cannot be
/// resolved, and only when the installation opts in through
/// [`CoreConfig::ignore_missing_non_local_patients`]. Such messages are expected when a remote
/// sender shares results for patients this installation does not hold.
#[derive(Clone, Copy, Debug)]
pub struct ErrorClassifier {
    ignore_missing_non_local_patients: bool,
}

impl ErrorClassifier {
    pub fn new(cfg: &CoreConfig) -> Self {
        Self {
            ignore_missing_non_local_patients: cfg.ignore_missing_non_local_patients(),
        }
    }

    pub fn classify(&self, error: &Hl7Error, entry: &QueueEntry) -> Classification {
        let patient_missing = matches!(
            error.parse_cause(),
            Some(ParseCause::PatientNotResolved { .. })
        );

        if patient_missing && !entry.source.is_local() && self.ignore_missing_non_local_patients {
            Classification::Skippable
        } else {
            Classification::Fatal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl7vg_types::Hl7Source;
    use std::path::PathBuf;

    fn classifier(ignore: bool) -> ErrorClassifier {
        let sources = vec![
            Hl7Source::new(1, "local").unwrap(),
            Hl7Source::new(2, "remote-lab").unwrap(),
        ];
        ErrorClassifier::new(&CoreConfig::new(PathBuf::from("data"), ignore, sources).unwrap())
    }

    fn entry(source: &str) -> QueueEntry {
        QueueEntry::new(
            "MSH|".into(),
            Hl7Source::new(2, source).unwrap(),
            Some("K1".into()),
        )
    }

    fn patient_missing() -> Hl7Error {
        Hl7Error::parse(
            "Could not resolve patient",
            ParseCause::PatientNotResolved {
                identifiers: "3".into(),
            },
        )
    }

    #[test]
    fn missing_patient_from_remote_source_is_skipped_when_enabled() {
        assert_eq!(
            classifier(true).classify(&patient_missing(), &entry("remote-lab")),
            Classification::Skippable
        );
    }

    #[test]
    fn missing_patient_is_fatal_when_disabled() {
        assert_eq!(
            classifier(false).classify(&patient_missing(), &entry("remote-lab")),
            Classification::Fatal
        );
    }

    #[test]
    fn missing_patient_from_local_source_is_always_fatal() {
        assert_eq!(
            classifier(true).classify(&patient_missing(), &entry("local")),
            Classification::Fatal
        );
    }

    #[test]
    fn other_failures_are_fatal() {
        let classifier = classifier(true);
        let remote = entry("remote-lab");

        let wire = Hl7Error::parse(
            "Trouble parsing",
            ParseCause::Wire(hl7_wire::WireError::Empty),
        );
        let no_route = Hl7Error::NoRoute {
            message_name: "ADT_A04".into(),
        };
        let bare_parse = Hl7Error::Parse {
            message: "Could not resolve patient".into(),
            cause: None,
        };

        for error in [wire, no_route, bare_parse] {
            assert_eq!(classifier.classify(&error, &remote), Classification::Fatal);
        }
    }
}
