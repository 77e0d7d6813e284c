//! Constants used throughout the core crate.

/// Default root directory for the filesystem stores when none is configured.
pub const DEFAULT_DATA_DIR: &str = "hl7_data";

/// Sources known to a fresh installation: just this installation itself.
pub const DEFAULT_SOURCES: &str = "1:local";

/// Directory names under the data root, one per record kind.
pub const QUEUE_DIR_NAME: &str = "queue";
pub const ARCHIVE_DIR_NAME: &str = "archive";
pub const ERROR_DIR_NAME: &str = "errors";
pub const OBSERVATION_DIR_NAME: &str = "observations";
pub const ENCOUNTER_DIR_NAME: &str = "encounters";

/// Filename of the JSON document inside each record directory.
pub const RECORD_FILENAME: &str = "record.json";

/// Marker file whose exclusive creation claims a queue entry for processing.
pub const PROCESSING_LOCK_FILENAME: &str = "processing.lock";

/// Patient identifier index, relative to the data root.
pub const PATIENT_INDEX_FILENAME: &str = "patients.yaml";

/// Upper bound on the rendered failure detail stored with an error record.
pub const MAX_ERROR_DETAILS_LEN: usize = 2048;

/// Default number of queue entries drained per processing pass.
pub const DEFAULT_PROCESS_LIMIT: usize = 100;
