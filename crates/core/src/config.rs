//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services. The
//! core never reads process-wide environment variables itself; binaries read them and hand the
//! raw values to the `*_from_env_value` helpers below, which apply defaults and validation.

use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_SOURCES, PATIENT_INDEX_FILENAME};
use crate::{CoreError, CoreResult};
use hl7vg_types::Hl7Source;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    ignore_missing_non_local_patients: bool,
    sources: Vec<Hl7Source>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] if no sources are given or two sources share an id.
    pub fn new(
        data_dir: PathBuf,
        ignore_missing_non_local_patients: bool,
        sources: Vec<Hl7Source>,
    ) -> CoreResult<Self> {
        if sources.is_empty() {
            return Err(CoreError::InvalidInput(
                "at least one HL7 source must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.id) {
                return Err(CoreError::InvalidInput(format!(
                    "HL7 source id {} is configured more than once",
                    source.id
                )));
            }
        }

        Ok(Self {
            data_dir,
            ignore_missing_non_local_patients,
            sources,
        })
    }

    /// Builds a configuration from raw environment values, applying the defaults and
    /// validation of the `*_from_env_value` helpers.
    pub fn from_env_values(
        data_dir: Option<String>,
        ignore_missing_non_local_patients: Option<String>,
        sources: Option<String>,
    ) -> CoreResult<Self> {
        Self::new(
            data_dir_from_env_value(data_dir),
            ignore_missing_non_local_patients_from_env_value(ignore_missing_non_local_patients)?,
            sources_from_env_value(sources)?,
        )
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn patient_index_path(&self) -> PathBuf {
        self.data_dir.join(PATIENT_INDEX_FILENAME)
    }

    /// Whether a missing patient on a message from a non-local source is dropped silently
    /// instead of being recorded as an error.
    pub fn ignore_missing_non_local_patients(&self) -> bool {
        self.ignore_missing_non_local_patients
    }

    pub fn sources(&self) -> &[Hl7Source] {
        &self.sources
    }

    /// Looks up a configured source by id.
    pub fn source(&self, id: u32) -> CoreResult<&Hl7Source> {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .ok_or(CoreError::UnknownSource(id))
    }
}

/// Resolve the data directory from an optional value, defaulting to [`DEFAULT_DATA_DIR`].
pub fn data_dir_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Parse the ignore-missing-non-local-patients flag.
///
/// `None` or blank means `false`. Only `true` and `false` (any case) are accepted so that a
/// typo is caught at startup rather than silently disabling the policy.
pub fn ignore_missing_non_local_patients_from_env_value(value: Option<String>) -> CoreResult<bool> {
    let value = value
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());

    match value.as_deref() {
        None | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(CoreError::InvalidInput(format!(
            "ignore-missing-non-local-patients must be 'true' or 'false', got '{}'",
            other
        ))),
    }
}

/// Parse the configured sources from a comma-separated `id:name` list.
///
/// If `value` is `None` or blank, [`DEFAULT_SOURCES`] is used.
pub fn sources_from_env_value(value: Option<String>) -> CoreResult<Vec<Hl7Source>> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_SOURCES.to_string());

    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (id, name) = item.split_once(':').ok_or_else(|| {
                CoreError::InvalidInput(format!("HL7 source '{}' must be written as id:name", item))
            })?;
            let id = id.trim().parse::<u32>().map_err(|_| {
                CoreError::InvalidInput(format!("HL7 source id '{}' is not a number", id.trim()))
            })?;
            Hl7Source::new(id, name)
                .map_err(|e| CoreError::InvalidInput(format!("HL7 source {}: {}", id, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_flag_defaults_to_false() {
        assert!(!ignore_missing_non_local_patients_from_env_value(None).unwrap());
        assert!(!ignore_missing_non_local_patients_from_env_value(Some("  ".into())).unwrap());
        assert!(!ignore_missing_non_local_patients_from_env_value(Some("false".into())).unwrap());
    }

    #[test]
    fn ignore_flag_accepts_true_in_any_case() {
        assert!(ignore_missing_non_local_patients_from_env_value(Some("TRUE".into())).unwrap());
    }

    #[test]
    fn ignore_flag_rejects_other_values() {
        let err = ignore_missing_non_local_patients_from_env_value(Some("yes".into()))
            .expect_err("should reject 'yes'");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn sources_default_to_local() {
        let sources = sources_from_env_value(None).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, 1);
        assert!(sources[0].is_local());
    }

    #[test]
    fn sources_parse_list() {
        let sources = sources_from_env_value(Some("1:local, 2:remote-lab".into())).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].name.as_str(), "remote-lab");
    }

    #[test]
    fn sources_reject_malformed_items() {
        assert!(sources_from_env_value(Some("local".into())).is_err());
        assert!(sources_from_env_value(Some("x:local".into())).is_err());
        assert!(sources_from_env_value(Some("1: ".into())).is_err());
    }

    #[test]
    fn config_rejects_duplicate_source_ids() {
        let sources = sources_from_env_value(Some("1:local,1:remote".into())).unwrap();
        let err = CoreConfig::new(PathBuf::from("data"), false, sources)
            .expect_err("duplicate ids should be rejected");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn config_looks_up_sources() {
        let sources = sources_from_env_value(Some("1:local,7:remote-lab".into())).unwrap();
        let cfg = CoreConfig::new(PathBuf::from("data"), true, sources).unwrap();
        assert_eq!(cfg.source(7).unwrap().name.as_str(), "remote-lab");
        assert!(matches!(cfg.source(9), Err(CoreError::UnknownSource(9))));
        assert_eq!(cfg.patient_index_path(), PathBuf::from("data/patients.yaml"));
    }

    #[test]
    fn from_env_values_applies_defaults() {
        let cfg = CoreConfig::from_env_values(None, None, None).unwrap();
        assert_eq!(cfg.data_dir(), Path::new("hl7_data"));
        assert!(!cfg.ignore_missing_non_local_patients());
        assert_eq!(cfg.sources().len(), 1);

        assert!(CoreConfig::from_env_values(None, Some("maybe".into()), None).is_err());
    }

    #[test]
    fn data_dir_defaults() {
        assert_eq!(data_dir_from_env_value(None), PathBuf::from("hl7_data"));
        assert_eq!(
            data_dir_from_env_value(Some("/srv/hl7".into())),
            PathBuf::from("/srv/hl7")
        );
    }
}
