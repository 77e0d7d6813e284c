//! Small validated value types shared by the HL7 value-groups crates.

use serde::{Deserialize, Serialize};

/// Name of the source that identifies messages produced by this installation.
pub const LOCAL_SOURCE_NAME: &str = "local";

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input contained characters that are not allowed for this type
    #[error("Text contains invalid characters: {0}")]
    InvalidCharacters(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText`, returning [`TextError::Empty`] if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A system that submits HL7 messages into the inbound queue.
///
/// Sources are configured at startup and referenced by numeric id when a message is enqueued.
/// The source named [`LOCAL_SOURCE_NAME`] is this installation itself; failures on its messages
/// are always recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StoredSource")]
pub struct Hl7Source {
    pub id: u32,
    pub name: NonEmptyText,
}

/// Unvalidated shape of a stored [`Hl7Source`].
#[derive(Deserialize)]
struct StoredSource {
    id: u32,
    name: String,
}

impl TryFrom<StoredSource> for Hl7Source {
    type Error = TextError;

    fn try_from(stored: StoredSource) -> Result<Self, Self::Error> {
        Hl7Source::new(stored.id, stored.name)
    }
}

impl Hl7Source {
    pub fn new(id: u32, name: impl AsRef<str>) -> Result<Self, TextError> {
        let name = NonEmptyText::new(name)?;
        if name.as_str().contains([',', ':']) {
            return Err(TextError::InvalidCharacters(name.to_string()));
        }
        Ok(Self { id, name })
    }

    /// Returns true if this is the installation's own source.
    pub fn is_local(&self) -> bool {
        self.name.as_str() == LOCAL_SOURCE_NAME
    }
}

impl std::fmt::Display for Hl7Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  remote-lab \n").expect("valid text");
        assert_eq!(text.as_str(), "remote-lab");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new("   ").unwrap_err(), TextError::Empty);
    }

    #[test]
    fn deserialize_rejects_empty_text() {
        let result: Result<NonEmptyText, _> = serde_json::from_str("\"  \"");
        assert!(result.is_err());
    }

    #[test]
    fn only_the_exact_local_name_is_local() {
        assert!(Hl7Source::new(1, "local").unwrap().is_local());
        assert!(!Hl7Source::new(2, "LOCAL").unwrap().is_local());
        assert!(!Hl7Source::new(3, "remote-lab").unwrap().is_local());
    }

    #[test]
    fn deserialize_applies_source_name_rules() {
        let source: Hl7Source =
            serde_json::from_str(r#"{"id":2,"name":" remote-lab "}"#).expect("valid source");
        assert_eq!(source, Hl7Source::new(2, "remote-lab").unwrap());

        for bad in [r#"{"id":3,"name":"a,b"}"#, r#"{"id":3,"name":"a:b"}"#, r#"{"id":3,"name":" "}"#] {
            let result: Result<Hl7Source, _> = serde_json::from_str(bad);
            assert!(result.is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn source_name_rejects_list_separators() {
        let err = Hl7Source::new(4, "a:b").expect_err("colon is reserved");
        assert!(matches!(err, TextError::InvalidCharacters(_)));
    }
}
