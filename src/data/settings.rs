use std::path::Path;

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// The record describing how a dataset's waveforms were generated.
///
/// Stored as JSON text and decoded with `serde_json`, which only builds data
/// and never evaluates anything. Arbitrary nesting is kept as-is; only
/// `domain_settings` is required.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSettings {
    raw: JsonValue,
}

impl DatasetSettings {
    pub const KEY: &'static str = "settings";

    /// Decode the settings text found in `origin`.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let raw: JsonValue = serde_json::from_str(text)
            .map_err(|e| Error::format(origin, format!("settings are not valid JSON: {e}")))?;
        Self::from_value(raw, origin)
    }

    pub fn from_value(raw: JsonValue, origin: &Path) -> Result<Self> {
        match raw.get("domain_settings") {
            Some(d) if d.is_object() => Ok(Self { raw }),
            Some(_) => Err(Error::schema(origin, "'domain_settings' is not a record")),
            None => Err(Error::schema(origin, "settings lack 'domain_settings'")),
        }
    }

    pub fn domain_settings(&self) -> &JsonValue {
        &self.raw["domain_settings"]
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.raw.get(key)
    }

    pub fn as_json(&self) -> &JsonValue {
        &self.raw
    }

    pub fn to_json_string(&self) -> String {
        self.raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_nested_record() {
        let s = DatasetSettings::parse(
            r#"{"domain_settings": {"type": "FrequencyDomain"},
                "waveform_generator_settings": {"approximant": "IMRPhenomPv2", "f_ref": 20.0}}"#,
            Path::new("x"),
        )
        .unwrap();
        assert_eq!(s.domain_settings()["type"], "FrequencyDomain");
        assert_eq!(
            s.get("waveform_generator_settings").unwrap()["approximant"],
            "IMRPhenomPv2"
        );
    }

    #[test]
    fn python_literals_are_not_evaluated() {
        let err = DatasetSettings::parse("__import__('os').system('true')", Path::new("x"))
            .unwrap_err();
        assert!(matches!(err, Error::FormatError { .. }));
    }

    #[test]
    fn domain_settings_required() {
        let err = DatasetSettings::parse(r#"{"other": 1}"#, Path::new("x")).unwrap_err();
        assert!(matches!(err, Error::SchemaError { .. }));
    }
}
