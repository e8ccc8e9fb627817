//! Physical domains over which waveforms are sampled.

use std::fmt;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// The grid a waveform is sampled on. The core only relies on its length.
pub trait Domain: fmt::Debug + Send + Sync {
    /// Number of bins in a waveform vector on this domain.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name used in logs and summaries.
    fn name(&self) -> &'static str;
}

/// Uniformly spaced frequency bins `0, delta_f, 2 delta_f, ..., f_max`.
/// Bins below `f_min` are kept (zero-padded) so indices equal `f / delta_f`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrequencyDomain {
    pub f_min: f64,
    pub f_max: f64,
    pub delta_f: f64,
}

impl FrequencyDomain {
    pub fn new(f_min: f64, f_max: f64, delta_f: f64) -> Result<Self> {
        let domain = Self {
            f_min,
            f_max,
            delta_f,
        };
        domain.validate()?;
        Ok(domain)
    }

    fn validate(&self) -> Result<()> {
        if !(self.delta_f > 0.0 && self.f_min >= 0.0 && self.f_max >= self.f_min) {
            return Err(Error::schema(
                "domain_settings",
                format!(
                    "invalid frequency domain f_min={} f_max={} delta_f={}",
                    self.f_min, self.f_max, self.delta_f
                ),
            ));
        }
        let bins = self.f_max / self.delta_f;
        if !bins.is_finite() || bins >= usize::MAX as f64 {
            return Err(Error::schema(
                "domain_settings",
                format!(
                    "frequency domain spacing delta_f={} is too fine for f_max={}",
                    self.delta_f, self.f_max
                ),
            ));
        }
        Ok(())
    }

    pub fn sample_frequencies(&self) -> Vec<f64> {
        (0..self.len()).map(|i| i as f64 * self.delta_f).collect()
    }

    /// `true` for bins at or above `f_min`.
    pub fn frequency_mask(&self) -> Vec<bool> {
        self.sample_frequencies()
            .into_iter()
            .map(|f| f >= self.f_min)
            .collect()
    }

    /// Per-bin standard deviation of unit-PSD white noise.
    pub fn noise_std(&self) -> f64 {
        1.0 / (4.0 * self.delta_f).sqrt()
    }
}

impl Domain for FrequencyDomain {
    fn len(&self) -> usize {
        (self.f_max / self.delta_f).floor() as usize + 1
    }

    fn name(&self) -> &'static str {
        "FrequencyDomain"
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "kwargs")]
enum DomainSettings {
    #[serde(alias = "UniformFrequencyDomain")]
    FrequencyDomain(FrequencyDomain),
}

/// Build the domain described by a `domain_settings` record, e.g.
/// `{"type": "FrequencyDomain", "kwargs": {"f_min": 20, "f_max": 1024, "delta_f": 0.125}}`.
pub fn build_domain(settings: &JsonValue) -> Result<Box<dyn Domain>> {
    let parsed = DomainSettings::deserialize(settings)
        .map_err(|e| Error::schema("domain_settings", e.to_string()))?;
    match parsed {
        DomainSettings::FrequencyDomain(domain) => {
            domain.validate()?;
            Ok(Box::new(domain))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn frequency_domain_grid() {
        let d = FrequencyDomain::new(20.0, 1024.0, 0.125).unwrap();
        assert_eq!(d.len(), 8193);
        let f = d.sample_frequencies();
        assert_relative_eq!(f[160], 20.0);
        let mask = d.frequency_mask();
        assert!(!mask[159]);
        assert!(mask[160]);
        assert_relative_eq!(d.noise_std(), 1.0 / 0.5f64.sqrt());
    }

    #[test]
    fn builds_from_settings() {
        let domain = build_domain(&json!({
            "type": "UniformFrequencyDomain",
            "kwargs": {"f_min": 10.0, "f_max": 20.0, "delta_f": 1.0}
        }))
        .unwrap();
        assert_eq!(domain.len(), 21);
        assert_eq!(domain.name(), "FrequencyDomain");
    }

    #[test]
    fn unknown_domain_type() {
        let err = build_domain(&json!({"type": "TimeDomain", "kwargs": {}})).unwrap_err();
        assert!(matches!(err, Error::SchemaError { .. }));
    }

    #[test]
    fn invalid_spacing() {
        let err = build_domain(&json!({
            "type": "FrequencyDomain",
            "kwargs": {"f_min": 10.0, "f_max": 20.0, "delta_f": 0.0}
        }))
        .unwrap_err();
        assert!(matches!(err, Error::SchemaError { .. }));
    }

    #[test]
    fn subnormal_spacing_is_rejected() {
        let err = build_domain(&json!({
            "type": "FrequencyDomain",
            "kwargs": {"f_min": 0.0, "f_max": 1.0, "delta_f": 1e-320}
        }))
        .unwrap_err();
        assert!(matches!(err, Error::SchemaError { .. }));
        assert!(FrequencyDomain::new(0.0, 1e300, 1e-300).is_err());
    }
}
