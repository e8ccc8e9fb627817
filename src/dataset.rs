use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::data::model::{Polarization, Sample};
use crate::data::table::WaveformTable;
use crate::error::{Error, Result};
use crate::transform::Transform;

// ---------------------------------------------------------------------------
// WaveformDataset – randomly indexable, lazily materialised samples
// ---------------------------------------------------------------------------

/// Serves training samples from a [`WaveformTable`].
///
/// `get` builds each sample on demand: raw row, then projection through the
/// table's embedded basis (if any), then every transform in order. The table
/// is shared and never mutated, so concurrent `get` calls are safe.
#[derive(Clone)]
pub struct WaveformDataset {
    table: Arc<WaveformTable>,
    transforms: Vec<Arc<dyn Transform>>,
}

impl WaveformDataset {
    pub fn new(table: impl Into<Arc<WaveformTable>>) -> Self {
        Self::with_transforms(table, Vec::new())
    }

    pub fn with_transforms(
        table: impl Into<Arc<WaveformTable>>,
        transforms: Vec<Arc<dyn Transform>>,
    ) -> Self {
        Self {
            table: table.into(),
            transforms,
        }
    }

    /// Load a bundle and wrap it without transforms.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(WaveformTable::load(path)?))
    }

    pub fn push_transform(&mut self, transform: Arc<dyn Transform>) {
        self.transforms.push(transform);
    }

    /// A dataset over the same table whose chain skips every stage named in
    /// `omitted`.
    pub fn without_transforms(&self, omitted: &[&str]) -> Self {
        let transforms = self
            .transforms
            .iter()
            .filter(|t| !omitted.contains(&t.name()))
            .cloned()
            .collect();
        Self {
            table: Arc::clone(&self.table),
            transforms,
        }
    }

    pub fn table(&self) -> &WaveformTable {
        &self.table
    }

    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.transforms
    }

    /// Number of samples; always the table's length.
    pub fn size(&self) -> usize {
        self.table.len()
    }

    pub fn get(&self, index: usize) -> Result<Sample> {
        let mut sample = self.table.get(index)?;

        if let Some(basis) = self.table.basis() {
            for pol in Polarization::ALL {
                let coefficients = basis.project_series(sample.waveform.get(pol))?;
                *sample.waveform.get_mut(pol) = coefficients;
            }
        }

        for transform in &self.transforms {
            sample = transform.apply(sample).map_err(|e| match e {
                Error::Transform { .. } => e,
                other => Error::Transform {
                    stage: transform.name().to_string(),
                    reason: other.to_string(),
                },
            })?;
        }
        Ok(sample)
    }
}

impl fmt::Debug for WaveformDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.transforms.iter().map(|t| t.name()).collect();
        f.debug_struct("WaveformDataset")
            .field("source", &self.table.source())
            .field("size", &self.size())
            .field("transforms", &names)
            .finish()
    }
}
