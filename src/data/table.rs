use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::loader::{
    read_parameters, read_waveforms, ParameterColumns, PolarizationColumn, BASIS_FILE,
    PARAMETERS_FILE, WAVEFORMS_FILE,
};
use super::model::{Parameters, Polarization, Polarizations, Sample};
use super::settings::DatasetSettings;
use crate::basis::ReducedBasis;
use crate::domain::{build_domain, Domain};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// WaveformTable – the complete loaded dataset
// ---------------------------------------------------------------------------

/// Parameters and polarizations of every sample, loaded once from a dataset
/// bundle and immutable afterwards.
#[derive(Debug)]
pub struct WaveformTable {
    source: PathBuf,
    parameters: ParameterColumns,
    h_plus: PolarizationColumn,
    h_cross: PolarizationColumn,
    basis: Option<ReducedBasis>,
    settings: DatasetSettings,
    domain: Box<dyn Domain>,
}

impl WaveformTable {
    /// Load the bundle at `path`. See [`crate::data`] for its layout.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        if !path.is_dir() {
            return Err(Error::format(path, "dataset bundle must be a directory"));
        }

        let parameters = read_parameters(&path.join(PARAMETERS_FILE))?;
        let waveforms = read_waveforms(&path.join(WAVEFORMS_FILE))?;

        if parameters.names.is_empty() {
            return Err(Error::schema(path, "parameter region has no columns"));
        }
        if parameters.rows != waveforms.h_plus.rows {
            return Err(Error::schema(
                path,
                format!(
                    "{} parameter rows but {} waveform rows",
                    parameters.rows, waveforms.h_plus.rows
                ),
            ));
        }
        if waveforms.h_plus.stride != waveforms.h_cross.stride {
            return Err(Error::schema(
                path,
                format!(
                    "h_plus has {} bins but h_cross has {}",
                    waveforms.h_plus.stride, waveforms.h_cross.stride
                ),
            ));
        }

        let settings_text = waveforms.settings.as_deref().ok_or_else(|| {
            Error::schema(
                path.join(WAVEFORMS_FILE),
                format!("no '{}' metadata entry", DatasetSettings::KEY),
            )
        })?;
        let settings = DatasetSettings::parse(settings_text, &path.join(WAVEFORMS_FILE))?;
        let domain = build_domain(settings.domain_settings())?;

        let stride = waveforms.h_plus.stride;
        let basis_path = path.join(BASIS_FILE);
        let basis = if basis_path.exists() {
            let basis = ReducedBasis::from_file(&basis_path)?;
            if parameters.rows > 0 && basis.dimension() != stride {
                return Err(Error::schema(
                    &basis_path,
                    format!(
                        "embedded basis acts on {} bins but waveforms have {stride}",
                        basis.dimension()
                    ),
                ));
            }
            debug!("dataset carries an embedded basis of rank {}", basis.rank());
            Some(basis)
        } else {
            None
        };

        if parameters.rows > 0 && stride != domain.len() {
            warn!(
                "waveforms have {stride} bins but the {} has {}",
                domain.name(),
                domain.len()
            );
        }

        info!(
            "loaded {} samples ({} parameters, {stride} bins) from {}",
            parameters.rows,
            parameters.names.len(),
            path.display()
        );

        Ok(Self {
            source: path.to_path_buf(),
            parameters,
            h_plus: waveforms.h_plus,
            h_cross: waveforms.h_cross,
            basis,
            settings,
            domain,
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.parameters.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The sample at `index`, exactly as stored.
    pub fn get(&self, index: usize) -> Result<Sample> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let parameters: Parameters = self
            .parameters
            .names
            .iter()
            .zip(&self.parameters.columns)
            .map(|(name, column)| (name.clone(), column[index]))
            .collect();
        Ok(Sample {
            parameters,
            waveform: Polarizations {
                h_plus: self.h_plus.row(index).to_vec(),
                h_cross: self.h_cross.row(index).to_vec(),
            },
        })
    }

    /// Parameter column names in file order.
    pub fn parameter_names(&self) -> &[String] {
        &self.parameters.names
    }

    /// Number of bins per stored waveform vector.
    pub fn waveform_len(&self) -> usize {
        self.h_plus.stride
    }

    /// Embedded legacy basis, applied at read time by the dataset accessor.
    pub fn basis(&self) -> Option<&ReducedBasis> {
        self.basis.as_ref()
    }

    pub fn settings(&self) -> &DatasetSettings {
        &self.settings
    }

    pub fn domain(&self) -> &dyn Domain {
        self.domain.as_ref()
    }

    /// Path the table was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Per-column types and memory footprint.
    pub fn describe(&self) -> TableSummary {
        let rows = self.len();
        let mut columns: Vec<ColumnSummary> = self
            .parameters
            .names
            .iter()
            .map(|name| ColumnSummary {
                region: "parameters",
                name: name.clone(),
                dtype: "float64".to_string(),
                non_null: rows,
                bytes: rows * std::mem::size_of::<f64>(),
            })
            .collect();
        for pol in Polarization::ALL {
            let column = match pol {
                Polarization::HPlus => &self.h_plus,
                Polarization::HCross => &self.h_cross,
            };
            columns.push(ColumnSummary {
                region: "waveform_polarizations",
                name: pol.as_str().to_string(),
                dtype: format!("complex128[{}]", column.stride),
                non_null: column.rows,
                bytes: std::mem::size_of_val(column.data.as_slice()),
            });
        }
        TableSummary {
            source: self.source.clone(),
            rows,
            columns,
            basis_rank: self.basis.as_ref().map(ReducedBasis::rank),
        }
    }
}

// ---------------------------------------------------------------------------
// TableSummary – describe() output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub region: &'static str,
    pub name: String,
    pub dtype: String,
    pub non_null: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSummary {
    pub source: PathBuf,
    pub rows: usize,
    pub columns: Vec<ColumnSummary>,
    pub basis_rank: Option<usize>,
}

impl TableSummary {
    pub fn total_bytes(&self) -> usize {
        self.columns.iter().map(|c| c.bytes).sum()
    }
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "WaveformTable: {}", self.source.display())?;
        writeln!(f, "{} entries", self.rows)?;
        writeln!(
            f,
            " #  {:<24} {:<24} {:>10} {:<18} {:>12}",
            "Region", "Column", "Non-Null", "Dtype", "Bytes"
        )?;
        for (i, c) in self.columns.iter().enumerate() {
            writeln!(
                f,
                "{i:>2}  {:<24} {:<24} {:>10} {:<18} {:>12}",
                c.region, c.name, c.non_null, c.dtype, c.bytes
            )?;
        }
        if let Some(rank) = self.basis_rank {
            writeln!(f, "embedded basis rank: {rank}")?;
        }
        write!(f, "memory usage: {} bytes", self.total_bytes())
    }
}
