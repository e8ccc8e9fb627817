//! Reduced-basis compression and per-sample access for simulated
//! gravitational-wave waveform datasets.
//!
//! ```text
//!  dataset bundle ──▶ WaveformTable ──▶ WaveformDataset::get(i)
//!                                          │  raw row
//!                                          │  embedded basis projection (optional)
//!                                          │  transform chain
//!                                          ▼
//!                                        Sample
//!
//!  WaveformDataset ──▶ driver ──▶ ReducedBasis ──▶ V.npy
//! ```

pub mod basis;
pub mod config;
pub mod data;
pub mod dataset;
pub mod domain;
pub mod driver;
pub mod error;
pub mod npy;
pub mod transform;

pub use basis::{BasisScalar, ReducedBasis, SvdMethod};
pub use config::{BasisGenerationSettings, MatrixLayout, RandomizedSvdOptions};
pub use data::model::{Parameters, Polarization, Polarizations, Sample};
pub use data::settings::DatasetSettings;
pub use data::table::{TableSummary, WaveformTable};
pub use dataset::WaveformDataset;
pub use domain::{build_domain, Domain, FrequencyDomain};
pub use driver::{generate_and_save_reduced_basis, BasisMetadata};
pub use error::{Error, Result};
pub use transform::{transform_name, Transform};
