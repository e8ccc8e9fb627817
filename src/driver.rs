//! Batch fitting of a reduced basis to samples drawn from a dataset.
//!
//! ```text
//!  WaveformDataset ── omit stages ──▶ draw N samples (rayon pool)
//!        │
//!        ▼
//!  training matrix (rows = h_plus / h_cross series)
//!        │
//!        ▼
//!  ReducedBasis::generate_basis ──▶ V{suffix}.npy + V{suffix}.json
//! ```
//!
//! Row order of the training matrix does not change the fitted basis, so
//! samples are collected from workers without any ordering constraint. The
//! metadata sidecar is written only after every basis has been saved, and a
//! failed write removes whatever this run already put on disk.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use nalgebra::DMatrix;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::basis::{ReducedBasis, SvdMethod};
use crate::config::{BasisGenerationSettings, MatrixLayout};
use crate::data::model::{Polarization, Polarizations};
use crate::dataset::WaveformDataset;
use crate::error::{Error, Result};

/// Training matrices with at least this many rows default to the randomized
/// method.
pub const RANDOMIZED_THRESHOLD: usize = 1000;

/// Provenance record written next to the basis files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisMetadata {
    pub rank: usize,
    pub num_samples: usize,
    pub source_dataset: PathBuf,
    pub suffix: String,
    pub method: SvdMethod,
    pub layout: MatrixLayout,
    /// File names of the written bases, relative to the output directory.
    pub basis_files: Vec<String>,
    pub omitted_transforms: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Draw samples from `dataset` with the stages named in `omitted` removed,
/// fit a basis, and write it with a metadata sidecar into `out_dir`.
pub fn generate_and_save_reduced_basis(
    dataset: &WaveformDataset,
    omitted: &[&str],
    settings: &BasisGenerationSettings,
    out_dir: &Path,
) -> Result<BasisMetadata> {
    let clean = dataset.without_transforms(omitted);
    let n = settings.num_samples.min(clean.size());
    if n == 0 {
        return Err(Error::EmptyTrainingData);
    }
    info!(
        "drawing {n} samples from {} ({} of {} transforms active)",
        dataset.table().source().display(),
        clean.transforms().len(),
        dataset.transforms().len()
    );

    let mut indices: Vec<usize> = (0..clean.size()).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(settings.seed));
    indices.truncate(n);

    let waveforms = draw(&clean, &indices, settings.num_workers)?;
    let width = waveforms[0].h_plus.len();
    for w in &waveforms {
        for pol in Polarization::ALL {
            if w.get(pol).len() != width {
                return Err(Error::DimensionMismatch {
                    expected: width,
                    found: w.get(pol).len(),
                });
            }
        }
    }

    let groups: Vec<(String, Vec<Polarization>)> = match settings.layout {
        MatrixLayout::Stacked => vec![(
            format!("V{}", settings.suffix),
            Polarization::ALL.to_vec(),
        )],
        MatrixLayout::PerPolarization => Polarization::ALL
            .iter()
            .map(|&pol| (format!("V_{pol}{}", settings.suffix), vec![pol]))
            .collect(),
    };

    let rows_per_matrix = n * groups[0].1.len();
    let method = settings.method.unwrap_or(if rows_per_matrix >= RANDOMIZED_THRESHOLD {
        SvdMethod::Randomized
    } else {
        SvdMethod::Exact
    });

    // Fit everything before writing anything so a failure leaves no basis.
    let mut fitted = Vec::with_capacity(groups.len());
    for (stem, pols) in &groups {
        let training = training_matrix(&waveforms, pols, width);
        debug!("{stem}: training matrix {}x{}", training.nrows(), training.ncols());
        let mut basis = ReducedBasis::with_options(settings.randomized.clone());
        basis.generate_basis(&training, settings.rank, method)?;
        fitted.push((format!("{stem}.npy"), basis));
    }

    let metadata = BasisMetadata {
        rank: fitted[0].1.rank(),
        num_samples: n,
        source_dataset: dataset.table().source().to_path_buf(),
        suffix: settings.suffix.clone(),
        method,
        layout: settings.layout,
        basis_files: fitted.iter().map(|(f, _)| f.clone()).collect(),
        omitted_transforms: omitted.iter().map(|s| s.to_string()).collect(),
        created_at: Utc::now(),
    };

    fs::create_dir_all(out_dir)?;
    let mut written = Vec::with_capacity(fitted.len() + 1);
    if let Err(e) = write_outputs(out_dir, &fitted, &metadata, &mut written) {
        for path in &written {
            if let Err(cleanup) = fs::remove_file(path) {
                warn!("could not remove {}: {cleanup}", path.display());
            }
        }
        return Err(e);
    }
    info!(
        "wrote rank-{} {} basis ({} samples) to {}",
        metadata.rank,
        method,
        n,
        out_dir.display()
    );
    Ok(metadata)
}

/// Save every basis, then the sidecar, recording each file in `written` as
/// soon as it exists.
fn write_outputs(
    out_dir: &Path,
    fitted: &[(String, ReducedBasis)],
    metadata: &BasisMetadata,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    for (file, basis) in fitted {
        let path = out_dir.join(file);
        basis.save(&path)?;
        written.push(path);
    }
    let meta_path = out_dir.join(format!("V{}.json", metadata.suffix));
    fs::write(&meta_path, serde_json::to_string_pretty(metadata)?)?;
    written.push(meta_path);
    Ok(())
}

/// Evaluate `dataset` at `indices`, in parallel when `workers > 0`.
fn draw(dataset: &WaveformDataset, indices: &[usize], workers: usize) -> Result<Vec<Polarizations>> {
    let fetch = |&i: &usize| dataset.get(i).map(|s| s.waveform);
    if workers == 0 {
        return indices.iter().map(fetch).collect();
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;
    pool.install(|| indices.par_iter().map(fetch).collect())
}

fn training_matrix(
    waveforms: &[Polarizations],
    pols: &[Polarization],
    width: usize,
) -> DMatrix<Complex64> {
    let rows = waveforms.len() * pols.len();
    let mut data = Vec::with_capacity(rows * width);
    for &pol in pols {
        for w in waveforms {
            data.extend_from_slice(w.get(pol));
        }
    }
    DMatrix::from_row_slice(rows, width, &data)
}
