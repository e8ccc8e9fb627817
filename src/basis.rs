//! Reduced-basis compression of frequency-domain waveforms.
//!
//! A training matrix `M` (rows = waveforms, columns = frequency bins) is
//! decomposed as `M = U diag(s) Vh`. The leading `rank` rows of `Vh` span the
//! bulk of the training set, and
//!
//! ```text
//!  project:      coefficients = series @ V        (V = Vh^H, dim x rank)
//!  reconstruct:  series      ~= coefficients @ Vh
//! ```
//!
//! Only `V` is ever persisted; `Vh` is always rederived as its conjugate
//! transpose so the two cannot drift apart.
//!
//! `generate_basis` and `load` take `&mut self` and replace the whole basis.
//! Sharing a basis across threads is read-only; callers that regenerate a
//! basis while others read it must serialise that themselves.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::{debug, info, warn};
use nalgebra::DMatrix;
use num_complex::{Complex32, Complex64};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::config::RandomizedSvdOptions;
use crate::error::{Error, Result};
use crate::npy;

/// Element type of every stored basis matrix, independent of input precision.
pub type BasisScalar = Complex32;

// ---------------------------------------------------------------------------
// SvdMethod
// ---------------------------------------------------------------------------

/// Decomposition strategy for [`ReducedBasis::generate_basis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SvdMethod {
    /// Range-finder SVD that only ever computes `rank` singular vectors.
    #[serde(alias = "random")]
    Randomized,
    /// Full thin SVD, truncated afterwards.
    #[serde(alias = "scipy")]
    Exact,
}

impl SvdMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SvdMethod::Randomized => "randomized",
            SvdMethod::Exact => "exact",
        }
    }
}

impl fmt::Display for SvdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SvdMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" | "randomized" => Ok(SvdMethod::Randomized),
            "exact" | "scipy" => Ok(SvdMethod::Exact),
            _ => Err(Error::UnsupportedMethod {
                method: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ReducedBasis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Matrices {
    v: DMatrix<BasisScalar>,
    vh: DMatrix<BasisScalar>,
}

impl Matrices {
    fn from_v(v: DMatrix<BasisScalar>) -> Self {
        let vh = v.adjoint();
        Self { v, vh }
    }
}

/// An orthonormal basis stored as `V` (dim x rank) and its adjoint `Vh`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedBasis {
    matrices: Option<Matrices>,
    options: RandomizedSvdOptions,
}

impl ReducedBasis {
    /// An empty basis; every consuming operation fails until one is generated
    /// or loaded.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RandomizedSvdOptions) -> Self {
        Self {
            matrices: None,
            options,
        }
    }

    /// Load a basis from a `.npy` file holding `V`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut basis = Self::new();
        basis.load(path)?;
        Ok(basis)
    }

    pub fn from_v(v: DMatrix<BasisScalar>) -> Self {
        Self {
            matrices: Some(Matrices::from_v(v)),
            options: RandomizedSvdOptions::default(),
        }
    }

    pub fn options(&self) -> &RandomizedSvdOptions {
        &self.options
    }

    pub fn is_initialized(&self) -> bool {
        self.matrices.is_some()
    }

    /// Number of basis vectors, or 0 when uninitialised.
    pub fn rank(&self) -> usize {
        self.matrices.as_ref().map_or(0, |m| m.v.ncols())
    }

    /// Length of the physical-domain vectors this basis acts on.
    pub fn dimension(&self) -> usize {
        self.matrices.as_ref().map_or(0, |m| m.v.nrows())
    }

    pub fn v(&self) -> Option<&DMatrix<BasisScalar>> {
        self.matrices.as_ref().map(|m| &m.v)
    }

    pub fn vh(&self) -> Option<&DMatrix<BasisScalar>> {
        self.matrices.as_ref().map(|m| &m.vh)
    }

    fn matrices(&self, operation: &'static str) -> Result<&Matrices> {
        self.matrices
            .as_ref()
            .ok_or(Error::BasisNotInitialized { operation })
    }

    /// Fit a basis of `rank` vectors (0 = all) to the rows of `training`.
    ///
    /// Replaces any stored basis. On error the previous basis is untouched.
    pub fn generate_basis(
        &mut self,
        training: &DMatrix<Complex64>,
        rank: usize,
        method: SvdMethod,
    ) -> Result<()> {
        let (rows, cols) = training.shape();
        if rows == 0 || cols == 0 {
            return Err(Error::EmptyTrainingData);
        }
        let min_dim = rows.min(cols);

        let vh = match method {
            SvdMethod::Randomized => {
                let resolved = if rank == 0 { min_dim } else { rank };
                if resolved >= min_dim {
                    info!(
                        "rank {resolved} covers the full row space of a {rows}x{cols} matrix; \
                         using exact SVD instead of randomized"
                    );
                    exact_right_vectors(training, min_dim)?
                } else {
                    randomized_right_vectors(training, resolved, &self.options)?
                }
            }
            SvdMethod::Exact => {
                let effective = if rank == 0 || rank > min_dim {
                    if rank > min_dim {
                        warn!("requested rank {rank} exceeds available rank {min_dim}; keeping all");
                    }
                    min_dim
                } else {
                    rank
                };
                exact_right_vectors(training, effective)?
            }
        };

        let vh = vh.map(narrow);
        info!(
            "generated {} basis of rank {} from {rows}x{cols} training matrix",
            method,
            vh.nrows()
        );
        self.matrices = Some(Matrices::from_v(vh.adjoint()));
        Ok(())
    }

    /// Like [`generate_basis`](Self::generate_basis) with the method given by
    /// name. An unknown name fails before any work is done.
    pub fn generate_basis_named(
        &mut self,
        training: &DMatrix<Complex64>,
        rank: usize,
        method: &str,
    ) -> Result<()> {
        let method: SvdMethod = method.parse()?;
        self.generate_basis(training, rank, method)
    }

    /// `series @ V` for a batch of row vectors.
    pub fn project(&self, series: &DMatrix<BasisScalar>) -> Result<DMatrix<BasisScalar>> {
        let m = self.matrices("project")?;
        if series.ncols() != m.v.nrows() {
            return Err(Error::DimensionMismatch {
                expected: m.v.nrows(),
                found: series.ncols(),
            });
        }
        Ok(series * &m.v)
    }

    /// `coefficients @ Vh` for a batch of row vectors.
    pub fn reconstruct(&self, coefficients: &DMatrix<BasisScalar>) -> Result<DMatrix<BasisScalar>> {
        let m = self.matrices("reconstruct")?;
        if coefficients.ncols() != m.vh.nrows() {
            return Err(Error::DimensionMismatch {
                expected: m.vh.nrows(),
                found: coefficients.ncols(),
            });
        }
        Ok(coefficients * &m.vh)
    }

    /// Project a single frequency series. The input is narrowed to
    /// [`BasisScalar`] and the coefficients widened back.
    pub fn project_series(&self, series: &[Complex64]) -> Result<Vec<Complex64>> {
        let row = DMatrix::from_iterator(1, series.len(), series.iter().copied().map(narrow));
        Ok(self.project(&row)?.iter().copied().map(widen).collect())
    }

    pub fn reconstruct_series(&self, coefficients: &[Complex64]) -> Result<Vec<Complex64>> {
        let row = DMatrix::from_iterator(
            1,
            coefficients.len(),
            coefficients.iter().copied().map(narrow),
        );
        Ok(self.reconstruct(&row)?.iter().copied().map(widen).collect())
    }

    /// Write `V` to `path`. An uninitialised basis writes nothing and fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let m = self.matrices("save")?;
        npy::write_matrix(path, &m.v)?;
        info!(
            "saved {}x{} basis to {}",
            m.v.nrows(),
            m.v.ncols(),
            path.display()
        );
        Ok(())
    }

    /// Replace the stored basis with `V` read from `path`.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let v = npy::read_matrix(path)?;
        if v.ncols() == 0 || v.nrows() == 0 {
            return Err(Error::format(path, "basis matrix has an empty dimension"));
        }
        debug!("loaded {}x{} basis from {}", v.nrows(), v.ncols(), path.display());
        self.matrices = Some(Matrices::from_v(v));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decompositions
// ---------------------------------------------------------------------------

fn narrow(z: Complex64) -> BasisScalar {
    Complex32::new(z.re as f32, z.im as f32)
}

fn widen(z: BasisScalar) -> Complex64 {
    Complex64::new(z.re as f64, z.im as f64)
}

/// Leading `k` right-singular vectors of `a` as rows, in descending order of
/// singular value.
fn exact_right_vectors(a: &DMatrix<Complex64>, k: usize) -> Result<DMatrix<Complex64>> {
    let svd = a
        .clone()
        .try_svd(false, true, f64::EPSILON, 0)
        .ok_or_else(|| Error::Decomposition {
            reason: format!("SVD of {}x{} matrix did not converge", a.nrows(), a.ncols()),
        })?;
    let v_t = svd.v_t.ok_or_else(|| Error::Decomposition {
        reason: "right singular vectors were not computed".into(),
    })?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&i, &j| svd.singular_values[j].total_cmp(&svd.singular_values[i]));
    order.truncate(k);
    Ok(v_t.select_rows(order.iter()))
}

/// Randomized range finder followed by an exact SVD of the small projected
/// matrix (Halko, Martinsson & Tropp, 2011).
fn randomized_right_vectors(
    a: &DMatrix<Complex64>,
    k: usize,
    options: &RandomizedSvdOptions,
) -> Result<DMatrix<Complex64>> {
    let (rows, cols) = a.shape();
    let min_dim = rows.min(cols);
    let sketch = (k + options.oversamples).min(min_dim);
    let iterations = options.power_iterations_for(k, min_dim);
    debug!("randomized SVD: rank {k}, sketch {sketch}, {iterations} power iterations");

    let mut rng = StdRng::seed_from_u64(options.seed);
    let omega = DMatrix::<Complex64>::from_fn(cols, sketch, |_, _| {
        Complex64::new(rng.sample(StandardNormal), 0.0)
    });

    let a_h = a.adjoint();
    let mut q = (a * omega).qr().q();
    for _ in 0..iterations {
        let z = (&a_h * &q).qr().q();
        q = (a * z).qr().q();
    }

    let b = q.adjoint() * a;
    exact_right_vectors(&b, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Rows are noisy mixtures of a few smooth complex templates.
    fn training_matrix(rows: usize, cols: usize, templates: usize, seed: u64) -> DMatrix<Complex64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let basis: Vec<Vec<Complex64>> = (0..templates)
            .map(|t| {
                (0..cols)
                    .map(|c| {
                        let x = c as f64 / cols as f64;
                        Complex64::from_polar(1.0 / (t as f64 + 1.0), (t as f64 + 1.0) * 6.0 * x)
                    })
                    .collect()
            })
            .collect();
        DMatrix::from_fn(rows, cols, |_, c| {
            (0..templates)
                .map(|t| basis[t][c] * rng.gen_range(-1.0f64..1.0))
                .sum::<Complex64>()
                + Complex64::new(rng.gen_range(-1e-3..1e-3), rng.gen_range(-1e-3..1e-3))
        })
    }

    fn narrowed(m: &DMatrix<Complex64>) -> DMatrix<BasisScalar> {
        m.map(narrow)
    }

    fn reconstruction_error(basis: &ReducedBasis, m: &DMatrix<Complex64>) -> f32 {
        let m = narrowed(m);
        let approx = basis.reconstruct(&basis.project(&m).unwrap()).unwrap();
        (m - approx).norm()
    }

    #[test]
    fn method_names() {
        assert_eq!("random".parse::<SvdMethod>().unwrap(), SvdMethod::Randomized);
        assert_eq!("scipy".parse::<SvdMethod>().unwrap(), SvdMethod::Exact);
        assert_eq!("Exact".parse::<SvdMethod>().unwrap(), SvdMethod::Exact);
        match "bogus".parse::<SvdMethod>() {
            Err(Error::UnsupportedMethod { method }) => assert_eq!(method, "bogus"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn full_rank_exact_reconstructs_training_rows() {
        let m = training_matrix(6, 10, 3, 1);
        let mut basis = ReducedBasis::new();
        basis.generate_basis(&m, 6, SvdMethod::Exact).unwrap();
        assert_eq!(basis.rank(), 6);
        assert_eq!(basis.dimension(), 10);

        for r in 0..m.nrows() {
            let row: Vec<Complex64> = m.row(r).iter().copied().collect();
            let back = basis
                .reconstruct_series(&basis.project_series(&row).unwrap())
                .unwrap();
            for (a, b) in row.iter().zip(&back) {
                assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn exact_rank_is_clamped_and_zero_keeps_all() {
        let m = training_matrix(4, 9, 2, 2);
        let mut basis = ReducedBasis::new();
        basis.generate_basis(&m, 0, SvdMethod::Exact).unwrap();
        assert_eq!(basis.rank(), 4);
        basis.generate_basis(&m, 50, SvdMethod::Exact).unwrap();
        assert_eq!(basis.rank(), 4);
        basis.generate_basis(&m, 2, SvdMethod::Exact).unwrap();
        assert_eq!(basis.rank(), 2);
    }

    #[test]
    fn basis_vectors_are_orthonormal_and_vh_is_adjoint() {
        let m = training_matrix(30, 20, 4, 3);
        for method in [SvdMethod::Exact, SvdMethod::Randomized] {
            let mut basis = ReducedBasis::new();
            basis.generate_basis(&m, 4, method).unwrap();
            let v = basis.v().unwrap();
            assert_eq!(basis.vh().unwrap(), &v.adjoint());
            let gram = v.adjoint() * v;
            let identity = DMatrix::<BasisScalar>::identity(4, 4);
            assert_abs_diff_eq!((gram - identity).norm(), 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn exact_is_no_worse_than_randomized() {
        let m = training_matrix(60, 40, 8, 4);
        for k in [2, 5, 8] {
            let mut exact = ReducedBasis::new();
            exact.generate_basis(&m, k, SvdMethod::Exact).unwrap();
            let mut randomized = ReducedBasis::new();
            randomized.generate_basis(&m, k, SvdMethod::Randomized).unwrap();
            assert_eq!(randomized.rank(), k);

            let e = reconstruction_error(&exact, &m);
            let r = reconstruction_error(&randomized, &m);
            assert!(e <= r + 1e-3 * (1.0 + r), "k={k}: exact {e} > randomized {r}");
        }
    }

    #[test]
    fn randomized_full_rank_falls_back_to_exact() {
        let m = training_matrix(5, 12, 3, 5);
        let mut randomized = ReducedBasis::new();
        randomized.generate_basis(&m, 0, SvdMethod::Randomized).unwrap();
        let mut exact = ReducedBasis::new();
        exact.generate_basis(&m, 0, SvdMethod::Exact).unwrap();
        assert_eq!(randomized, exact);
        assert_eq!(randomized.rank(), 5);
    }

    #[test]
    fn randomized_is_reproducible() {
        let m = training_matrix(40, 30, 5, 6);
        let mut a = ReducedBasis::new();
        let mut b = ReducedBasis::new();
        a.generate_basis(&m, 3, SvdMethod::Randomized).unwrap();
        b.generate_basis(&m, 3, SvdMethod::Randomized).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn project_reconstruct_is_idempotent() {
        let m = training_matrix(20, 16, 6, 7);
        let mut basis = ReducedBasis::new();
        basis.generate_basis(&m, 3, SvdMethod::Exact).unwrap();

        let x = narrowed(&training_matrix(2, 16, 6, 8));
        let once = basis.reconstruct(&basis.project(&x).unwrap()).unwrap();
        let twice = basis.reconstruct(&basis.project(&once).unwrap()).unwrap();
        assert_abs_diff_eq!((once - twice).norm(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn uninitialised_basis_refuses_work() {
        let basis = ReducedBasis::new();
        let x = DMatrix::<BasisScalar>::zeros(1, 4);
        assert!(matches!(
            basis.project(&x),
            Err(Error::BasisNotInitialized { operation: "project" })
        ));
        assert!(matches!(
            basis.reconstruct(&x),
            Err(Error::BasisNotInitialized { operation: "reconstruct" })
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("V.npy");
        assert!(matches!(
            basis.save(&path),
            Err(Error::BasisNotInitialized { operation: "save" })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn wrong_width_is_a_dimension_mismatch() {
        let mut basis = ReducedBasis::new();
        basis
            .generate_basis(&training_matrix(4, 8, 2, 9), 2, SvdMethod::Exact)
            .unwrap();
        let x = DMatrix::<BasisScalar>::zeros(1, 7);
        assert!(matches!(
            basis.project(&x),
            Err(Error::DimensionMismatch { expected: 8, found: 7 })
        ));
    }

    #[test]
    fn bogus_method_leaves_basis_untouched() {
        let m = training_matrix(6, 8, 2, 10);
        let mut basis = ReducedBasis::new();
        basis.generate_basis(&m, 2, SvdMethod::Exact).unwrap();
        let before = basis.clone();

        let err = basis.generate_basis_named(&m, 3, "bogus").unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod { .. }));
        assert_eq!(basis, before);
    }

    #[test]
    fn empty_training_matrix() {
        let mut basis = ReducedBasis::new();
        let err = basis
            .generate_basis(&DMatrix::zeros(0, 5), 1, SvdMethod::Exact)
            .unwrap_err();
        assert!(matches!(err, Error::EmptyTrainingData));
        assert!(!basis.is_initialized());
    }

    #[test]
    fn save_load_round_trip() {
        let m = training_matrix(12, 10, 3, 11);
        let mut basis = ReducedBasis::new();
        basis.generate_basis(&m, 3, SvdMethod::Randomized).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("V.npy");
        basis.save(&path).unwrap();

        let loaded = ReducedBasis::from_file(&path).unwrap();
        assert_eq!(loaded.v(), basis.v());
        assert_eq!(loaded.vh(), basis.vh());
        assert_eq!(loaded.rank(), 3);

        let x = narrowed(&m);
        assert_eq!(loaded.project(&x).unwrap(), basis.project(&x).unwrap());
    }

    #[test]
    fn load_missing_file() {
        let mut basis = ReducedBasis::new();
        assert!(matches!(
            basis.load(Path::new("/nonexistent/V.npy")),
            Err(Error::FileNotFound { .. })
        ));
    }
}
