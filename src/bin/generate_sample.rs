use std::f64::consts::PI;
use std::path::PathBuf;

use anyhow::{Context, Result};
use gw_reduced_basis::data::writer::write_dataset;
use gw_reduced_basis::{Domain, DatasetSettings, FrequencyDomain, Polarizations, Sample};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

/// Solar mass in seconds (G M_sun / c^3).
const MTSUN_SI: f64 = 4.925_491_025_543_576e-6;

const NUM_SAMPLES: usize = 200;

/// Leading-order stationary-phase inspiral with an effective-spin phase term.
fn chirp(domain: &FrequencyDomain, m1: f64, m2: f64, chi_eff: f64, phase: f64) -> Polarizations {
    let total = m1 + m2;
    let eta = m1 * m2 / (total * total);
    let chirp_mass = total * eta.powf(0.6) * MTSUN_SI;
    let m_sec = total * MTSUN_SI;
    let inclination_plus = 0.75;
    let inclination_cross = 0.5;

    let mut h_plus = Vec::with_capacity(domain.len());
    let mut h_cross = Vec::with_capacity(domain.len());
    for (f, keep) in domain
        .sample_frequencies()
        .into_iter()
        .zip(domain.frequency_mask())
    {
        if !keep {
            h_plus.push(Complex64::new(0.0, 0.0));
            h_cross.push(Complex64::new(0.0, 0.0));
            continue;
        }
        let v = (PI * m_sec * f).cbrt();
        let psi = -phase - PI / 4.0
            + 3.0 / 128.0 * (PI * chirp_mass * f).powf(-5.0 / 3.0)
                * (1.0 + (113.0 / 3.0 * chi_eff - 16.0 * PI) * v.powi(3));
        let amplitude = 1e-21 * (total * eta.powf(0.6)).powf(5.0 / 6.0) * f.powf(-7.0 / 6.0);
        let h = Complex64::from_polar(amplitude, -psi);
        h_plus.push(h * inclination_plus);
        h_cross.push(h * Complex64::new(0.0, -inclination_cross));
    }
    Polarizations { h_plus, h_cross }
}

fn main() -> Result<()> {
    env_logger::init();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_waveforms"));

    let domain = FrequencyDomain::new(20.0, 512.0, 0.25)?;
    let settings = DatasetSettings::from_value(
        json!({
            "domain_settings": {
                "type": "FrequencyDomain",
                "kwargs": {"f_min": domain.f_min, "f_max": domain.f_max, "delta_f": domain.delta_f}
            },
            "waveform_generator_settings": {"approximant": "TaylorF2-like", "f_ref": 20.0},
            "num_samples": NUM_SAMPLES
        }),
        &out_dir,
    )?;

    let mut rng = StdRng::seed_from_u64(42);
    let samples: Vec<Sample> = (0..NUM_SAMPLES)
        .map(|_| {
            let m1: f64 = rng.gen_range(10.0..80.0);
            let m2: f64 = rng.gen_range(10.0..=m1);
            let chi_1: f64 = rng.gen_range(-0.9..0.9);
            let chi_2: f64 = rng.gen_range(-0.9..0.9);
            let phase: f64 = rng.gen_range(0.0..2.0 * PI);
            let chi_eff = (m1 * chi_1 + m2 * chi_2) / (m1 + m2);
            Sample {
                parameters: [
                    ("mass_1".to_string(), m1),
                    ("mass_2".to_string(), m2),
                    ("chi_1".to_string(), chi_1),
                    ("chi_2".to_string(), chi_2),
                    ("phase".to_string(), phase),
                ]
                .into_iter()
                .collect(),
                waveform: chirp(&domain, m1, m2, chi_eff, phase),
            }
        })
        .collect();

    write_dataset(&out_dir, &samples, &settings, None)
        .with_context(|| format!("writing dataset to {}", out_dir.display()))?;

    println!(
        "Wrote {} waveforms ({} bins each) to {}",
        samples.len(),
        domain.len(),
        out_dir.display()
    );
    Ok(())
}
