use std::collections::BTreeMap;
use std::fmt;

use num_complex::Complex64;

// ---------------------------------------------------------------------------
// Polarization – the two waveform components
// ---------------------------------------------------------------------------

/// One of the two independent gravitational-wave polarizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Polarization {
    HPlus,
    HCross,
}

impl Polarization {
    pub const ALL: [Polarization; 2] = [Polarization::HPlus, Polarization::HCross];

    /// Column name in the waveform region of a dataset bundle.
    pub fn as_str(self) -> &'static str {
        match self {
            Polarization::HPlus => "h_plus",
            Polarization::HCross => "h_cross",
        }
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Polarizations – the waveform half of a sample
// ---------------------------------------------------------------------------

/// Complex frequency series for both polarizations, or their basis
/// coefficients once a basis has been applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polarizations {
    pub h_plus: Vec<Complex64>,
    pub h_cross: Vec<Complex64>,
}

impl Polarizations {
    pub fn get(&self, pol: Polarization) -> &[Complex64] {
        match pol {
            Polarization::HPlus => &self.h_plus,
            Polarization::HCross => &self.h_cross,
        }
    }

    pub fn get_mut(&mut self, pol: Polarization) -> &mut Vec<Complex64> {
        match pol {
            Polarization::HPlus => &mut self.h_plus,
            Polarization::HCross => &mut self.h_cross,
        }
    }
}

// ---------------------------------------------------------------------------
// Sample – one row of a WaveformTable
// ---------------------------------------------------------------------------

/// Named scalar physical parameters (mass ratio, spins, ...).
pub type Parameters = BTreeMap<String, f64>;

/// Parameters and waveform of one table row. The two halves always travel
/// together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub parameters: Parameters,
    pub waveform: Polarizations,
}
