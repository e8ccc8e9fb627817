/// Data layer: sample types, the dataset bundle, and the in-memory table.
///
/// Architecture:
/// ```text
///  <bundle>/
///    parameters.parquet               scalar columns, one row per sample
///    waveform_polarizations.parquet   h_plus / h_cross lists + `settings`
///    rb_matrix_V.npy                  optional embedded basis
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parquet regions → columns, settings text
///   └──────────┘
///        │
///        ▼
///   ┌───────────────┐
///   │ WaveformTable  │  columnar parameters, strided waveforms, domain
///   └───────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Sample   │  { parameters, waveform } for one index
///   └──────────┘
/// ```
///
/// `writer` produces the same layout.

pub mod loader;
pub mod model;
pub mod settings;
pub mod table;
pub mod writer;
