use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Float64Builder, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use num_complex::Complex64;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;

use super::loader::{BASIS_FILE, PARAMETERS_FILE, WAVEFORMS_FILE};
use super::model::Sample;
use super::settings::DatasetSettings;
use crate::basis::ReducedBasis;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Whole bundle
// ---------------------------------------------------------------------------

/// Write `samples` as a dataset bundle in `dir` (created if needed).
///
/// Every sample must carry the same parameter names. When `basis` is given it
/// is stored as the embedded legacy basis.
pub fn write_dataset(
    dir: &Path,
    samples: &[Sample],
    settings: &DatasetSettings,
    basis: Option<&ReducedBasis>,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    let names: Vec<String> = samples
        .first()
        .map(|s| s.parameters.keys().cloned().collect())
        .unwrap_or_default();
    let mut columns = vec![Vec::with_capacity(samples.len()); names.len()];
    for (i, sample) in samples.iter().enumerate() {
        if sample.parameters.len() != names.len() {
            return Err(Error::schema(
                dir,
                format!("sample {i} has a different parameter set"),
            ));
        }
        for (column, name) in columns.iter_mut().zip(&names) {
            let value = sample.parameters.get(name).ok_or_else(|| {
                Error::schema(dir, format!("sample {i} lacks parameter '{name}'"))
            })?;
            column.push(*value);
        }
    }
    write_parameters(&dir.join(PARAMETERS_FILE), &names, &columns)?;

    let h_plus: Vec<&[Complex64]> = samples.iter().map(|s| s.waveform.h_plus.as_slice()).collect();
    let h_cross: Vec<&[Complex64]> = samples.iter().map(|s| s.waveform.h_cross.as_slice()).collect();
    write_waveforms(&dir.join(WAVEFORMS_FILE), &h_plus, &h_cross, settings)?;

    if let Some(basis) = basis {
        basis.save(&dir.join(BASIS_FILE))?;
    }

    info!("wrote {} samples to {}", samples.len(), dir.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Individual regions
// ---------------------------------------------------------------------------

/// Write scalar Float64 parameter columns.
pub fn write_parameters(path: &Path, names: &[String], columns: &[Vec<f64>]) -> Result<()> {
    let fields: Vec<Field> = names
        .iter()
        .map(|n| Field::new(n, DataType::Float64, false))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|c| Arc::new(Float64Array::from(c.clone())) as ArrayRef)
        .collect();

    let file = fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
    if !arrays.is_empty() {
        writer.write(&RecordBatch::try_new(schema, arrays)?)?;
    }
    writer.close()?;
    Ok(())
}

/// Write the two polarization list columns and attach `settings` as
/// key/value metadata.
pub fn write_waveforms(
    path: &Path,
    h_plus: &[&[Complex64]],
    h_cross: &[&[Complex64]],
    settings: &DatasetSettings,
) -> Result<()> {
    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("h_plus", DataType::List(item.clone()), false),
        Field::new("h_cross", DataType::List(item), false),
    ]));

    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue::new(
            DatasetSettings::KEY.to_string(),
            settings.to_json_string(),
        )]))
        .build();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![interleaved_list(h_plus), interleaved_list(h_cross)],
    )?;

    let file = fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn interleaved_list(rows: &[&[Complex64]]) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        let values = builder.values();
        for z in row.iter() {
            values.append_value(z.re);
            values.append_value(z.im);
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}
