use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray, ListArray,
};
use arrow::datatypes::DataType;
use log::debug;
use num_complex::Complex64;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::model::Polarization;
use super::settings::DatasetSettings;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Bundle layout
// ---------------------------------------------------------------------------

/// Scalar parameter columns, one row per sample.
pub const PARAMETERS_FILE: &str = "parameters.parquet";
/// `h_plus` / `h_cross` list columns plus the `settings` key/value entry.
pub const WAVEFORMS_FILE: &str = "waveform_polarizations.parquet";
/// Optional legacy basis matrix `V`.
pub const BASIS_FILE: &str = "rb_matrix_V.npy";

/// Parameter region read column-wise.
#[derive(Debug, Clone, Default)]
pub struct ParameterColumns {
    pub names: Vec<String>,
    pub columns: Vec<Vec<f64>>,
    pub rows: usize,
}

/// All complex vectors of one polarization packed row after row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolarizationColumn {
    pub data: Vec<Complex64>,
    /// Length of each row's vector.
    pub stride: usize,
    pub rows: usize,
}

impl PolarizationColumn {
    pub fn row(&self, index: usize) -> &[Complex64] {
        &self.data[index * self.stride..(index + 1) * self.stride]
    }

    fn push_row(&mut self, row: Vec<Complex64>) -> std::result::Result<(), String> {
        if self.rows == 0 {
            self.stride = row.len();
        } else if row.len() != self.stride {
            return Err(format!(
                "has {} bins but earlier rows have {}",
                row.len(),
                self.stride
            ));
        }
        self.data.extend(row);
        self.rows += 1;
        Ok(())
    }
}

/// Waveform region and the settings text stored alongside it.
#[derive(Debug, Clone, Default)]
pub struct WaveformColumns {
    pub h_plus: PolarizationColumn,
    pub h_cross: PolarizationColumn,
    pub settings: Option<String>,
}

// ---------------------------------------------------------------------------
// Parameter region
// ---------------------------------------------------------------------------

/// Read `parameters.parquet`. Every column must be numeric.
pub fn read_parameters(path: &Path) -> Result<ParameterColumns> {
    let file = open_region(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();

    let mut out = ParameterColumns::default();
    for field in schema.fields() {
        if !is_numeric(field.data_type()) {
            return Err(Error::schema(
                path,
                format!(
                    "parameter column '{}' has non-numeric type {:?}",
                    field.name(),
                    field.data_type()
                ),
            ));
        }
        out.names.push(field.name().clone());
        out.columns.push(Vec::new());
    }

    for batch_result in builder.build()? {
        let batch = batch_result?;
        for (col_idx, column) in out.columns.iter_mut().enumerate() {
            append_f64_column(batch.column(col_idx), column).map_err(|reason| {
                Error::format(path, format!("column '{}': {reason}", out.names[col_idx]))
            })?;
        }
        out.rows += batch.num_rows();
    }

    debug!(
        "read {} parameter columns x {} rows from {}",
        out.names.len(),
        out.rows,
        path.display()
    );
    Ok(out)
}

fn is_numeric(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Float64 | DataType::Float32 | DataType::Int64 | DataType::Int32
    )
}

/// Widen a scalar numeric column to `f64`. Nulls are rejected.
fn append_f64_column(col: &Arc<dyn Array>, out: &mut Vec<f64>) -> std::result::Result<(), String> {
    if col.null_count() > 0 {
        return Err(format!("{} null values", col.null_count()));
    }
    match col.data_type() {
        DataType::Float64 => {
            let arr = downcast::<Float64Array>(col)?;
            out.extend(arr.values().iter().copied());
        }
        DataType::Float32 => {
            let arr = downcast::<Float32Array>(col)?;
            out.extend(arr.values().iter().map(|&v| v as f64));
        }
        DataType::Int64 => {
            let arr = downcast::<Int64Array>(col)?;
            out.extend(arr.values().iter().map(|&v| v as f64));
        }
        DataType::Int32 => {
            let arr = downcast::<Int32Array>(col)?;
            out.extend(arr.values().iter().map(|&v| v as f64));
        }
        other => return Err(format!("unsupported type {other:?}")),
    }
    Ok(())
}

fn downcast<T: 'static>(col: &Arc<dyn Array>) -> std::result::Result<&T, String> {
    col.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("unexpected array layout for {:?}", col.data_type()))
}

// ---------------------------------------------------------------------------
// Waveform region
// ---------------------------------------------------------------------------

/// Read `waveform_polarizations.parquet`.
///
/// Each row of `h_plus` / `h_cross` holds one complex series with real and
/// imaginary parts interleaved.
pub fn read_waveforms(path: &Path) -> Result<WaveformColumns> {
    let file = open_region(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let settings = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kvs| kvs.iter().find(|kv| kv.key == DatasetSettings::KEY))
        .and_then(|kv| kv.value.clone());

    let schema = builder.schema().clone();
    let mut indices = Vec::with_capacity(2);
    for pol in Polarization::ALL {
        let idx = schema.index_of(pol.as_str()).map_err(|_| {
            Error::schema(path, format!("waveform region missing '{pol}' column"))
        })?;
        indices.push((pol, idx));
    }

    let mut out = WaveformColumns {
        settings,
        ..Default::default()
    };
    let mut row_offset = 0;
    for batch_result in builder.build()? {
        let batch = batch_result?;
        for &(pol, idx) in &indices {
            let col = batch.column(idx);
            let target = match pol {
                Polarization::HPlus => &mut out.h_plus,
                Polarization::HCross => &mut out.h_cross,
            };
            for row in 0..batch.num_rows() {
                extract_f64_list(col, row)
                    .and_then(interleaved_to_complex)
                    .and_then(|series| target.push_row(series))
                    .map_err(|reason| {
                        Error::format(path, format!("{pol} row {}: {reason}", row_offset + row))
                    })?;
            }
        }
        row_offset += batch.num_rows();
    }

    debug!(
        "read {} waveform rows ({} bins) from {}",
        out.h_plus.rows,
        out.h_plus.stride,
        path.display()
    );
    Ok(out)
}

fn open_region(path: &Path) -> Result<File> {
    if !path.is_file() {
        return Err(Error::schema(
            path,
            "required region is missing from the dataset bundle",
        ));
    }
    Ok(File::open(path)?)
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> std::result::Result<Vec<f64>, String> {
    if col.is_null(row) {
        return Err("null value in list column".into());
    }

    let values_array = match col.data_type() {
        DataType::List(_) => downcast::<ListArray>(col)?.value(row),
        DataType::LargeList(_) => downcast::<LargeListArray>(col)?.value(row),
        other => return Err(format!("expected List or LargeList column, got {other:?}")),
    };

    if values_array.null_count() > 0 {
        return Err("null entries inside waveform".into());
    }
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.values().to_vec())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.values().iter().map(|&v| v as f64).collect())
    } else {
        Err(format!(
            "list inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        ))
    }
}

fn interleaved_to_complex(values: Vec<f64>) -> std::result::Result<Vec<Complex64>, String> {
    if values.len() % 2 != 0 {
        return Err(format!(
            "odd number of interleaved values ({})",
            values.len()
        ));
    }
    Ok(values
        .chunks_exact(2)
        .map(|pair| Complex64::new(pair[0], pair[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Builder, ListBuilder, StringArray};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    fn write_region(path: &Path, columns: Vec<(&str, ArrayRef)>) {
        let batch = RecordBatch::try_from_iter(columns).unwrap();
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn interleaving() {
        let z = interleaved_to_complex(vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(z, vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)]);
        assert!(interleaved_to_complex(vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut col = PolarizationColumn::default();
        col.push_row(vec![Complex64::new(1.0, 0.0); 3]).unwrap();
        assert!(col.push_row(vec![Complex64::new(1.0, 0.0); 2]).is_err());
        assert_eq!(col.rows, 1);
        assert_eq!(col.row(0).len(), 3);
    }

    #[test]
    fn missing_region() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_parameters(&dir.path().join(PARAMETERS_FILE)).unwrap_err();
        assert!(matches!(err, Error::SchemaError { .. }));
    }

    #[test]
    fn text_parameter_column_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PARAMETERS_FILE);
        write_region(
            &path,
            vec![
                ("m1", Arc::new(Float64Array::from(vec![30.0, 31.0])) as ArrayRef),
                ("approximant", Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef),
            ],
        );
        match read_parameters(&path) {
            Err(Error::SchemaError { reason, .. }) => assert!(reason.contains("approximant")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn integer_parameters_are_widened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PARAMETERS_FILE);
        write_region(
            &path,
            vec![("seed", Arc::new(Int64Array::from(vec![3, 4])) as ArrayRef)],
        );
        let params = read_parameters(&path).unwrap();
        assert_eq!(params.rows, 2);
        assert_eq!(params.columns[0], vec![3.0, 4.0]);
    }

    #[test]
    fn null_waveform_row_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WAVEFORMS_FILE);
        let list = |null_first: bool| {
            let mut builder = ListBuilder::new(Float64Builder::new());
            if null_first {
                builder.append(false);
            } else {
                builder.values().append_slice(&[1.0, 0.0]);
                builder.append(true);
            }
            builder.values().append_slice(&[0.0, 1.0]);
            builder.append(true);
            Arc::new(builder.finish()) as ArrayRef
        };
        write_region(&path, vec![("h_plus", list(true)), ("h_cross", list(false))]);
        match read_waveforms(&path) {
            Err(Error::FormatError { reason, .. }) => {
                assert!(reason.contains("h_plus row 0"));
                assert!(reason.contains("null"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
