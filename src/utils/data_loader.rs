//! Loading and saving of the transformed train/test arrays
//!
//! The transformation stage hands over dense numeric matrices whose last
//! column is the target. `.npy` files are read natively; CSV and Parquet go
//! through polars.

use crate::error::{Result, TrainerError};
use ndarray::{s, Array1, Array2};
use polars::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Element types accepted in `.npy` files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NpyDtype {
    F8,
    F4,
    I8,
    I4,
    U1,
}

impl NpyDtype {
    fn parse(descr: &str) -> Result<Self> {
        match descr {
            "<f8" => Ok(Self::F8),
            "<f4" => Ok(Self::F4),
            "<i8" => Ok(Self::I8),
            "<i4" => Ok(Self::I4),
            "|u1" | "|b1" => Ok(Self::U1),
            other => Err(TrainerError::Data(format!(
                "unsupported npy dtype '{}' (expected little-endian f8/f4/i8/i4 or u1/b1)",
                other
            ))),
        }
    }

    fn size(self) -> usize {
        match self {
            Self::F8 | Self::I8 => 8,
            Self::F4 | Self::I4 => 4,
            Self::U1 => 1,
        }
    }

    fn decode(self, chunk: &[u8]) -> f64 {
        match self {
            Self::F8 => f64::from_le_bytes(chunk.try_into().unwrap_or([0; 8])),
            Self::F4 => f32::from_le_bytes(chunk.try_into().unwrap_or([0; 4])) as f64,
            Self::I8 => i64::from_le_bytes(chunk.try_into().unwrap_or([0; 8])) as f64,
            Self::I4 => i32::from_le_bytes(chunk.try_into().unwrap_or([0; 4])) as f64,
            Self::U1 => chunk[0] as f64,
        }
    }
}

/// Parsed `.npy` header
#[derive(Debug, Clone, PartialEq)]
struct NpyHeader {
    dtype: NpyDtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

impl NpyHeader {
    fn parse(text: &str) -> Result<Self> {
        let descr = dict_value(text, "descr")?
            .trim_matches(|c| c == '\'' || c == '"')
            .to_string();
        let fortran = dict_value(text, "fortran_order")?;
        let shape_text = dict_value(text, "shape")?;

        let shape = shape_text
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.trim_end_matches('L').parse::<usize>().map_err(|_| {
                    TrainerError::Data(format!("invalid npy shape entry '{}'", s))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dtype: NpyDtype::parse(&descr)?,
            fortran_order: fortran == "True",
            shape,
        })
    }
}

/// Extract the raw value text for `key` from a Python dict literal.
fn dict_value<'a>(text: &'a str, key: &str) -> Result<&'a str> {
    let missing = || TrainerError::Data(format!("npy header has no '{}' entry", key));

    let quoted_single = format!("'{}'", key);
    let quoted_double = format!("\"{}\"", key);
    let key_pos = text
        .find(&quoted_single)
        .map(|p| p + quoted_single.len())
        .or_else(|| text.find(&quoted_double).map(|p| p + quoted_double.len()))
        .ok_or_else(missing)?;

    let rest = &text[key_pos..];
    let colon = rest.find(':').ok_or_else(missing)?;
    let value = rest[colon + 1..].trim_start();

    let end = if value.starts_with('(') {
        value.find(')').map(|i| i + 1)
    } else if value.starts_with('\'') || value.starts_with('"') {
        let quote = value.as_bytes()[0] as char;
        value[1..].find(quote).map(|i| i + 2)
    } else {
        value.find(|c| c == ',' || c == '}')
    }
    .ok_or_else(missing)?;

    Ok(value[..end].trim())
}

/// Loader for numeric arrays
pub struct DataLoader {
    /// CSV files carry a header row
    has_header: bool,
    /// CSV delimiter
    separator: u8,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            has_header: true,
            separator: b',',
        }
    }

    pub fn with_has_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Load a 2-D array, picking the reader from the file extension
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Array2<f64>> {
        let path = path.as_ref();
        let start = Instant::now();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let array = match ext.as_str() {
            "npy" => self.load_npy(path)?,
            "csv" => self.load_csv(path)?,
            "parquet" => self.load_parquet(path)?,
            _ => {
                return Err(TrainerError::Data(format!(
                    "unsupported array format '{}' for {}",
                    ext,
                    path.display()
                )))
            }
        };

        debug!(
            path = %path.display(),
            rows = array.nrows(),
            cols = array.ncols(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded array"
        );
        Ok(array)
    }

    /// Read a NumPy `.npy` file
    pub fn load_npy(&self, path: &Path) -> Result<Array2<f64>> {
        let file = File::open(path)
            .map_err(|e| TrainerError::Data(format!("{}: {}", path.display(), e)))?;
        read_npy(BufReader::new(file))
    }

    /// Read a numeric CSV file
    pub fn load_csv(&self, path: &Path) -> Result<Array2<f64>> {
        let parse_opts = CsvParseOptions::default().with_separator(self.separator);
        let df = CsvReadOptions::default()
            .with_has_header(self.has_header)
            .with_infer_schema_length(Some(1000))
            .with_parse_options(parse_opts)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;
        dataframe_to_array2(&df)
    }

    /// Read a Parquet file
    pub fn load_parquet(&self, path: &Path) -> Result<Array2<f64>> {
        let file = File::open(path)
            .map_err(|e| TrainerError::Data(format!("{}: {}", path.display(), e)))?;
        let df = ParquetReader::new(file).finish()?;
        dataframe_to_array2(&df)
    }
}

/// Shorthand for `DataLoader::new().load(path)`
pub fn load_numeric_array(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    DataLoader::new().load(path)
}

/// Decode an `.npy` stream into a row-major 2-D array.
/// One-dimensional payloads become a single column.
pub fn read_npy<R: Read>(mut reader: R) -> Result<Array2<f64>> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != NPY_MAGIC {
        return Err(TrainerError::Data("not an npy file (bad magic)".to_string()));
    }

    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let header_len = match version[0] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            u16::from_le_bytes(len) as usize
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        v => {
            return Err(TrainerError::Data(format!("unsupported npy version {}.{}", v, version[1])))
        }
    };

    let mut header_bytes = vec![0u8; header_len];
    reader.read_exact(&mut header_bytes)?;
    let header_text = String::from_utf8_lossy(&header_bytes);
    let header = NpyHeader::parse(&header_text)?;

    if header.fortran_order {
        return Err(TrainerError::Data("Fortran-ordered npy arrays are not supported".to_string()));
    }

    let (rows, cols) = match header.shape.as_slice() {
        [n] => (*n, 1),
        [r, c] => (*r, *c),
        other => {
            return Err(TrainerError::Shape {
                expected: "1-D or 2-D array".to_string(),
                actual: format!("{}-D array", other.len()),
            })
        }
    };

    let item = header.dtype.size();
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(item))
        .ok_or_else(|| TrainerError::Data(format!("npy shape ({}, {}) is too large", rows, cols)))?;

    // read no more than the header promises; a short file is caught below
    let mut payload = Vec::new();
    reader.take(expected as u64).read_to_end(&mut payload)?;
    if payload.len() != expected {
        return Err(TrainerError::Data(format!(
            "npy payload shorter than shape ({}, {}): {} of {} bytes",
            rows,
            cols,
            payload.len(),
            expected
        )));
    }

    let values: Vec<f64> = payload
        .chunks_exact(item)
        .map(|chunk| header.dtype.decode(chunk))
        .collect();

    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

/// Write a 2-D `f64` array as `.npy` version 1.0
pub fn write_npy<W: Write>(mut writer: W, array: &Array2<f64>) -> Result<()> {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
        array.nrows(),
        array.ncols()
    );
    // magic(6) + version(2) + len(2) + header, padded to a multiple of 64 with '\n' last
    let unpadded = 10 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    writer.write_all(NPY_MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for v in array.iter() {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Save an array to `path` as `.npy`, creating parent directories
pub fn save_numpy_array(path: impl AsRef<Path>, array: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write_npy(BufWriter::new(file), array)
}

/// Split a combined array into features (all but last column) and target (last column)
pub fn split_features_target(data: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>)> {
    let n_cols = data.ncols();
    if n_cols < 2 {
        return Err(TrainerError::Validation(format!(
            "array needs at least one feature column and a target column, got {} column(s)",
            n_cols
        )));
    }
    let x = data.slice(s![.., ..n_cols - 1]).to_owned();
    let y = data.column(n_cols - 1).to_owned();
    Ok((x, y))
}

/// Convert every column of a DataFrame to `f64`; nulls become `NaN`.
fn dataframe_to_array2(df: &DataFrame) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let col_data: Vec<Vec<f64>> = df
        .get_column_names()
        .into_iter()
        .map(|name| {
            let column = df.column(name.as_str())?;
            let casted = column.cast(&DataType::Float64)?;
            let values: Vec<f64> = casted
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            Ok(values)
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, col_refs.len()), |(r, c)| col_refs[c][r]))
}
