use crate::error::{FusionError, Result};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tracing::debug;

/// Supported tabular file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) => {
                if stem.ends_with(".csv") {
                    Ok(FileFormat::GzippedCsv)
                } else if stem.ends_with(".tsv") || stem.ends_with(".txt") {
                    Ok(FileFormat::GzippedTsv)
                } else {
                    Err(FusionError::invalid_configuration(format!(
                        "cannot determine format of gzipped file: {:?}",
                        path
                    )))
                }
            }
            (Some("csv"), _) => Ok(FileFormat::Csv),
            (Some("tsv"), _) | (Some("txt"), _) => Ok(FileFormat::Tsv),
            _ => Err(FusionError::invalid_configuration(format!(
                "unsupported file format: {:?}",
                path
            ))),
        }
    }

    /// Get delimiter character
    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Open a tabular file as a CSV reader, transparently decompressing gzip
pub fn open_reader<P: AsRef<Path>>(
    path: P,
    format: FileFormat,
) -> Result<csv::Reader<Box<dyn Read + Send>>> {
    let file = File::open(path.as_ref())?;
    let inner: Box<dyn Read + Send> = if format.is_gzipped() {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(ReaderBuilder::new()
        .delimiter(format.delimiter())
        .has_headers(true)
        .flexible(true)
        .from_reader(inner))
}

/// Parse a numeric cell. Empty strings and non-numeric markers become NaN so
/// that missing values survive until the cleaning step decides their fate.
pub fn parse_cell(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// A row-labelled numeric table: rows are molecules, columns are samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Row labels (molecule identifiers)
    pub index: Vec<String>,
    /// Column names (sample identifiers)
    pub columns: Vec<String>,
    /// Cell values, one inner vector per row
    pub values: Vec<Vec<f64>>,
}

impl Frame {
    /// Create an empty frame with the given columns
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            index: Vec::new(),
            columns,
            values: Vec::new(),
        }
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    /// Number of columns
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Check if the frame holds no rows
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Append a row
    pub fn push_row(&mut self, label: String, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.index.push(label);
        self.values.push(values);
    }

    /// Get a row's values by label
    pub fn row(&self, label: &str) -> Option<&[f64]> {
        self.index
            .iter()
            .position(|l| l == label)
            .map(|i| self.values[i].as_slice())
    }

    /// Position of a column by name
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Restrict the frame to the given columns, in the given order.
    /// Requested columns that the frame does not have are simply absent from
    /// the result, no error.
    pub fn select_columns(&self, columns: &[String]) -> Frame {
        let positions: Vec<(String, usize)> = columns
            .iter()
            .filter_map(|name| self.column_position(name).map(|pos| (name.clone(), pos)))
            .collect();

        let mut out = Frame::with_columns(positions.iter().map(|(n, _)| n.clone()).collect());
        for (label, row) in self.index.iter().zip(&self.values) {
            let values = positions.iter().map(|&(_, pos)| row[pos]).collect();
            out.push_row(label.clone(), values);
        }
        out
    }

    /// Keep only the rows whose label is in `labels`, preserving frame order
    pub fn filter_rows(&self, labels: &HashSet<String>) -> Frame {
        let mut out = Frame::with_columns(self.columns.clone());
        for (label, row) in self.index.iter().zip(&self.values) {
            if labels.contains(label) {
                out.push_row(label.clone(), row.clone());
            }
        }
        out
    }

    /// Rewrite every row label to `"{label}_{tag}"`
    pub fn suffix_index(&mut self, tag: &str) {
        for label in &mut self.index {
            label.push('_');
            label.push_str(tag);
        }
    }

    /// Append rows of `other` (columns must match)
    pub fn append(&mut self, other: Frame) {
        debug_assert_eq!(self.columns, other.columns);
        self.index.extend(other.index);
        self.values.extend(other.values);
    }

    /// Write the frame as TSV with decimal point `.`; the header row is
    /// emitted only when `header` is set, so chunked appends stay well-formed.
    pub fn write_tsv<W: Write>(&self, writer: &mut W, header: bool) -> Result<()> {
        if header {
            let mut line = String::new();
            for col in &self.columns {
                line.push('\t');
                line.push_str(col);
            }
            line.push('\n');
            writer.write_all(line.as_bytes())?;
        }
        for (label, row) in self.index.iter().zip(&self.values) {
            let mut line = label.clone();
            for value in row {
                line.push('\t');
                if value.is_nan() {
                    // leave missing cells empty
                } else {
                    line.push_str(&format!("{}", value));
                }
            }
            line.push('\n');
            writer.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    /// Read a full frame from a tabular file
    pub fn read_tsv<P: AsRef<Path>>(path: P) -> Result<Frame> {
        let format = FileFormat::from_path(path.as_ref())?;
        let mut reader = open_reader(path.as_ref(), format)?;

        let headers = reader.headers()?.clone();
        let columns: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
        let mut frame = Frame::with_columns(columns);

        for record in reader.records() {
            let record = record?;
            let label = record.get(0).unwrap_or("").to_string();
            let mut values: Vec<f64> = record.iter().skip(1).map(parse_cell).collect();
            values.resize(frame.n_cols(), f64::NAN);
            frame.push_row(label, values);
        }
        debug!("Read frame with {} rows from {:?}", frame.n_rows(), path.as_ref());
        Ok(frame)
    }
}

/// Lazy iterator over fixed-size row chunks of a tabular file.
///
/// Only one chunk is materialized at a time; creating a new iterator reopens
/// the file, so the sequence is restartable.
pub struct ChunkedFrames {
    reader: csv::Reader<Box<dyn Read + Send>>,
    columns: Vec<String>,
    chunk_size: usize,
    done: bool,
}

impl ChunkedFrames {
    pub fn open<P: AsRef<Path>>(path: P, format: FileFormat, chunk_size: usize) -> Result<Self> {
        let mut reader = open_reader(path, format)?;
        let headers = reader.headers()?.clone();
        let columns: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
        Ok(Self {
            reader,
            columns,
            chunk_size: chunk_size.max(1),
            done: false,
        })
    }

    /// Column names (sample identifiers) of the underlying file
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for ChunkedFrames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut chunk = Frame::with_columns(self.columns.clone());
        for record in self.reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            let label = record.get(0).unwrap_or("").to_string();
            let mut values: Vec<f64> = record.iter().skip(1).map(parse_cell).collect();
            values.resize(chunk.n_cols(), f64::NAN);
            chunk.push_row(label, values);

            if chunk.n_rows() >= self.chunk_size {
                return Some(Ok(chunk));
            }
        }

        self.done = true;
        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as IoWrite;

    fn write_temp(content: &str, ext: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new()
            .suffix(ext)
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn test_file_format_detection() {
        assert_eq!(FileFormat::from_path("data.csv").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_path("data.tsv").unwrap(), FileFormat::Tsv);
        assert_eq!(FileFormat::from_path("data.txt").unwrap(), FileFormat::Tsv);
        assert_eq!(
            FileFormat::from_path("data.csv.gz").unwrap(),
            FileFormat::GzippedCsv
        );
        assert_eq!(
            FileFormat::from_path("data.tsv.gz").unwrap(),
            FileFormat::GzippedTsv
        );
        assert!(FileFormat::from_path("data.bin").is_err());
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("1.5"), 1.5);
        assert_eq!(parse_cell(" 2 "), 2.0);
        assert!(parse_cell("").is_nan());
        assert!(parse_cell("NA").is_nan());
    }

    #[test]
    fn test_read_frame() {
        let path = write_temp("\tS1\tS2\tS3\nG1\t1\t2\t3\nG2\t4\t\t6\n", ".tsv");
        let frame = Frame::read_tsv(&path).unwrap();

        assert_eq!(frame.n_rows(), 2);
        assert_eq!(frame.columns, vec!["S1", "S2", "S3"]);
        assert_eq!(frame.row("G1").unwrap(), &[1.0, 2.0, 3.0]);
        assert!(frame.row("G2").unwrap()[1].is_nan());
    }

    #[test]
    fn test_select_columns_skips_absent() {
        let path = write_temp("\tS1\tS2\nG1\t1\t2\n", ".tsv");
        let frame = Frame::read_tsv(&path).unwrap();

        let selected = frame.select_columns(&[
            "S2".to_string(),
            "MISSING".to_string(),
            "S1".to_string(),
        ]);
        assert_eq!(selected.columns, vec!["S2", "S1"]);
        assert_eq!(selected.row("G1").unwrap(), &[2.0, 1.0]);
    }

    #[test]
    fn test_suffix_index() {
        let path = write_temp("\tS1\nX\t1\n", ".tsv");
        let mut frame = Frame::read_tsv(&path).unwrap();
        frame.suffix_index("miRNA");
        assert_eq!(frame.index, vec!["X_miRNA"]);
    }

    #[test]
    fn test_chunked_matches_full_read() {
        let content = "\tS1\tS2\nG1\t1\t2\nG2\t3\t4\nG3\t5\t6\nG4\t7\t8\nG5\t9\t10\n";
        let path = write_temp(content, ".tsv");

        let full = Frame::read_tsv(&path).unwrap();

        let chunks: Vec<Frame> = ChunkedFrames::open(&path, FileFormat::Tsv, 2)
            .unwrap()
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].n_rows(), 2);
        assert_eq!(chunks[2].n_rows(), 1);

        let mut rebuilt = Frame::with_columns(full.columns.clone());
        for chunk in chunks {
            rebuilt.append(chunk);
        }
        assert_eq!(rebuilt, full);
    }

    #[test]
    fn test_chunked_restartable() {
        let content = "\tS1\nG1\t1\nG2\t2\n";
        let path = write_temp(content, ".tsv");

        let first: usize = ChunkedFrames::open(&path, FileFormat::Tsv, 1)
            .unwrap()
            .map(|c| c.unwrap().n_rows())
            .sum();
        let second: usize = ChunkedFrames::open(&path, FileFormat::Tsv, 1)
            .unwrap()
            .map(|c| c.unwrap().n_rows())
            .sum();
        assert_eq!(first, 2);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_write_tsv_round_trip() {
        let path = write_temp("\tS1\tS2\nG1\t1\t2\n", ".tsv");
        let frame = Frame::read_tsv(&path).unwrap();

        let mut buf = Vec::new();
        frame.write_tsv(&mut buf, true).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "\tS1\tS2\nG1\t1\t2\n");
    }
}
