pub mod clinical;
pub mod frame;

use crate::error::{FusionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use clinical::{ClinicalSource, SurvivalColumnTuple};
pub use frame::{ChunkedFrames, FileFormat, Frame};

/// Default number of rows per chunk when streaming a molecular source
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Kind of molecule a source holds. The tag disambiguates identically-named
/// molecules coming from different source types once they land in the
/// unified molecules table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoleculeKind {
    Mrna,
    Mirna,
    Cna,
    Methylation,
}

impl MoleculeKind {
    /// Stable tag appended to row labels in the unified molecules table
    pub fn tag(&self) -> &'static str {
        match self {
            MoleculeKind::Mrna => "mRNA",
            MoleculeKind::Mirna => "miRNA",
            MoleculeKind::Cna => "CNA",
            MoleculeKind::Methylation => "Methylation",
        }
    }

    /// Parse from a user-supplied string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mrna" => Some(MoleculeKind::Mrna),
            "mirna" => Some(MoleculeKind::Mirna),
            "cna" => Some(MoleculeKind::Cna),
            "methylation" => Some(MoleculeKind::Methylation),
            _ => None,
        }
    }
}

impl std::fmt::Display for MoleculeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// An on-disk tabular dataset: first column is the row index (molecule
/// identifiers), remaining columns are samples. Reads are streamed, nothing
/// is pinned in memory between calls.
#[derive(Debug, Clone)]
pub struct TabularFile {
    path: PathBuf,
    format: FileFormat,
}

impl TabularFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(FusionError::invalid_configuration(format!(
                "source file does not exist: {:?}",
                path
            )));
        }
        let format = FileFormat::from_path(&path)?;
        debug!("Opened source {:?} as {:?}", path, format);
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Column names, excluding the leading index column
    pub fn column_names(&self) -> Result<Vec<String>> {
        let mut reader = frame::open_reader(&self.path, self.format)?;
        let headers = reader.headers()?;
        Ok(headers.iter().skip(1).map(|s| s.to_string()).collect())
    }

    /// First-column values (the row index)
    pub fn row_index(&self) -> Result<Vec<String>> {
        let mut reader = frame::open_reader(&self.path, self.format)?;
        let mut index = Vec::new();
        for record in reader.records() {
            let record = record?;
            index.push(record.get(0).unwrap_or("").to_string());
        }
        Ok(index)
    }

    /// Stream-scan for a single row. Fails with a catchable
    /// [`FusionError::RowNotFound`] when the row is absent or holds no
    /// values, never by returning silently empty data.
    pub fn specific_row(&self, row: &str) -> Result<Vec<f64>> {
        let mut reader = frame::open_reader(&self.path, self.format)?;
        for record in reader.records() {
            let record = record?;
            if record.get(0) == Some(row) {
                let values: Vec<f64> = record.iter().skip(1).map(frame::parse_cell).collect();
                if values.is_empty() {
                    return Err(FusionError::row_not_found(row));
                }
                return Ok(values);
            }
        }
        Err(FusionError::row_not_found(row))
    }

    pub fn full_frame(&self) -> Result<Frame> {
        Frame::read_tsv(&self.path)
    }

    pub fn chunked_frames(&self, chunk_size: usize) -> Result<ChunkedFrames> {
        ChunkedFrames::open(&self.path, self.format, chunk_size)
    }

    pub fn row_count(&self) -> Result<usize> {
        let mut reader = frame::open_reader(&self.path, self.format)?;
        let mut count = 0;
        for record in reader.records() {
            record?;
            count += 1;
        }
        Ok(count)
    }

    pub fn sample_count(&self) -> Result<usize> {
        Ok(self.column_names()?.len())
    }
}

/// A pipeline source: a file uploaded by the user or a dataset synchronized
/// from an external cohort study. Exactly one backend exists per source by
/// construction.
#[derive(Debug, Clone)]
pub enum SourceBackend {
    UploadedFile(TabularFile),
    SynchronizedDataset(TabularFile),
}

/// A molecular source with its declared molecule kind
#[derive(Debug, Clone)]
pub struct Source {
    backend: SourceBackend,
    kind: MoleculeKind,
}

impl Source {
    pub fn uploaded(file: TabularFile, kind: MoleculeKind) -> Self {
        Self {
            backend: SourceBackend::UploadedFile(file),
            kind,
        }
    }

    pub fn synchronized(file: TabularFile, kind: MoleculeKind) -> Self {
        Self {
            backend: SourceBackend::SynchronizedDataset(file),
            kind,
        }
    }

    pub fn kind(&self) -> MoleculeKind {
        self.kind
    }

    /// The valid backend table
    fn table(&self) -> &TabularFile {
        match &self.backend {
            SourceBackend::UploadedFile(file) => file,
            SourceBackend::SynchronizedDataset(file) => file,
        }
    }

    /// Sample identifiers, header order preserved
    pub fn samples(&self) -> Result<Vec<String>> {
        self.table().column_names()
    }

    /// Every molecule identifier the source carries, file order preserved
    pub fn molecule_identifiers(&self) -> Result<Vec<String>> {
        self.table().row_index()
    }

    /// A single molecule's values across all samples
    pub fn specific_row(&self, row: &str) -> Result<Vec<f64>> {
        self.table().specific_row(row)
    }

    /// A single molecule's values restricted to the given samples, in the
    /// given order. Samples the source does not carry are skipped.
    pub fn specific_row_for_samples(&self, row: &str, samples: &[String]) -> Result<Vec<f64>> {
        let all_samples = self.samples()?;
        let values = self.specific_row(row)?;
        Ok(samples
            .iter()
            .filter_map(|s| all_samples.iter().position(|c| c == s))
            .map(|pos| values.get(pos).copied().unwrap_or(f64::NAN))
            .collect())
    }

    pub fn full_frame(&self) -> Result<Frame> {
        self.table().full_frame()
    }

    pub fn chunked_frames(&self, chunk_size: usize) -> Result<ChunkedFrames> {
        self.table().chunked_frames(chunk_size)
    }

    pub fn row_count(&self) -> Result<usize> {
        self.table().row_count()
    }

    pub fn sample_count(&self) -> Result<usize> {
        self.table().sample_count()
    }
}

/// The capability the intersection engine needs from any source
pub trait SampleSource {
    fn samples(&self) -> Result<Vec<String>>;
}

impl SampleSource for Source {
    fn samples(&self) -> Result<Vec<String>> {
        Source::samples(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn molecular_file(content: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn test_molecule_kind_tags_are_distinct() {
        let kinds = [
            MoleculeKind::Mrna,
            MoleculeKind::Mirna,
            MoleculeKind::Cna,
            MoleculeKind::Methylation,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in kinds.iter().skip(i + 1) {
                assert_ne!(a.tag(), b.tag());
            }
        }
        assert_eq!(MoleculeKind::from_str("CNA"), Some(MoleculeKind::Cna));
        assert_eq!(MoleculeKind::from_str("unknown"), None);
    }

    #[test]
    fn test_source_contract() {
        let path = molecular_file("\tS1\tS2\tS3\nG1\t1\t2\t3\nG2\t4\t5\t6\n");
        let source = Source::uploaded(TabularFile::open(&path).unwrap(), MoleculeKind::Mrna);

        assert_eq!(source.samples().unwrap(), vec!["S1", "S2", "S3"]);
        assert_eq!(source.row_count().unwrap(), 2);
        assert_eq!(source.sample_count().unwrap(), 3);
        assert_eq!(source.specific_row("G2").unwrap(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_specific_row_not_found_is_catchable() {
        let path = molecular_file("\tS1\nG1\t1\n");
        let source = Source::synchronized(TabularFile::open(&path).unwrap(), MoleculeKind::Cna);

        let err = source.specific_row("MISSING").unwrap_err();
        assert!(matches!(err, FusionError::RowNotFound { .. }));
    }

    #[test]
    fn test_specific_row_for_samples_order_and_absent() {
        let path = molecular_file("\tS1\tS2\tS3\nG1\t1\t2\t3\n");
        let source = Source::uploaded(TabularFile::open(&path).unwrap(), MoleculeKind::Mirna);

        let values = source
            .specific_row_for_samples(
                "G1",
                &["S3".to_string(), "ABSENT".to_string(), "S1".to_string()],
            )
            .unwrap();
        assert_eq!(values, vec![3.0, 1.0]);
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(TabularFile::open("/nonexistent/file.tsv").is_err());
    }
}
