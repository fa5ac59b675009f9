use crate::error::{FusionError, Result};
use crate::source::frame;
use crate::source::{SampleSource, TabularFile};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;
use tracing::debug;

/// Column names by convention in synchronized cohort datasets
pub const PATIENT_ID_COLUMN: &str = "PATIENT_ID";
pub const SAMPLE_ID_COLUMN: &str = "SAMPLE_ID";
pub const SAMPLES_TYPE_COLUMN: &str = "SAMPLES_TYPE";
pub const PRIMARY_TYPE_VALUE: &str = "primary";

/// TCGA barcode suffixes: '-01' (primary tumor), '-06' (metastatic) and
/// '-11' (normal). Stripped before patient-level joins so suffixed sample
/// barcodes still match their patient row.
pub fn tcga_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-(0(1|6)|11)$").unwrap())
}

/// Strip a trailing TCGA sample-type suffix from an identifier
pub fn strip_tcga_suffix(id: &str) -> String {
    tcga_suffix().replace(id, "").into_owned()
}

/// Which two clinical columns hold the survival event and time. Resolved
/// once per run and frozen; the event column always comes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivalColumnTuple {
    pub event_column: String,
    pub time_column: String,
}

impl SurvivalColumnTuple {
    pub fn new(event_column: impl Into<String>, time_column: impl Into<String>) -> Self {
        Self {
            event_column: event_column.into(),
            time_column: time_column.into(),
        }
    }
}

/// A row-keyed table of string-valued clinical attributes.
/// Rows are patients or samples, columns are attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeFrame {
    /// Name of the index column in the underlying file
    pub index_name: String,
    /// Row keys
    pub index: Vec<String>,
    /// Attribute names (excluding the index column)
    pub columns: Vec<String>,
    /// Cell values, one inner vector per row
    pub values: Vec<Vec<String>>,
}

impl AttributeFrame {
    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, frame order
    pub fn column(&self, name: &str) -> Result<Vec<String>> {
        let pos = self
            .column_position(name)
            .ok_or_else(|| FusionError::attribute_not_found(name))?;
        Ok(self.values.iter().map(|row| row[pos].clone()).collect())
    }

    /// Value at (row key, column name); the first matching row wins
    pub fn get(&self, key: &str, column: &str) -> Result<String> {
        let col = self
            .column_position(column)
            .ok_or_else(|| FusionError::attribute_not_found(column))?;
        let row = self
            .index
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| FusionError::row_not_found(key))?;
        Ok(self.values[row][col].clone())
    }

    /// Re-key the frame on the values of one of its columns; the previous
    /// index is materialized as a trailing column.
    pub fn reindex_on(&self, column: &str) -> Result<AttributeFrame> {
        let pos = self
            .column_position(column)
            .ok_or_else(|| FusionError::attribute_not_found(column))?;

        let mut columns: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.as_str() != column)
            .cloned()
            .collect();
        columns.push(self.index_name.clone());

        let mut out = AttributeFrame {
            index_name: column.to_string(),
            index: Vec::new(),
            columns,
            values: Vec::new(),
        };
        for (key, row) in self.index.iter().zip(&self.values) {
            let mut values: Vec<String> = row
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != pos)
                .map(|(_, v)| v.clone())
                .collect();
            values.push(key.clone());
            out.index.push(row[pos].clone());
            out.values.push(values);
        }
        Ok(out)
    }

    /// Read all cells of a tabular file as strings, first column as index
    pub fn read(file: &TabularFile) -> Result<AttributeFrame> {
        let mut reader = frame::open_reader(file.path(), file.format())?;
        let headers = reader.headers()?.clone();
        let index_name = headers.iter().next().unwrap_or("").to_string();
        let columns: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();

        let mut out = AttributeFrame {
            index_name,
            index: Vec::new(),
            columns,
            values: Vec::new(),
        };
        for record in reader.records() {
            let record = record?;
            out.index.push(record.get(0).unwrap_or("").to_string());
            let mut values: Vec<String> =
                record.iter().skip(1).map(|s| s.to_string()).collect();
            values.resize(out.columns.len(), String::new());
            out.values.push(values);
        }
        Ok(out)
    }
}

/// Backend of a clinical source. Synchronized cohort studies ship clinical
/// data as two physically separate tables: one indexed by patient, one by
/// sample.
#[derive(Debug, Clone)]
pub enum ClinicalBackend {
    UploadedFile(TabularFile),
    Synchronized {
        patients: TabularFile,
        samples: TabularFile,
    },
}

/// Clinical source of an experiment.
///
/// For an uploaded file, samples are rows and attributes are columns. For a
/// synchronized pair the two tables are joined patient-side on demand.
#[derive(Debug, Clone)]
pub struct ClinicalSource {
    backend: ClinicalBackend,
    survival_columns: Vec<SurvivalColumnTuple>,
}

impl ClinicalSource {
    pub fn uploaded(file: TabularFile, survival_columns: Vec<SurvivalColumnTuple>) -> Self {
        Self {
            backend: ClinicalBackend::UploadedFile(file),
            survival_columns,
        }
    }

    pub fn synchronized(
        patients: TabularFile,
        samples: TabularFile,
        survival_columns: Vec<SurvivalColumnTuple>,
    ) -> Self {
        Self {
            backend: ClinicalBackend::Synchronized { patients, samples },
            survival_columns,
        }
    }

    /// The survival column tuples configured for this source
    pub fn survival_columns(&self) -> &[SurvivalColumnTuple] {
        &self.survival_columns
    }

    /// Sample identifiers covered by this source
    pub fn samples(&self) -> Result<Vec<String>> {
        match &self.backend {
            ClinicalBackend::UploadedFile(file) => file.row_index(),
            ClinicalBackend::Synchronized { .. } => {
                let joined = self.joined_frame()?;
                let samples = joined.column(SAMPLE_ID_COLUMN)?;
                // Distinct and sorted so downstream ordering is reproducible
                let distinct: BTreeSet<String> =
                    samples.into_iter().filter(|s| !s.is_empty()).collect();
                Ok(distinct.into_iter().collect())
            }
        }
    }

    /// Clinical attribute names, without the special identifier columns
    pub fn attributes(&self) -> Result<Vec<String>> {
        match &self.backend {
            ClinicalBackend::UploadedFile(file) => file.column_names(),
            ClinicalBackend::Synchronized { patients, samples } => {
                let mut distinct: BTreeSet<String> =
                    patients.column_names()?.into_iter().collect();
                distinct.extend(samples.column_names()?);
                distinct.remove(SAMPLE_ID_COLUMN);
                distinct.remove(PATIENT_ID_COLUMN);
                Ok(distinct.into_iter().collect())
            }
        }
    }

    /// Join the two synchronized clinical tables.
    ///
    /// The patient-indexed table is the left side. The sample table's
    /// patient identifiers have their TCGA suffix stripped before becoming
    /// the right-side join key, and the left join preserves every patient
    /// row (unmatched patients keep empty cells on the right).
    pub fn joined_frame(&self) -> Result<AttributeFrame> {
        let (patients, samples) = match &self.backend {
            ClinicalBackend::UploadedFile(file) => return AttributeFrame::read(file),
            ClinicalBackend::Synchronized { patients, samples } => (patients, samples),
        };

        let left = AttributeFrame::read(patients)?;
        let right = AttributeFrame::read(samples)?;

        // The patient key on the right may be the index or a regular column
        let right_patient_col = right.column_position(PATIENT_ID_COLUMN);
        let right_keys: Vec<String> = match right_patient_col {
            Some(pos) => right
                .values
                .iter()
                .map(|row| strip_tcga_suffix(&row[pos]))
                .collect(),
            None => right.index.iter().map(|id| strip_tcga_suffix(id)).collect(),
        };

        // Columns contributed by the right side: its index re-materialized
        // (unless it is the patient key itself) plus every non-key column
        let mut right_columns: Vec<(String, Option<usize>)> = Vec::new();
        if right_patient_col.is_some() {
            right_columns.push((right.index_name.clone(), None));
        }
        for (i, name) in right.columns.iter().enumerate() {
            if Some(i) != right_patient_col {
                right_columns.push((name.clone(), Some(i)));
            }
        }

        let mut columns = left.columns.clone();
        columns.extend(right_columns.iter().map(|(n, _)| n.clone()));

        let mut joined = AttributeFrame {
            index_name: left.index_name.clone(),
            index: Vec::new(),
            columns,
            values: Vec::new(),
        };

        for (patient, left_row) in left.index.iter().zip(&left.values) {
            let matches: Vec<usize> = right_keys
                .iter()
                .enumerate()
                .filter(|&(_, key)| key == patient)
                .map(|(i, _)| i)
                .collect();

            if matches.is_empty() {
                let mut row = left_row.clone();
                row.extend(std::iter::repeat(String::new()).take(right_columns.len()));
                joined.index.push(patient.clone());
                joined.values.push(row);
                continue;
            }
            for m in matches {
                let mut row = left_row.clone();
                for (_, src) in &right_columns {
                    match src {
                        None => row.push(right.index[m].clone()),
                        Some(pos) => row.push(right.values[m][*pos].clone()),
                    }
                }
                joined.index.push(patient.clone());
                joined.values.push(row);
            }
        }

        debug!(
            "Joined clinical tables: {} patients -> {} rows",
            left.n_rows(),
            joined.n_rows()
        );
        Ok(joined)
    }

    /// Values of one clinical attribute for a set of samples (all samples
    /// when `samples` is `None`). Returns `(sample, value)` pairs.
    ///
    /// For synchronized sources, when a sample-type column exists only rows
    /// tagged primary are considered; a patient left with more than one
    /// primary row is an ambiguous mapping and a hard error.
    pub fn specific_samples_and_attribute(
        &self,
        samples: Option<&[String]>,
        attribute: &str,
    ) -> Result<Vec<(String, String)>> {
        let frame = match &self.backend {
            ClinicalBackend::UploadedFile(file) => AttributeFrame::read(file)?,
            ClinicalBackend::Synchronized { .. } => {
                let joined = self.joined_frame()?;
                let by_sample = joined.reindex_on(SAMPLE_ID_COLUMN)?;
                self.keep_primary_rows(by_sample)?
            }
        };

        let col = frame
            .column_position(attribute)
            .ok_or_else(|| FusionError::attribute_not_found(attribute))?;

        let mut out = Vec::new();
        match samples {
            Some(requested) => {
                for sample in requested {
                    let row = frame
                        .index
                        .iter()
                        .position(|k| k == sample)
                        .ok_or_else(|| FusionError::row_not_found(sample))?;
                    out.push((sample.clone(), frame.values[row][col].clone()));
                }
            }
            None => {
                for (sample, row) in frame.index.iter().zip(&frame.values) {
                    out.push((sample.clone(), row[col].clone()));
                }
            }
        }

        if out.is_empty() {
            return Err(FusionError::attribute_not_found(attribute));
        }
        Ok(out)
    }

    /// Keep only primary-sample rows when the sample-type column exists, and
    /// reject duplicate patients surviving the filter.
    fn keep_primary_rows(&self, frame: AttributeFrame) -> Result<AttributeFrame> {
        let type_col = match frame.column_position(SAMPLES_TYPE_COLUMN) {
            Some(pos) => pos,
            // No sample-type column: every row is considered primary
            None => return Ok(frame),
        };
        let patient_col = frame.column_position(PATIENT_ID_COLUMN);

        let mut out = AttributeFrame {
            index_name: frame.index_name.clone(),
            index: Vec::new(),
            columns: frame.columns.clone(),
            values: Vec::new(),
        };
        let mut seen_patients: HashSet<String> = HashSet::new();
        for (key, row) in frame.index.iter().zip(&frame.values) {
            if !row[type_col].eq_ignore_ascii_case(PRIMARY_TYPE_VALUE) {
                continue;
            }
            if let Some(pc) = patient_col {
                let patient = row[pc].clone();
                if !patient.is_empty() && !seen_patients.insert(patient.clone()) {
                    return Err(FusionError::ambiguous_mapping(patient));
                }
            }
            out.index.push(key.clone());
            out.values.push(row.clone());
        }
        Ok(out)
    }

    /// The two-column (event, time) frame for a survival tuple, keyed by
    /// sample. The event column is first, the time column second, always.
    pub fn survival_frame(&self, tuple: &SurvivalColumnTuple) -> Result<AttributeFrame> {
        let frame = match &self.backend {
            ClinicalBackend::UploadedFile(file) => AttributeFrame::read(file)?,
            ClinicalBackend::Synchronized { .. } => {
                self.joined_frame()?.reindex_on(SAMPLE_ID_COLUMN)?
            }
        };

        let event_col = frame
            .column_position(&tuple.event_column)
            .ok_or_else(|| FusionError::attribute_not_found(&tuple.event_column))?;
        let time_col = frame
            .column_position(&tuple.time_column)
            .ok_or_else(|| FusionError::attribute_not_found(&tuple.time_column))?;

        let mut out = AttributeFrame {
            index_name: frame.index_name.clone(),
            index: Vec::new(),
            columns: vec![tuple.event_column.clone(), tuple.time_column.clone()],
            values: Vec::new(),
        };
        for (key, row) in frame.index.iter().zip(&frame.values) {
            out.index.push(key.clone());
            out.values
                .push(vec![row[event_col].clone(), row[time_col].clone()]);
        }
        Ok(out)
    }

    /// Row count of the backing table(s)
    pub fn row_count(&self) -> Result<usize> {
        match &self.backend {
            ClinicalBackend::UploadedFile(file) => file.row_count(),
            ClinicalBackend::Synchronized { .. } => Ok(self.joined_frame()?.n_rows()),
        }
    }

    /// Number of clinical attributes
    pub fn attribute_count(&self) -> Result<usize> {
        Ok(self.attributes()?.len())
    }
}

impl SampleSource for ClinicalSource {
    fn samples(&self) -> Result<Vec<String>> {
        ClinicalSource::samples(self)
    }
}
