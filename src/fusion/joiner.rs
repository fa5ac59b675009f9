use crate::error::Result;
use crate::fusion::{observations_from_frame, CancelFlag, EventCoercion, SurvivalObservation};
use crate::source::clinical::AttributeFrame;
use crate::source::{Frame, Source};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// One molecular source paired with the molecules requested from it
pub struct JoinEntry<'a> {
    pub source: &'a Source,
    pub molecules: &'a [String],
}

/// Restrict a chunk to the samples in common and the requested molecules,
/// then disambiguate its row labels with the source's kind tag so
/// identically-named molecules from different source types never collide.
pub fn process_chunk(
    chunk: Frame,
    tag: &str,
    molecules: &HashSet<String>,
    samples_in_common: &[String],
) -> Frame {
    // Columns the chunk does not have are simply absent, no error
    let mut chunk = chunk.select_columns(samples_in_common);
    chunk = chunk.filter_rows(molecules);
    chunk.suffix_index(tag);
    chunk
}

/// Build the unified long-format molecules file for an experiment.
///
/// Every source is streamed in bounded chunks (at no point is more than one
/// chunk held in memory) and the processed chunks are appended to a
/// temporary TSV whose header is written exactly once. The caller owns the
/// returned handle and deletes the file once consumed.
pub fn generate_molecules_file(
    entries: &[Option<JoinEntry<'_>>],
    samples_in_common: &[String],
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<NamedTempFile> {
    let mut temp_file = tempfile::Builder::new().suffix(".tsv").tempfile()?;
    let mut header_written = false;
    let mut rows_written = 0usize;

    for entry in entries.iter().flatten() {
        let tag = entry.source.kind().tag();
        let molecules: HashSet<String> = entry.molecules.iter().cloned().collect();

        for chunk in entry.source.chunked_frames(chunk_size)? {
            cancel.check()?;
            let processed = process_chunk(chunk?, tag, &molecules, samples_in_common);
            if processed.is_empty() {
                continue;
            }
            rows_written += processed.n_rows();
            processed.write_tsv(&mut temp_file, !header_written)?;
            header_written = true;
        }
    }

    // A fully empty result still needs a parsable header
    if !header_written {
        let empty = Frame::with_columns(samples_in_common.to_vec());
        empty.write_tsv(&mut temp_file, true)?;
    }

    temp_file.flush()?;
    info!(
        "Unified molecules file holds {} rows over {} samples",
        rows_written,
        samples_in_common.len()
    );
    Ok(temp_file)
}

/// Drop rows whose values are all missing or infinite. NaN and ±inf are
/// treated identically for this purpose.
pub fn clean_dataset(frame: Frame) -> Frame {
    let mut out = Frame::with_columns(frame.columns.clone());
    for (label, row) in frame.index.into_iter().zip(frame.values) {
        if row.iter().any(|v| v.is_finite()) {
            out.push_row(label, row);
        }
    }
    out
}

/// Molecules and clinical data aligned and formatted for a model
pub struct FormattedData {
    /// Unified molecules frame restricted to the valid samples
    pub molecules: Frame,
    /// Samples backing the columns of `molecules`, in column order
    pub samples: Vec<String>,
    /// Normalized event/time pairs, aligned with `samples`
    pub observations: Vec<SurvivalObservation>,
}

/// Read the unified molecules file and the clinical frame and align them.
///
/// For regression models, clinical rows with non-positive survival time are
/// dropped before alignment: the surviving sample set, not the original
/// intersection, becomes authoritative for the molecule table.
pub fn format_data(
    molecules_path: &Path,
    clinical: &AttributeFrame,
    coercion: &EventCoercion,
    is_regression: bool,
) -> Result<FormattedData> {
    let molecules = Frame::read_tsv(molecules_path)?;
    let all = observations_from_frame(clinical, coercion);

    let mut valid: Vec<(String, SurvivalObservation)> = Vec::new();
    for (sample, observation) in clinical.index.iter().zip(all) {
        // NaN times fail this comparison too and are dropped with the rest
        if is_regression && !(observation.time > 0.0) {
            debug!("Dropping sample {} with non-positive time", sample);
            continue;
        }
        valid.push((sample.clone(), observation));
    }

    let valid_samples: Vec<String> = valid.iter().map(|(s, _)| s.clone()).collect();
    let molecules = molecules.select_columns(&valid_samples);

    // Only samples the molecule table actually carries survive the alignment
    let samples = molecules.columns.clone();
    let observations: Vec<SurvivalObservation> = valid
        .into_iter()
        .filter(|(s, _)| samples.contains(s))
        .map(|(_, o)| o)
        .collect();

    let molecules = clean_dataset(molecules);

    Ok(FormattedData {
        molecules,
        samples,
        observations,
    })
}
