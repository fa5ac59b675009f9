use thiserror::Error;

pub type Result<T> = std::result::Result<T, FusionError>;

/// Error taxonomy of the fusion pipeline.
///
/// The variants that map to terminal experiment states
/// ([`FusionError::NoSamplesInCommon`], [`FusionError::Stopped`]) must stay
/// distinguishable from transient failures so the worker can pick the right
/// terminal state instead of retrying.
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("no samples in common between the provided sources")]
    NoSamplesInCommon,

    #[error("row not found in source: {id}")]
    RowNotFound { id: String },

    #[error("clinical attribute not found: {attribute}")]
    AttributeNotFound { attribute: String },

    #[error("ambiguous clinical mapping: patient {patient} has multiple primary samples")]
    AmbiguousClinicalMapping { patient: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("numerical issues: {message}")]
    NumericalError { message: String },

    #[error("stopped by the user")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tabular parse error: {0}")]
    Csv(#[from] csv::Error),
}

impl FusionError {
    pub fn row_not_found(id: impl Into<String>) -> Self {
        Self::RowNotFound { id: id.into() }
    }

    pub fn attribute_not_found(attribute: impl Into<String>) -> Self {
        Self::AttributeNotFound {
            attribute: attribute.into(),
        }
    }

    pub fn ambiguous_mapping(patient: impl Into<String>) -> Self {
        Self::AmbiguousClinicalMapping {
            patient: patient.into(),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_variants_are_distinguishable() {
        let err = FusionError::NoSamplesInCommon;
        assert!(matches!(err, FusionError::NoSamplesInCommon));

        let err = FusionError::row_not_found("GENE1");
        assert!(matches!(err, FusionError::RowNotFound { .. }));
        assert!(err.to_string().contains("GENE1"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FusionError = io.into();
        assert!(matches!(err, FusionError::Io(_)));
    }
}
