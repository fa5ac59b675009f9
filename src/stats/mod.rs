pub mod correction;
pub mod correlation;
pub mod distribution;
pub mod properties;

pub use correction::{adjust, AdjustmentMethod};
pub use correlation::{correlate, CorrelationMethod};
pub use properties::{compute_statistical_properties, SourceStatisticalProperties};
