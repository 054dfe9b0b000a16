//! Statistical aggregation of variation results.
//!
//! Combines the central result with scale/PDF variation members into
//! systematic uncertainty bands.

mod uncertainty;

pub use uncertainty::{check_compatible, combine, fold_variation};
