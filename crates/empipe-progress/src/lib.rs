#![forbid(unsafe_code)]
//! empipe-progress: the init/step/done progress contract and a fractional
//! aggregator that maps several sub-tasks onto one user-facing indicator.
//!
//! Rendering is out of scope; anything implementing [`ProgressIndicator`]
//! can sit at the end of the chain.

pub mod fractional;
pub mod indicator;

pub use fractional::{subindicator_id, FractionalProgress, FractionalSubindicator};
pub use indicator::{NullIndicator, ProgressHandle, ProgressIndicator};
