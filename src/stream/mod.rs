//! Stream combinators used by the capture pipeline

mod rechunk;

pub use rechunk::{Rechunk, RechunkExt};
