pub mod codon;
pub mod translating;

pub use translating::{AaSnp, TranslatingReferenceSequence};
