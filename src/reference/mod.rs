pub mod fasta;
pub mod library;

pub use fasta::{FastaReferenceCache, ReferenceSequence};
pub use library::{PeptideModel, ReferenceLibrary};
