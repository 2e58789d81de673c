use crate::error::{PipelineError, Result};
use crate::utils::bam_reader::BamReaderFactory;
use bio::io::fasta::IndexedReader;
use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;

/// One reference sequence, upper-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSequence {
    pub name: String,
    pub bases: Vec<u8>,
}

impl ReferenceSequence {
    pub fn new(name: impl Into<String>, bases: &[u8]) -> Self {
        Self {
            name: name.into(),
            bases: bases.to_ascii_uppercase(),
        }
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn base_at(&self, position: u32) -> Option<u8> {
        self.bases.get(position as usize).copied()
    }
}

/// Indexed FASTA reader that loads each sequence once.
pub struct FastaReferenceCache {
    reader: IndexedReader<File>,
    sequences: HashMap<String, Rc<ReferenceSequence>>,
}

impl FastaReferenceCache {
    pub fn open(path: &Path) -> Result<Self> {
        BamReaderFactory::require_fasta_index(path)?;
        let reader = IndexedReader::from_file(&path)
            .map_err(|e| PipelineError::Reference(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            reader,
            sequences: HashMap::new(),
        })
    }

    pub fn get(&mut self, name: &str) -> Result<Rc<ReferenceSequence>> {
        if let Some(sequence) = self.sequences.get(name) {
            return Ok(Rc::clone(sequence));
        }

        self.reader
            .fetch_all(name)
            .map_err(|e| PipelineError::Reference(format!("Unable to find sequence {}: {}", name, e)))?;
        let mut bases = Vec::new();
        self.reader.read(&mut bases)?;
        debug!("loaded reference {} ({} bp)", name, bases.len());

        let sequence = Rc::new(ReferenceSequence::new(name, &bases));
        self.sequences.insert(name.to_string(), Rc::clone(&sequence));
        Ok(sequence)
    }
}
