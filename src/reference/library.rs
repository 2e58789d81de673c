//! Resolution of reference sequence names to numeric ids, and the open reading frames
//! annotated on each reference.
//!
//! Ids come from `<fasta stem>.idKey.txt` next to the FASTA (`RowId<TAB>Name`, header optional).
//! Names the key does not list may still carry their id as a prefix, as in `12|SIVmac239`.

use crate::error::{PipelineError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// A peptide translated from one reference sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeptideModel {
    pub id: i64,
    pub name: String,
    pub ref_nt_id: i64,
    /// 1-based, inclusive exon coordinates on the reference, in coding order.
    pub exons: Vec<(u32, u32)>,
    /// True when the peptide is encoded on the reverse strand.
    #[serde(default)]
    pub complement: bool,
    /// Amino acid sequence, one letter per residue.
    pub sequence: String,
}

impl PeptideModel {
    pub fn residue_at(&self, aa_position: u32) -> Option<char> {
        if aa_position == 0 {
            return None;
        }
        self.sequence.chars().nth(aa_position as usize - 1)
    }

    pub fn len(&self) -> usize {
        self.sequence.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceLibrary {
    ids: HashMap<String, i64>,
    peptides: HashMap<i64, Vec<PeptideModel>>,
}

impl ReferenceLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_key_path(fasta: &Path) -> PathBuf {
        let stem = fasta
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        fasta.with_file_name(format!("{}.idKey.txt", stem))
    }

    /// Reads the id key next to `fasta` when present and the peptide annotations when given.
    pub fn load(fasta: &Path, peptides: Option<&Path>) -> Result<Self> {
        let mut library = Self::new();

        let id_key = Self::id_key_path(fasta);
        if id_key.exists() {
            library.read_id_key(open(&id_key)?)?;
            info!("Loaded {} sequence ids from {}", library.ids.len(), id_key.display());
        } else {
            warn!("No id key found at {}, ids will be parsed from sequence names", id_key.display());
        }

        if let Some(path) = peptides {
            let models: Vec<PeptideModel> = serde_json::from_reader(open(path)?)?;
            info!("Loaded {} peptide annotations from {}", models.len(), path.display());
            for model in models {
                library = library.with_peptide(model);
            }
        }

        Ok(library)
    }

    fn read_id_key(&mut self, reader: Box<dyn Read>) -> Result<()> {
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let mut fields = line.split('\t');
            let (Some(id), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };
            // header line, or anything else without a numeric id
            let Ok(id) = id.trim().parse::<i64>() else {
                continue;
            };
            self.ids.insert(name.trim().to_string(), id);
        }
        Ok(())
    }

    pub fn with_sequence_id(mut self, name: impl Into<String>, id: i64) -> Self {
        self.ids.insert(name.into(), id);
        self
    }

    pub fn with_peptide(mut self, model: PeptideModel) -> Self {
        self.peptides.entry(model.ref_nt_id).or_default().push(model);
        self
    }

    pub fn resolve_sequence_id(&self, name: &str) -> Option<i64> {
        if let Some(id) = self.ids.get(name) {
            return Some(*id);
        }
        let (prefix, _) = name.split_once('|')?;
        prefix.trim().parse().ok()
    }

    /// Like [`resolve_sequence_id`](Self::resolve_sequence_id), failing for unknown names.
    pub fn require_sequence_id(&self, name: &str) -> Result<i64> {
        self.resolve_sequence_id(name)
            .ok_or_else(|| PipelineError::UnknownSequence(name.to_string()))
    }

    pub fn peptides_for(&self, ref_nt_id: i64) -> &[PeptideModel] {
        self.peptides.get(&ref_nt_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn open(path: &Path) -> Result<Box<dyn Read>> {
    let (reader, _format) = niffler::from_path(path)
        .map_err(|e| PipelineError::Reference(format!("{}: {}", path.display(), e)))?;
    Ok(reader)
}
