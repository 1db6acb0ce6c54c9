//! # Checkpoints
//!
//! A trained model together with everything needed to rebuild trees against
//! it: the category table, the substate vector and the binarization
//! settings. Stored as JSON.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GrammarError, Result};
use crate::grammar::Grammar;
use crate::lexicon::Lexicon;
use crate::tree::Binarization;
use crate::vocabulary::CategoryVocabulary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub lexicon: Lexicon,
    pub grammar: Grammar,
    pub vocabulary: CategoryVocabulary,
    pub substates: Vec<usize>,
    pub vertical: usize,
    pub horizontal: usize,
    pub binarization: Binarization,
}

impl Checkpoint {
    /// Write the checkpoint to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| GrammarError::io(e, path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush().map_err(|e| GrammarError::io(e, path))?;
        Ok(())
    }

    /// Read a checkpoint written by [`Checkpoint::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| GrammarError::io(e, path))?;
        let mut checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))?;
        checkpoint.vocabulary.reindex();
        Ok(checkpoint)
    }
}
