//! # Vocabulary
//!
//! Ordered token ↔ id mappings. Word-like vocabularies (words, affixes, caps
//! classes) reserve `PAD`, `UNK`, `START` and `STOP` at ids `0..=3`; tag
//! vocabularies reserve only `PAD` at id 0.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TaggerError};
use crate::vectors::VectorTable;

/// Id of the padding token in every word-like vocabulary.
pub const PAD_ID: u32 = 0;
/// Id of the unknown token in every word-like vocabulary.
pub const UNK_ID: u32 = 1;
/// Id of the sentence start marker.
pub const START_ID: u32 = 2;
/// Id of the sentence end marker.
pub const STOP_ID: u32 = 3;
/// Id of the padding tag in tag vocabularies.
pub const TAGS_PAD_ID: u32 = 0;

/// Spellings of the reserved tokens.
///
/// The ids are fixed by position (`PAD_ID`, `UNK_ID`, `START_ID`, `STOP_ID`);
/// only the spellings vary. A value is passed to each component that needs
/// it instead of living in global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub pad: String,
    pub unk: String,
    pub start: String,
    pub stop: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            pad: "<pad>".to_string(),
            unk: "<unk>".to_string(),
            start: "<s>".to_string(),
            stop: "</s>".to_string(),
        }
    }
}

impl SpecialTokens {
    /// Spellings ordered by their reserved id.
    pub fn in_id_order(&self) -> [&str; 4] {
        [&self.pad, &self.unk, &self.start, &self.stop]
    }
}

/// Bijective token ↔ id mapping. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    itos: Vec<String>,
    stoi: HashMap<String, u32>,
    unk_id: Option<u32>,
    reserved: usize,
}

impl Vocabulary {
    /// Empty word-like vocabulary holding only the four special tokens.
    pub fn new(specials: &SpecialTokens) -> Self {
        Self::with_reserved(&specials.in_id_order(), Some(UNK_ID))
    }

    /// Empty tag vocabulary holding only the padding tag.
    pub fn for_tags(pad: &str) -> Self {
        Self::with_reserved(&[pad], None)
    }

    fn with_reserved(reserved: &[&str], unk_id: Option<u32>) -> Self {
        let mut vocab = Self {
            itos: Vec::with_capacity(reserved.len()),
            stoi: HashMap::with_capacity(reserved.len()),
            unk_id,
            reserved: reserved.len(),
        };
        for token in reserved {
            vocab.push(token);
        }
        vocab
    }

    /// Word-like vocabulary from an ordered token list. Duplicates and
    /// tokens spelled like a special are skipped.
    pub fn from_tokens<I, S>(specials: &SpecialTokens, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::new(specials);
        vocab.extend(tokens);
        vocab
    }

    /// Tag vocabulary from an ordered label list.
    pub fn tags_from_labels<I, S>(pad: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::for_tags(pad);
        vocab.extend(labels);
        vocab
    }

    fn extend<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            self.push(token.as_ref());
        }
    }

    fn push(&mut self, token: &str) -> u32 {
        if let Some(&id) = self.stoi.get(token) {
            return id;
        }
        let id = self.itos.len() as u32;
        self.itos.push(token.to_string());
        self.stoi.insert(token.to_string(), id);
        id
    }

    /// Load a word-like vocabulary saved one token per line.
    pub fn load<P: AsRef<Path>>(path: P, specials: &SpecialTokens) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let vocab = Self::from_tokens(specials, content.lines().filter(|l| !l.is_empty()));
        debug!(path = ?path.as_ref(), size = vocab.len(), "loaded vocabulary");
        Ok(vocab)
    }

    /// Load a tag vocabulary saved one label per line.
    pub fn load_tags<P: AsRef<Path>>(path: P, pad: &str) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let vocab = Self::tags_from_labels(pad, content.lines().filter(|l| !l.is_empty()));
        debug!(path = ?path.as_ref(), size = vocab.len(), "loaded tag vocabulary");
        Ok(vocab)
    }

    /// Write every token, specials included, one per line.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut content = self.itos.join("\n");
        content.push('\n');
        fs::write(path, content)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }

    /// Number of reserved entries at the front of the table.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn pad_id(&self) -> u32 {
        PAD_ID
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.unk_id
    }

    /// Exact id lookup, no UNK fallback.
    pub fn get(&self, token: &str) -> Option<u32> {
        self.stoi.get(token).copied()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.stoi.contains_key(token)
    }

    /// Id of `token`, falling back to UNK when the vocabulary has one.
    pub fn encode(&self, token: &str) -> Result<u32> {
        self.get(token)
            .or(self.unk_id)
            .ok_or_else(|| TaggerError::UnknownToken(token.to_string()))
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.itos.get(id as usize).map(String::as_str)
    }

    /// Tokens ordered by id.
    pub fn itos(&self) -> &[String] {
        &self.itos
    }
}

/// Counts tokens and turns them into a [`Vocabulary`].
#[derive(Debug, Clone)]
pub struct VocabularyBuilder {
    counts: HashMap<String, usize>,
    max_size: Option<usize>,
    min_frequency: usize,
    keep_rare_with_vectors: bool,
    add_embeddings_vocab: bool,
}

impl Default for VocabularyBuilder {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
            max_size: None,
            min_frequency: 1,
            keep_rare_with_vectors: false,
            add_embeddings_vocab: false,
        }
    }
}

impl VocabularyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of non-special tokens taken from the counts.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_min_frequency(mut self, min_frequency: usize) -> Self {
        self.min_frequency = min_frequency.max(1);
        self
    }

    /// Keep tokens under the frequency threshold if the vector table has them.
    pub fn keep_rare_with_vectors(mut self, keep: bool) -> Self {
        self.keep_rare_with_vectors = keep;
        self
    }

    /// Append every token of the vector table after the counted tokens.
    pub fn add_embeddings_vocab(mut self, add: bool) -> Self {
        self.add_embeddings_vocab = add;
        self
    }

    pub fn add(&mut self, token: &str) {
        *self.counts.entry(token.to_string()).or_insert(0) += 1;
    }

    pub fn add_all<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            self.add(token.as_ref());
        }
    }

    /// Build a word-like vocabulary. `vectors` is only consulted by the
    /// vector-aware options.
    pub fn build(&self, specials: &SpecialTokens, vectors: Option<&VectorTable>) -> Vocabulary {
        let mut vocab = Vocabulary::new(specials);
        vocab.extend(self.ranked(vectors));
        if self.add_embeddings_vocab {
            if let Some(table) = vectors {
                vocab.extend(table.itos());
            }
        }
        debug!(size = vocab.len(), "built vocabulary");
        vocab
    }

    /// Build a tag vocabulary; the frequency threshold still applies.
    pub fn build_tags(&self, pad: &str) -> Vocabulary {
        let mut vocab = Vocabulary::for_tags(pad);
        vocab.extend(self.ranked(None));
        vocab
    }

    /// Counted tokens passing the filters, most frequent first, ties by token.
    fn ranked(&self, vectors: Option<&VectorTable>) -> Vec<&str> {
        let mut entries: Vec<(&str, usize)> = self
            .counts
            .iter()
            .filter(|(token, count)| {
                **count >= self.min_frequency
                    || (self.keep_rare_with_vectors
                        && vectors.is_some_and(|table| table.contains(token)))
            })
            .map(|(token, count)| (token.as_str(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let limit = self.max_size.unwrap_or(entries.len());
        entries.into_iter().take(limit).map(|(token, _)| token).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("deeptagger-vocab-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_special_ids_are_reserved_in_order() {
        let vocab = Vocabulary::from_tokens(&SpecialTokens::default(), ["dog", "barks"]);

        assert_eq!(vocab.get("<pad>"), Some(PAD_ID));
        assert_eq!(vocab.get("<unk>"), Some(UNK_ID));
        assert_eq!(vocab.get("<s>"), Some(START_ID));
        assert_eq!(vocab.get("</s>"), Some(STOP_ID));
        assert_eq!(vocab.get("dog"), Some(4));
        assert_eq!(vocab.get("barks"), Some(5));
        assert_eq!(vocab.len(), 6);
    }

    #[test]
    fn test_encode_falls_back_to_unk() {
        let vocab = Vocabulary::from_tokens(&SpecialTokens::default(), ["dog"]);
        assert_eq!(vocab.encode("cat").unwrap(), UNK_ID);

        let tags = Vocabulary::tags_from_labels("<pad>", ["NOUN", "VERB"]);
        assert_eq!(tags.get("<pad>"), Some(TAGS_PAD_ID));
        assert_eq!(tags.encode("VERB").unwrap(), 2);
        assert!(matches!(tags.encode("ADJ"), Err(TaggerError::UnknownToken(_))));
    }

    #[test]
    fn test_duplicates_and_specials_are_not_reassigned() {
        let vocab = Vocabulary::from_tokens(&SpecialTokens::default(), ["a", "<pad>", "a", "b"]);
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.token(5), Some("b"));
    }

    #[test]
    fn test_builder_orders_by_frequency_then_token() {
        let mut builder = VocabularyBuilder::new();
        builder.add_all(["the", "dog", "the", "cat", "the", "dog"]);
        let vocab = builder.build(&SpecialTokens::default(), None);

        assert_eq!(&vocab.itos()[4..], &["the", "dog", "cat"]);
    }

    #[test]
    fn test_builder_min_frequency_and_max_size() {
        let mut builder = VocabularyBuilder::new().with_min_frequency(2).with_max_size(1);
        builder.add_all(["a", "a", "b", "b", "b", "c"]);
        let vocab = builder.build(&SpecialTokens::default(), None);

        assert_eq!(vocab.len(), 5);
        assert!(vocab.contains("b"));
        assert!(!vocab.contains("a"));
        assert!(!vocab.contains("c"));
    }

    #[test]
    fn test_save_and_load_preserve_ids() {
        let path = scratch_path("roundtrip.vocab");
        let vocab = Vocabulary::from_tokens(&SpecialTokens::default(), ["dog", "barks"]);
        vocab.save(&path).unwrap();

        let loaded = Vocabulary::load(&path, &SpecialTokens::default()).unwrap();
        assert_eq!(loaded, vocab);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_list_without_specials() {
        let path = scratch_path("plain.vocab");
        std::fs::write(&path, "dog\nbarks\n").unwrap();

        let loaded = Vocabulary::load(&path, &SpecialTokens::default()).unwrap();
        assert_eq!(loaded.get("dog"), Some(4));

        let _ = std::fs::remove_file(&path);
    }
}
