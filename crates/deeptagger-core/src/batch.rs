//! # Batch Assembly
//!
//! Converts tokenized sentences into the id tensors a tagger consumes.
//! Every sentence is wrapped as `START tokens… STOP` and right-padded with
//! `PAD` to the longest sentence, so `words` is `(B, T)` with `T` = longest
//! sentence + 2. Per-token features cover only the `T - 2` inner positions.

use candle_core::{Device, Tensor};
use tracing::trace;

use crate::error::{Result, TaggerError};
use crate::features::{AffixExtractor, CapsClass, FeatureKind};
use crate::model::TaggerFields;
use crate::model::options::ModelOptions;
use crate::vocab::{PAD_ID, START_ID, STOP_ID, TAGS_PAD_ID, Vocabulary};

/// Id tensors for one batch. All are `u32`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(B, T)` word ids including START/STOP.
    pub words: Tensor,
    /// `(B, (T-2) * prefix windows)`
    pub prefixes: Option<Tensor>,
    /// `(B, (T-2) * suffix windows)`
    pub suffixes: Option<Tensor>,
    /// `(B, T-2)`
    pub caps: Option<Tensor>,
    /// `(B, T-2)` gold tag ids, `TAGS_PAD_ID` past each sentence.
    pub tags: Option<Tensor>,
}

impl Batch {
    pub fn new(words: Tensor) -> Self {
        Self {
            words,
            prefixes: None,
            suffixes: None,
            caps: None,
            tags: None,
        }
    }

    pub fn with_prefixes(mut self, prefixes: Tensor) -> Self {
        self.prefixes = Some(prefixes);
        self
    }

    pub fn with_suffixes(mut self, suffixes: Tensor) -> Self {
        self.suffixes = Some(suffixes);
        self
    }

    pub fn with_caps(mut self, caps: Tensor) -> Self {
        self.caps = Some(caps);
        self
    }

    pub fn with_tags(mut self, tags: Tensor) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Ids feeding the encoder of `kind`.
    pub fn ids_for(&self, kind: FeatureKind) -> Option<&Tensor> {
        match kind {
            FeatureKind::Word => Some(&self.words),
            FeatureKind::Prefix => self.prefixes.as_ref(),
            FeatureKind::Suffix => self.suffixes.as_ref(),
            FeatureKind::Caps => self.caps.as_ref(),
        }
    }

    /// `(B, T)` of the word tensor.
    pub fn dims(&self) -> Result<(usize, usize)> {
        Ok(self.words.dims2()?)
    }
}

/// Builds [`Batch`]es against the vocabularies of a tagger.
pub struct BatchBuilder<'a> {
    fields: &'a TaggerFields,
    prefixes: Option<AffixExtractor>,
    suffixes: Option<AffixExtractor>,
    device: Device,
}

impl<'a> BatchBuilder<'a> {
    /// Affix windows come from `options`; a feature is emitted only when
    /// `fields` has a vocabulary for it.
    pub fn new(fields: &'a TaggerFields, options: &ModelOptions, device: &Device) -> Result<Self> {
        let prefixes = match fields.prefixes {
            Some(_) => Some(AffixExtractor::prefixes(
                options.prefix_min_length,
                options.prefix_max_length,
            )?),
            None => None,
        };
        let suffixes = match fields.suffixes {
            Some(_) => Some(AffixExtractor::suffixes(
                options.suffix_min_length,
                options.suffix_max_length,
            )?),
            None => None,
        };
        Ok(Self {
            fields,
            prefixes,
            suffixes,
            device: device.clone(),
        })
    }

    /// Batch without gold tags.
    pub fn build<S: AsRef<str>>(&self, sentences: &[Vec<S>]) -> Result<Batch> {
        let (batch, _) = self.encode_inputs(sentences)?;
        Ok(batch)
    }

    /// Batch with gold tags; every tag list must match its sentence length.
    pub fn build_tagged<S: AsRef<str>, L: AsRef<str>>(
        &self,
        sentences: &[Vec<S>],
        tags: &[Vec<L>],
    ) -> Result<Batch> {
        if sentences.len() != tags.len() {
            return Err(TaggerError::ShapeMismatch(format!(
                "{} sentences but {} tag sequences",
                sentences.len(),
                tags.len()
            )));
        }
        let (batch, inner) = self.encode_inputs(sentences)?;

        let mut ids = Vec::with_capacity(tags.len() * inner);
        for (sentence, labels) in sentences.iter().zip(tags) {
            if sentence.len() != labels.len() {
                return Err(TaggerError::ShapeMismatch(format!(
                    "sentence of {} tokens has {} tags",
                    sentence.len(),
                    labels.len()
                )));
            }
            for label in labels {
                ids.push(self.fields.tags.encode(label.as_ref())?);
            }
            ids.extend(std::iter::repeat_n(TAGS_PAD_ID, inner - labels.len()));
        }
        let tags = Tensor::from_vec(ids, (tags.len(), inner), &self.device)?;
        Ok(batch.with_tags(tags))
    }

    fn encode_inputs<S: AsRef<str>>(&self, sentences: &[Vec<S>]) -> Result<(Batch, usize)> {
        if sentences.is_empty() {
            return Err(TaggerError::InvalidConfig("cannot build an empty batch".into()));
        }
        let batch_size = sentences.len();
        let inner = sentences.iter().map(Vec::len).max().unwrap_or(0);
        let seq_len = inner + 2;

        let mut words = Vec::with_capacity(batch_size * seq_len);
        for sentence in sentences {
            words.push(START_ID);
            for token in sentence {
                words.push(self.fields.words.encode(token.as_ref())?);
            }
            words.push(STOP_ID);
            words.extend(std::iter::repeat_n(PAD_ID, inner - sentence.len()));
        }
        let mut batch = Batch::new(Tensor::from_vec(words, (batch_size, seq_len), &self.device)?);

        if let (Some(extractor), Some(vocab)) = (&self.prefixes, &self.fields.prefixes) {
            batch.prefixes = Some(self.affix_ids(extractor, vocab, sentences, inner)?);
        }
        if let (Some(extractor), Some(vocab)) = (&self.suffixes, &self.fields.suffixes) {
            batch.suffixes = Some(self.affix_ids(extractor, vocab, sentences, inner)?);
        }
        if let Some(vocab) = &self.fields.caps {
            let mut ids = Vec::with_capacity(batch_size * inner);
            for sentence in sentences {
                for token in sentence {
                    ids.push(vocab.encode(CapsClass::of(token.as_ref()).name())?);
                }
                ids.extend(std::iter::repeat_n(PAD_ID, inner - sentence.len()));
            }
            batch.caps = Some(Tensor::from_vec(ids, (batch_size, inner), &self.device)?);
        }

        trace!(batch_size, seq_len, "assembled batch");
        Ok((batch, inner))
    }

    fn affix_ids<S: AsRef<str>>(
        &self,
        extractor: &AffixExtractor,
        vocab: &Vocabulary,
        sentences: &[Vec<S>],
        inner: usize,
    ) -> Result<Tensor> {
        let windows = extractor.windows();
        let mut ids = Vec::with_capacity(sentences.len() * inner * windows);
        for sentence in sentences {
            for token in sentence {
                ids.extend(extractor.encode(token.as_ref(), vocab)?);
            }
            ids.extend(std::iter::repeat_n(PAD_ID, (inner - sentence.len()) * windows));
        }
        Ok(Tensor::from_vec(
            ids,
            (sentences.len(), inner * windows),
            &self.device,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{SpecialTokens, UNK_ID};

    fn fields() -> TaggerFields {
        let specials = SpecialTokens::default();
        TaggerFields::new(
            Vocabulary::from_tokens(&specials, ["the", "dog", "barks"]),
            Vocabulary::tags_from_labels(&specials.pad, ["DET", "NOUN", "VERB"]),
        )
        .with_prefixes(Vocabulary::from_tokens(&specials, ["t", "th", "d"]))
        .with_caps(CapsClass::vocabulary(&specials))
    }

    fn options() -> ModelOptions {
        ModelOptions::default()
            .with_prefix_lengths(1, 3)
            .with_suffix_lengths(1, 2)
    }

    #[test]
    fn test_words_are_wrapped_and_padded() {
        let fields = fields();
        let builder = BatchBuilder::new(&fields, &options(), &Device::Cpu).unwrap();
        let batch = builder
            .build(&[vec!["the", "dog", "barks", "loudly"], vec!["dog", "barks"]])
            .unwrap();

        assert_eq!(batch.dims().unwrap(), (2, 6));
        let words = batch.words.to_vec2::<u32>().unwrap();
        assert_eq!(words[0], vec![START_ID, 4, 5, 6, UNK_ID, STOP_ID]);
        assert_eq!(words[1], vec![START_ID, 5, 6, STOP_ID, PAD_ID, PAD_ID]);
        assert!(batch.tags.is_none());
        assert!(batch.suffixes.is_none());
    }

    #[test]
    fn test_affix_and_caps_ids_cover_inner_positions() {
        let fields = fields();
        let builder = BatchBuilder::new(&fields, &options(), &Device::Cpu).unwrap();
        let batch = builder.build(&[vec!["The", "dog"], vec!["dog"]]).unwrap();

        let prefixes = batch.prefixes.as_ref().unwrap();
        assert_eq!(prefixes.dims(), &[2, 6]);
        let rows = prefixes.to_vec2::<u32>().unwrap();
        // "The": T, Th, The are unknown (case-sensitive); "dog": d, do, dog.
        assert_eq!(rows[0], vec![UNK_ID, UNK_ID, UNK_ID, 6, UNK_ID, UNK_ID]);
        assert_eq!(rows[1][3..], [PAD_ID, PAD_ID, PAD_ID]);

        let caps = batch.caps.as_ref().unwrap().to_vec2::<u32>().unwrap();
        let title = fields.caps.as_ref().unwrap().get("title").unwrap();
        let lower = fields.caps.as_ref().unwrap().get("lower").unwrap();
        assert_eq!(caps[0], vec![title, lower]);
        assert_eq!(caps[1], vec![lower, PAD_ID]);
    }

    #[test]
    fn test_tags_are_padded_with_tag_pad() {
        let fields = fields();
        let builder = BatchBuilder::new(&fields, &options(), &Device::Cpu).unwrap();
        let batch = builder
            .build_tagged(
                &[vec!["the", "dog"], vec!["barks"]],
                &[vec!["DET", "NOUN"], vec!["VERB"]],
            )
            .unwrap();
        let tags = batch.tags.unwrap().to_vec2::<u32>().unwrap();
        assert_eq!(tags, vec![vec![1, 2], vec![3, TAGS_PAD_ID]]);
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let fields = fields();
        let builder = BatchBuilder::new(&fields, &options(), &Device::Cpu).unwrap();
        let result = builder.build_tagged(&[vec!["dog"]], &[vec!["ADJ"]]);
        assert!(matches!(result, Err(TaggerError::UnknownToken(t)) if t == "ADJ"));
    }

    #[test]
    fn test_tag_count_must_match_tokens() {
        let fields = fields();
        let builder = BatchBuilder::new(&fields, &options(), &Device::Cpu).unwrap();
        let result = builder.build_tagged(&[vec!["the", "dog"]], &[vec!["DET"]]);
        assert!(matches!(result, Err(TaggerError::ShapeMismatch(_))));
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let fields = fields();
        let builder = BatchBuilder::new(&fields, &options(), &Device::Cpu).unwrap();
        let empty: Vec<Vec<&str>> = Vec::new();
        assert!(builder.build(&empty).is_err());
    }
}
