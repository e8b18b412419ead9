//! # Sequence Tagging Model
//!
//! [`SequenceTagger`] is the capability every architecture provides: build
//! from [`ModelOptions`], score a [`Batch`] as per-token tag
//! log-probabilities, compute the masked loss, and persist parameters.
//! [`Rcnn`] is the conv-recurrent implementation.

pub mod options;
pub mod params;
pub mod rcnn;
pub mod rnn;

use std::path::Path;

use candle_core::{D, DType, Tensor};
use tracing::debug;

use crate::batch::Batch;
use crate::error::{Result, TaggerError};
use crate::vocab::{SpecialTokens, TAGS_PAD_ID, Vocabulary};

pub use options::{LossWeights, ModelOptions, WeightStrategy};
pub use params::ParameterStore;
pub use rcnn::Rcnn;

/// Vocabularies a tagger is built over, plus optional pretrained word rows
/// aligned to `words`.
#[derive(Debug, Clone)]
pub struct TaggerFields {
    pub words: Vocabulary,
    pub tags: Vocabulary,
    pub prefixes: Option<Vocabulary>,
    pub suffixes: Option<Vocabulary>,
    pub caps: Option<Vocabulary>,
    /// `(words.len(), dim)`
    pub word_vectors: Option<Tensor>,
}

const WORDS_FILE: &str = "words.vocab";
const TAGS_FILE: &str = "tags.vocab";
const PREFIXES_FILE: &str = "prefixes.vocab";
const SUFFIXES_FILE: &str = "suffixes.vocab";
const CAPS_FILE: &str = "caps.vocab";

impl TaggerFields {
    pub fn new(words: Vocabulary, tags: Vocabulary) -> Self {
        Self {
            words,
            tags,
            prefixes: None,
            suffixes: None,
            caps: None,
            word_vectors: None,
        }
    }

    pub fn with_prefixes(mut self, vocab: Vocabulary) -> Self {
        self.prefixes = Some(vocab);
        self
    }

    pub fn with_suffixes(mut self, vocab: Vocabulary) -> Self {
        self.suffixes = Some(vocab);
        self
    }

    pub fn with_caps(mut self, vocab: Vocabulary) -> Self {
        self.caps = Some(vocab);
        self
    }

    pub fn with_word_vectors(mut self, vectors: Tensor) -> Self {
        self.word_vectors = Some(vectors);
        self
    }

    pub fn nb_classes(&self) -> usize {
        self.tags.len()
    }

    /// Write every vocabulary as `<name>.vocab` into `dir`. Pretrained
    /// vectors are not written; they live in the parameter file.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        self.words.save(dir.join(WORDS_FILE))?;
        self.tags.save(dir.join(TAGS_FILE))?;
        for (vocab, file) in [
            (&self.prefixes, PREFIXES_FILE),
            (&self.suffixes, SUFFIXES_FILE),
            (&self.caps, CAPS_FILE),
        ] {
            if let Some(vocab) = vocab {
                vocab.save(dir.join(file))?;
            }
        }
        Ok(())
    }

    /// Read vocabularies written by [`save`](Self::save). Optional feature
    /// vocabularies are enabled by the presence of their file.
    pub fn load<P: AsRef<Path>>(dir: P, specials: &SpecialTokens) -> Result<Self> {
        let dir = dir.as_ref();
        let optional = |file: &str| -> Result<Option<Vocabulary>> {
            let path = dir.join(file);
            if path.exists() {
                Ok(Some(Vocabulary::load(path, specials)?))
            } else {
                Ok(None)
            }
        };
        let fields = Self {
            words: Vocabulary::load(dir.join(WORDS_FILE), specials)?,
            tags: Vocabulary::load_tags(dir.join(TAGS_FILE), &specials.pad)?,
            prefixes: optional(PREFIXES_FILE)?,
            suffixes: optional(SUFFIXES_FILE)?,
            caps: optional(CAPS_FILE)?,
            word_vectors: None,
        };
        debug!(
            dir = ?dir,
            words = fields.words.len(),
            tags = fields.tags.len(),
            "loaded tagger vocabularies"
        );
        Ok(fields)
    }
}

/// A trainable per-token tagger.
///
/// `forward` must return log-probabilities; the probability and class
/// helpers rely on it.
pub trait SequenceTagger {
    /// Allocate every layer. Fails when called a second time.
    fn build(&mut self, options: &ModelOptions) -> Result<()>;

    fn is_built(&self) -> bool;

    fn nb_classes(&self) -> usize;

    fn parameters(&self) -> &ParameterStore;

    fn parameters_mut(&mut self) -> &mut ParameterStore;

    /// `(B, T-2, C)` log-probabilities; dropout is active when `train`.
    fn forward_t(&self, batch: &Batch, train: bool) -> Result<Tensor>;

    /// Scalar loss of `pred` `(B, T-2, C)` against gold ids `(B, T-2)`.
    fn loss(&self, pred: &Tensor, gold: &Tensor) -> Result<Tensor>;

    fn forward(&self, batch: &Batch) -> Result<Tensor> {
        self.forward_t(batch, false)
    }

    fn predict_proba(&self, batch: &Batch) -> Result<Tensor> {
        Ok(self.forward(batch)?.exp()?)
    }

    /// `(B, T-2)` most probable tag ids.
    fn predict_classes(&self, batch: &Batch) -> Result<Tensor> {
        Ok(self.predict_proba(batch)?.argmax(D::Minus1)?)
    }

    fn save(&self, path: &Path) -> Result<()> {
        if !self.is_built() {
            return Err(TaggerError::NotBuilt);
        }
        debug!(path = ?path, "saving model weights");
        self.parameters().save(path)
    }

    /// Restore weights saved by [`save`](Self::save) into a model built with
    /// the same options.
    fn load(&mut self, path: &Path) -> Result<()> {
        if !self.is_built() {
            return Err(TaggerError::NotBuilt);
        }
        debug!(path = ?path, "loading model weights");
        self.parameters_mut().load(path)
    }
}

/// Mean negative log-likelihood over positions whose gold id is not
/// `TAGS_PAD_ID`, optionally weighted per class.
///
/// With weights the mean is taken over the summed weights of the counted
/// positions. When nothing is counted the loss is exactly zero.
pub fn masked_nll(pred: &Tensor, gold: &Tensor, class_weights: Option<&Tensor>) -> Result<Tensor> {
    let nb_classes = pred.dim(D::Minus1)?;
    let count = gold.elem_count();
    if pred.elem_count() != count * nb_classes {
        return Err(TaggerError::ShapeMismatch(format!(
            "predictions {:?} do not match gold {:?}",
            pred.dims(),
            gold.dims()
        )));
    }

    // (B*T, C) and (B*T,)
    let pred = pred.reshape((count, nb_classes))?;
    let gold = gold.reshape(count)?.to_dtype(DType::U32)?;

    let picked = pred.gather(&gold.unsqueeze(1)?, 1)?.squeeze(1)?;
    let mut weights = gold.ne(TAGS_PAD_ID)?.to_dtype(pred.dtype())?;
    if let Some(class_weights) = class_weights {
        weights = (weights * class_weights.index_select(&gold, 0)?)?;
    }

    let total = weights.sum_all()?.to_scalar::<f32>()?;
    if total == 0.0 {
        return Ok(Tensor::zeros((), pred.dtype(), pred.device())?);
    }
    Ok((picked * weights)?
        .sum_all()?
        .affine(-1.0 / total as f64, 0.0)?)
}
