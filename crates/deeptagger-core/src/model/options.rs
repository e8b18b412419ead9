//! Hyperparameters of the conv-recurrent tagger.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TaggerError};

/// Named class weighting strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightStrategy {
    Balanced,
}

/// Per-class loss weights: an explicit list or a named strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LossWeights {
    Explicit(Vec<f32>),
    Strategy(WeightStrategy),
}

/// Options read by [`SequenceTagger::build`](super::SequenceTagger::build).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Ignored when pretrained word vectors are supplied.
    pub word_embeddings_size: usize,
    pub prefix_embeddings_size: usize,
    pub prefix_min_length: usize,
    pub prefix_max_length: usize,
    pub suffix_embeddings_size: usize,
    pub suffix_min_length: usize,
    pub suffix_max_length: usize,
    pub caps_embeddings_size: usize,
    pub freeze_embeddings: bool,
    pub emb_dropout: f32,
    pub conv_size: usize,
    pub kernel_size: usize,
    pub pool_length: usize,
    /// One entry per recurrent layer; only the first is used.
    pub hidden_size: Vec<usize>,
    pub bidirectional: bool,
    /// Add the two directions instead of concatenating them.
    pub sum_bidir: bool,
    pub dropout: f32,
    pub loss_weights: Option<LossWeights>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            word_embeddings_size: 100,
            prefix_embeddings_size: 20,
            prefix_min_length: 1,
            prefix_max_length: 5,
            suffix_embeddings_size: 20,
            suffix_min_length: 1,
            suffix_max_length: 5,
            caps_embeddings_size: 20,
            freeze_embeddings: false,
            emb_dropout: 0.4,
            conv_size: 100,
            kernel_size: 7,
            pool_length: 3,
            hidden_size: vec![100],
            bidirectional: true,
            sum_bidir: false,
            dropout: 0.5,
            loss_weights: None,
        }
    }
}

impl ModelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from a JSON file; missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let options: Self = serde_json::from_str(&content)?;
        debug!(path = ?path.as_ref(), "loaded model options");
        Ok(options)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_word_embeddings_size(mut self, size: usize) -> Self {
        self.word_embeddings_size = size;
        self
    }

    pub fn with_prefix_lengths(mut self, min: usize, max: usize) -> Self {
        self.prefix_min_length = min;
        self.prefix_max_length = max;
        self
    }

    pub fn with_suffix_lengths(mut self, min: usize, max: usize) -> Self {
        self.suffix_min_length = min;
        self.suffix_max_length = max;
        self
    }

    pub fn with_affix_embeddings_size(mut self, size: usize) -> Self {
        self.prefix_embeddings_size = size;
        self.suffix_embeddings_size = size;
        self
    }

    pub fn with_caps_embeddings_size(mut self, size: usize) -> Self {
        self.caps_embeddings_size = size;
        self
    }

    pub fn with_freeze_embeddings(mut self, freeze: bool) -> Self {
        self.freeze_embeddings = freeze;
        self
    }

    pub fn with_conv(mut self, conv_size: usize, kernel_size: usize, pool_length: usize) -> Self {
        self.conv_size = conv_size;
        self.kernel_size = kernel_size;
        self.pool_length = pool_length;
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = vec![hidden_size];
        self
    }

    pub fn with_bidirectional(mut self, bidirectional: bool, sum_bidir: bool) -> Self {
        self.bidirectional = bidirectional;
        self.sum_bidir = sum_bidir;
        self
    }

    pub fn with_dropout(mut self, emb_dropout: f32, dropout: f32) -> Self {
        self.emb_dropout = emb_dropout;
        self.dropout = dropout;
        self
    }

    pub fn with_loss_weights(mut self, weights: LossWeights) -> Self {
        self.loss_weights = Some(weights);
        self
    }

    /// First recurrent layer size.
    pub fn hidden(&self) -> Result<usize> {
        match self.hidden_size.first() {
            Some(&size) if size > 0 => Ok(size),
            _ => Err(TaggerError::InvalidConfig(
                "hidden_size needs a positive first entry".into(),
            )),
        }
    }

    /// Width of the max-pooled conv output, `conv_size / pool_length +
    /// pool_length / 2`.
    pub fn pooled_size(&self) -> usize {
        self.conv_size / self.pool_length.max(1) + self.pool_length / 2
    }

    /// Check the options that do not depend on the vocabularies.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TaggerError::InvalidConfig(msg));

        self.hidden()?;
        if self.conv_size == 0 {
            return invalid("conv_size must be positive".into());
        }
        if self.kernel_size % 2 == 0 {
            return invalid(format!(
                "kernel_size must be odd to keep the sequence length, got {}",
                self.kernel_size
            ));
        }
        if self.pool_length == 0 {
            return invalid("pool_length must be positive".into());
        }

        // Width max-pooling actually produces with padding pool_length / 2.
        let p = self.pool_length;
        let padded = self.conv_size + 2 * (p / 2);
        if padded < p {
            return invalid(format!(
                "conv_size {} is too small for pool_length {p}",
                self.conv_size
            ));
        }
        let pooled = (padded - p) / p + 1;
        if pooled != self.pooled_size() {
            return invalid(format!(
                "conv_size {} with pool_length {p} pools to {pooled} features, but the recurrent layer expects {}",
                self.conv_size,
                self.pooled_size()
            ));
        }

        for (name, min, max) in [
            ("prefix", self.prefix_min_length, self.prefix_max_length),
            ("suffix", self.suffix_min_length, self.suffix_max_length),
        ] {
            if min == 0 || min > max {
                return invalid(format!(
                    "{name} lengths must satisfy 1 <= min <= max, got {min}..={max}"
                ));
            }
        }
        for (name, size) in [
            ("word_embeddings_size", self.word_embeddings_size),
            ("prefix_embeddings_size", self.prefix_embeddings_size),
            ("suffix_embeddings_size", self.suffix_embeddings_size),
            ("caps_embeddings_size", self.caps_embeddings_size),
        ] {
            if size == 0 {
                return invalid(format!("{name} must be positive"));
            }
        }

        for (name, rate) in [("emb_dropout", self.emb_dropout), ("dropout", self.dropout)] {
            if !(0.0..1.0).contains(&rate) {
                return invalid(format!("{name} must be in [0, 1), got {rate}"));
            }
        }
        if self.sum_bidir && !self.bidirectional {
            return invalid("sum_bidir requires bidirectional".into());
        }
        match &self.loss_weights {
            Some(LossWeights::Strategy(WeightStrategy::Balanced)) => {
                Err(TaggerError::Unsupported("balanced loss weights".into()))
            }
            Some(LossWeights::Explicit(weights)) if weights.iter().any(|w| *w < 0.0) => {
                invalid("loss weights must be non-negative".into())
            }
            _ => Ok(()),
        }
    }
}
