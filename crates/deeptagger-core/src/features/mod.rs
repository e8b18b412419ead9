//! # Feature Encoders
//!
//! One embedding table per enabled input feature. The word table is always
//! present; prefix, suffix and caps tables exist only when their vocabulary
//! was supplied. Encoders only embed ids: boundary padding and window
//! reshaping happen in [`FeatureSlot::embed`].

pub mod extract;

use std::fmt;

use candle_core::{DType, Module, Tensor};
use candle_nn::{Embedding, Init};
use tracing::debug;

use crate::batch::Batch;
use crate::error::{Result, TaggerError};
use crate::model::params::ParameterStore;

pub use extract::{AffixExtractor, AffixKind, CapsClass};

/// Input feature a table embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Word,
    Prefix,
    Suffix,
    Caps,
}

impl FeatureKind {
    /// Parameter name prefix of the feature's table.
    pub fn param_prefix(&self) -> &'static str {
        match self {
            FeatureKind::Word => "word_emb",
            FeatureKind::Prefix => "prefixes_emb",
            FeatureKind::Suffix => "suffixes_emb",
            FeatureKind::Caps => "caps_emb",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureKind::Word => "word",
            FeatureKind::Prefix => "prefix",
            FeatureKind::Suffix => "suffix",
            FeatureKind::Caps => "caps",
        };
        f.write_str(name)
    }
}

/// Shape and initial contents of one embedding table.
#[derive(Debug, Clone)]
pub struct EmbeddingSpec {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub padding_id: u32,
    /// `(vocab_size, embedding_dim)` rows to start from.
    pub pretrained: Option<Tensor>,
    pub freeze: bool,
}

/// A single embedding table registered in a [`ParameterStore`].
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    name: String,
    embedding: Embedding,
    vocab_size: usize,
    dim: usize,
    /// Padding id and its row as first built.
    padding_row: Option<(usize, Tensor)>,
}

impl FeatureEncoder {
    /// Register `<name>.weight` and wrap it.
    ///
    /// Without pretrained rows the table is drawn from N(0, 1) with the
    /// padding row zeroed. Pretrained rows must match `vocab_size`, and their
    /// width overrides `embedding_dim`.
    ///
    /// The padding row is only fixed here. Gradients still reach it, so
    /// training loops call [`restore_padding_row`](Self::restore_padding_row)
    /// after each optimizer step.
    pub fn build(store: &mut ParameterStore, name: &str, spec: EmbeddingSpec) -> Result<Self> {
        let weight_name = format!("{name}.weight");
        let weight = match &spec.pretrained {
            Some(pretrained) => {
                let (rows, _) = pretrained.dims2()?;
                if rows != spec.vocab_size {
                    return Err(TaggerError::ShapeMismatch(format!(
                        "{name}: pretrained table has {rows} rows for a vocabulary of {}",
                        spec.vocab_size
                    )));
                }
                store.create_from(&weight_name, pretrained)?
            }
            None => {
                if spec.embedding_dim == 0 {
                    return Err(TaggerError::InvalidConfig(format!(
                        "{name}: embedding size must be positive"
                    )));
                }
                let shape = (spec.vocab_size, spec.embedding_dim);
                let random = store.create(
                    &weight_name,
                    shape,
                    Init::Randn {
                        mean: 0.0,
                        stdev: 1.0,
                    },
                )?;
                let pad = spec.padding_id as usize;
                if pad < spec.vocab_size {
                    let keep: Vec<f32> = (0..spec.vocab_size)
                        .map(|row| if row == pad { 0.0 } else { 1.0 })
                        .collect();
                    let keep = Tensor::from_vec(keep, (spec.vocab_size, 1), store.device())?;
                    let zeroed = random.broadcast_mul(&keep)?;
                    store.set(&weight_name, &zeroed)?;
                }
                random
            }
        };
        if spec.freeze {
            store.freeze(&weight_name);
        }

        let (vocab_size, dim) = weight.dims2()?;
        let pad = spec.padding_id as usize;
        let padding_row = if pad < vocab_size {
            // Detached copy; `weight` shares storage with the variable.
            let row = weight.narrow(0, pad, 1)?.to_dtype(DType::F32)?.copy()?;
            Some((pad, row))
        } else {
            None
        };
        debug!(name, vocab_size, dim, frozen = spec.freeze, "built embedding table");
        Ok(Self {
            name: name.to_string(),
            embedding: Embedding::new(weight, dim),
            vocab_size,
            dim,
            padding_row,
        })
    }

    /// Reset the padding row in `store` to its value at build time.
    pub fn restore_padding_row(&self, store: &mut ParameterStore) -> Result<()> {
        let Some((pad, row)) = &self.padding_row else {
            return Ok(());
        };
        let weight_name = format!("{}.weight", self.name);
        let weight = store
            .get(&weight_name)
            .ok_or_else(|| TaggerError::InvalidConfig(format!("unknown parameter {weight_name}")))?;
        let restored = weight.slice_assign(&[*pad..*pad + 1, 0..self.dim], row)?;
        store.set(&weight_name, &restored)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed ids of any shape, appending the embedding axis.
    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.embedding.forward(ids)?)
    }
}

/// An enabled feature: its encoder plus how many id slots each inner token
/// occupies (affix windows, 1 for caps). The word slot has no windows.
#[derive(Debug, Clone)]
pub struct FeatureSlot {
    kind: FeatureKind,
    encoder: FeatureEncoder,
    windows: usize,
}

impl FeatureSlot {
    pub fn words(encoder: FeatureEncoder) -> Self {
        Self {
            kind: FeatureKind::Word,
            encoder,
            windows: 0,
        }
    }

    /// Slot for a per-inner-token feature with `windows` ids per token.
    pub fn inner(kind: FeatureKind, encoder: FeatureEncoder, windows: usize) -> Self {
        Self {
            kind,
            encoder,
            windows,
        }
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    /// Width this slot contributes to the fused feature axis.
    pub fn width(&self) -> usize {
        self.windows.max(1) * self.encoder.dim()
    }

    /// `(batch, seq_len, width)` features for `batch`.
    ///
    /// Inner-token ids cover positions `1..seq_len-1`; the START and STOP
    /// positions get zero vectors.
    pub fn embed(&self, batch: &Batch, batch_size: usize, seq_len: usize) -> Result<Tensor> {
        if self.kind == FeatureKind::Word {
            return self.encoder.forward(&batch.words);
        }

        let ids = batch.ids_for(self.kind).ok_or_else(|| {
            TaggerError::ShapeMismatch(format!("batch carries no {} ids", self.kind))
        })?;
        let expected = (batch_size, seq_len.saturating_sub(2) * self.windows);
        if ids.dims2()? != expected {
            return Err(TaggerError::ShapeMismatch(format!(
                "{} ids have shape {:?}, expected {:?}",
                self.kind,
                ids.dims(),
                expected
            )));
        }

        // (B, (T-2)*L) -> (B, (T-2)*L, E) -> (B, T*L, E) -> (B, T, L*E)
        let h = self.encoder.forward(ids)?;
        let h = h.pad_with_zeros(1, self.windows, self.windows)?;
        Ok(h.reshape((batch_size, seq_len, self.width()))?)
    }
}
