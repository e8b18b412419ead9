//! # Conv-Recurrent Tagger
//!
//! Fused word/affix/caps embeddings go through a 1-D convolution over time,
//! max-pooling over the channel axis, a masked GRU and a linear projection
//! to tag log-probabilities. START and STOP positions are scored but
//! dropped from the output.
//!
//! Architecture from "Recurrent Convolutional Neural Networks for
//! Part-of-Speech Tagging" (arXiv:1610.00211).

use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::ops::{dropout, log_softmax};
use candle_nn::{Conv1d, Conv1dConfig, Init, Linear};
use tracing::{info, warn};

use super::options::{LossWeights, ModelOptions};
use super::params::{ParameterStore, xavier_uniform};
use super::rnn::MaskedGru;
use super::{SequenceTagger, TaggerFields, masked_nll};
use crate::batch::Batch;
use crate::error::{Result, TaggerError};
use crate::features::{EmbeddingSpec, FeatureEncoder, FeatureKind, FeatureSlot};
use crate::vocab::PAD_ID;

/// Layers that exist once the model is built.
struct RcnnLayers {
    slots: Vec<FeatureSlot>,
    emb_dropout: f32,
    conv: Conv1d,
    pool_length: usize,
    gru: MaskedGru,
    dropout: f32,
    sum_bidir: bool,
    linear_out: Linear,
    class_weights: Option<Tensor>,
}

pub struct Rcnn {
    fields: TaggerFields,
    params: ParameterStore,
    layers: Option<RcnnLayers>,
}

impl Rcnn {
    pub fn new(fields: TaggerFields, device: &Device) -> Self {
        Self {
            fields,
            params: ParameterStore::new(device),
            layers: None,
        }
    }

    pub fn fields(&self) -> &TaggerFields {
        &self.fields
    }

    pub fn device(&self) -> &Device {
        self.params.device()
    }

    /// Width of the fused feature axis, once built.
    pub fn features_size(&self) -> Option<usize> {
        self.layers
            .as_ref()
            .map(|layers| layers.slots.iter().map(FeatureSlot::width).sum())
    }

    /// Reset every embedding table's padding row after an optimizer step.
    pub fn restore_padding_rows(&mut self) -> Result<()> {
        let layers = self.layers.as_ref().ok_or(TaggerError::NotBuilt)?;
        for slot in &layers.slots {
            slot.encoder().restore_padding_row(&mut self.params)?;
        }
        Ok(())
    }

    fn build_slots(
        &self,
        params: &mut ParameterStore,
        options: &ModelOptions,
    ) -> Result<Vec<FeatureSlot>> {
        let freeze = options.freeze_embeddings;
        let mut slots = Vec::with_capacity(4);

        let word_vectors = self.fields.word_vectors.clone();
        if let Some(vectors) = &word_vectors {
            let (_, dim) = vectors.dims2()?;
            if dim != options.word_embeddings_size {
                info!(
                    configured = options.word_embeddings_size,
                    pretrained = dim,
                    "word embedding size taken from pretrained vectors"
                );
            }
        }
        let words = FeatureEncoder::build(
            params,
            FeatureKind::Word.param_prefix(),
            EmbeddingSpec {
                vocab_size: self.fields.words.len(),
                embedding_dim: options.word_embeddings_size,
                padding_id: PAD_ID,
                pretrained: word_vectors,
                freeze,
            },
        )?;
        slots.push(FeatureSlot::words(words));

        let optional = [
            (
                FeatureKind::Prefix,
                self.fields.prefixes.as_ref().map(|v| v.len()),
                options.prefix_embeddings_size,
                affix_windows(options.prefix_min_length, options.prefix_max_length, "prefix")?,
            ),
            (
                FeatureKind::Suffix,
                self.fields.suffixes.as_ref().map(|v| v.len()),
                options.suffix_embeddings_size,
                affix_windows(options.suffix_min_length, options.suffix_max_length, "suffix")?,
            ),
            (
                FeatureKind::Caps,
                self.fields.caps.as_ref().map(|v| v.len()),
                options.caps_embeddings_size,
                1,
            ),
        ];
        for (kind, vocab_size, embedding_dim, windows) in optional {
            let Some(vocab_size) = vocab_size else {
                continue;
            };
            let encoder = FeatureEncoder::build(
                params,
                kind.param_prefix(),
                EmbeddingSpec {
                    vocab_size,
                    embedding_dim,
                    padding_id: PAD_ID,
                    pretrained: None,
                    freeze,
                },
            )?;
            slots.push(FeatureSlot::inner(kind, encoder, windows));
        }
        Ok(slots)
    }

    fn class_weights(&self, options: &ModelOptions) -> Result<Option<Tensor>> {
        match &options.loss_weights {
            None => Ok(None),
            Some(LossWeights::Explicit(weights)) => {
                if weights.len() != self.fields.nb_classes() {
                    return Err(TaggerError::ShapeMismatch(format!(
                        "{} loss weights for {} classes",
                        weights.len(),
                        self.fields.nb_classes()
                    )));
                }
                Ok(Some(Tensor::new(weights.as_slice(), self.params.device())?))
            }
            Some(LossWeights::Strategy(strategy)) => Err(TaggerError::Unsupported(format!(
                "{strategy:?} loss weights"
            ))),
        }
    }

    fn layers(&self) -> Result<&RcnnLayers> {
        self.layers.as_ref().ok_or(TaggerError::NotBuilt)
    }
}

fn affix_windows(min: usize, max: usize, name: &str) -> Result<usize> {
    if min == 0 || min > max {
        return Err(TaggerError::InvalidConfig(format!(
            "{name} lengths must satisfy 1 <= min <= max, got {min}..={max}"
        )));
    }
    Ok(max - min + 1)
}

/// Max over non-overlapping windows of the last axis, zero-padded by
/// `pool_length / 2` on both sides. Inputs are post-ReLU, so zero padding
/// never wins over a real value.
fn max_pool_last(xs: &Tensor, pool_length: usize) -> Result<Tensor> {
    let (batch_size, seq_len, width) = xs.dims3()?;
    let pad = pool_length / 2;
    let padded = xs.pad_with_zeros(D::Minus1, pad, pad)?;
    let windows = (width + 2 * pad - pool_length) / pool_length + 1;
    Ok(padded
        .narrow(D::Minus1, 0, windows * pool_length)?
        .reshape((batch_size, seq_len, windows, pool_length))?
        .max(D::Minus1)?)
}

impl SequenceTagger for Rcnn {
    fn build(&mut self, options: &ModelOptions) -> Result<()> {
        if self.layers.is_some() {
            return Err(TaggerError::InvalidConfig(
                "model is already built; create a new one to rebuild".into(),
            ));
        }
        options.validate()?;
        let class_weights = self.class_weights(options)?;
        let hidden_size = options.hidden()?;

        // Layers register into a fresh store that replaces the current one
        // only once every layer is built.
        let mut params = ParameterStore::new(self.params.device());
        let slots = self.build_slots(&mut params, options)?;
        let features_size: usize = slots.iter().map(FeatureSlot::width).sum();

        let (conv_size, kernel_size) = (options.conv_size, options.kernel_size);
        let conv_weight = params.create(
            "cnn_1d.weight",
            (conv_size, features_size, kernel_size),
            xavier_uniform(features_size * kernel_size, conv_size * kernel_size),
        )?;
        let conv_bias = params.create("cnn_1d.bias", conv_size, Init::Const(0.0))?;
        let conv = Conv1d::new(
            conv_weight,
            Some(conv_bias),
            Conv1dConfig {
                padding: kernel_size / 2,
                ..Default::default()
            },
        );

        let gru = MaskedGru::build(
            &mut params,
            "gru",
            options.pooled_size(),
            hidden_size,
            options.bidirectional,
        )?;

        let recurrent_out = if options.sum_bidir {
            hidden_size
        } else {
            gru.output_size()
        };
        let nb_classes = self.fields.nb_classes();
        let linear_weight = params.create(
            "linear_out.weight",
            (nb_classes, recurrent_out),
            xavier_uniform(recurrent_out, nb_classes),
        )?;
        let linear_bias = params.create("linear_out.bias", nb_classes, Init::Const(0.0))?;

        info!(
            features_size,
            conv_size,
            pooled = options.pooled_size(),
            hidden_size,
            bidirectional = options.bidirectional,
            nb_classes,
            params = params.len(),
            "built conv-recurrent tagger"
        );
        self.params = params;
        self.layers = Some(RcnnLayers {
            slots,
            emb_dropout: options.emb_dropout,
            conv,
            pool_length: options.pool_length,
            gru,
            dropout: options.dropout,
            sum_bidir: options.sum_bidir,
            linear_out: Linear::new(linear_weight, Some(linear_bias)),
            class_weights,
        });
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.layers.is_some()
    }

    fn nb_classes(&self) -> usize {
        self.fields.nb_classes()
    }

    fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    fn forward_t(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let layers = self.layers()?;
        let (batch_size, seq_len) = batch.dims()?;
        if seq_len < 2 {
            return Err(TaggerError::ShapeMismatch(format!(
                "sequences need START and STOP, got length {seq_len}"
            )));
        }

        let mask = batch.words.ne(PAD_ID)?.to_dtype(DType::F32)?;

        // (B, T) -> (B, T, F)
        let feats = layers
            .slots
            .iter()
            .map(|slot| slot.embed(batch, batch_size, seq_len))
            .collect::<Result<Vec<_>>>()?;
        let mut h = Tensor::cat(&feats, D::Minus1)?;
        if train && layers.emb_dropout > 0.0 {
            h = dropout(&h, layers.emb_dropout)?;
        }

        // (B, F, T) -> (B, conv_size, T) -> (B, T, conv_size)
        let h = h.transpose(1, 2)?.contiguous()?;
        let h = layers.conv.forward(&h)?.relu()?;
        let h = h.transpose(1, 2)?.contiguous()?;

        // (B, T, conv_size) -> (B, T, pooled)
        let h = max_pool_last(&h, layers.pool_length)?;

        // (B, T, pooled) -> (B, T, H or 2H)
        let mut h = layers.gru.forward(&h, &mask)?;
        if train && layers.dropout > 0.0 {
            h = dropout(&h, layers.dropout)?;
        }
        if layers.sum_bidir {
            let hidden = layers.gru.hidden_size();
            h = (h.narrow(D::Minus1, 0, hidden)? + h.narrow(D::Minus1, hidden, hidden)?)?;
        }

        // (B, T, C) with START/STOP removed -> (B, T-2, C)
        let h = log_softmax(&layers.linear_out.forward(&h)?, D::Minus1)?;
        Ok(h.narrow(1, 1, seq_len - 2)?)
    }

    fn loss(&self, pred: &Tensor, gold: &Tensor) -> Result<Tensor> {
        let layers = self.layers()?;
        if pred.dim(D::Minus1)? != self.nb_classes() {
            warn!(
                got = pred.dim(D::Minus1)?,
                expected = self.nb_classes(),
                "prediction width does not match tag count"
            );
            return Err(TaggerError::ShapeMismatch(format!(
                "predictions have {} classes, tagger has {}",
                pred.dim(D::Minus1)?,
                self.nb_classes()
            )));
        }
        masked_nll(pred, gold, layers.class_weights.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchBuilder;
    use crate::features::CapsClass;
    use crate::vocab::{SpecialTokens, TAGS_PAD_ID, Vocabulary};

    fn fields() -> TaggerFields {
        let specials = SpecialTokens::default();
        TaggerFields::new(
            Vocabulary::from_tokens(&specials, ["the", "dog", "barks", "loudly"]),
            Vocabulary::tags_from_labels(&specials.pad, ["DET", "NOUN", "VERB", "ADV"]),
        )
    }

    fn full_fields() -> TaggerFields {
        let specials = SpecialTokens::default();
        fields()
            .with_prefixes(Vocabulary::from_tokens(&specials, ["t", "th", "d", "do", "b"]))
            .with_suffixes(Vocabulary::from_tokens(&specials, ["e", "he", "g", "og", "s"]))
            .with_caps(CapsClass::vocabulary(&specials))
    }

    fn small_options() -> ModelOptions {
        ModelOptions::default()
            .with_word_embeddings_size(8)
            .with_affix_embeddings_size(4)
            .with_caps_embeddings_size(2)
            .with_prefix_lengths(1, 3)
            .with_suffix_lengths(1, 2)
            .with_conv(10, 3, 3)
            .with_hidden_size(5)
            .with_dropout(0.0, 0.0)
    }

    fn sentences() -> Vec<Vec<&'static str>> {
        vec![vec!["The", "dog", "barks", "loudly"], vec!["dog", "barks"]]
    }

    fn built(fields: TaggerFields, options: &ModelOptions) -> Rcnn {
        let mut model = Rcnn::new(fields, &Device::Cpu);
        model.build(options).unwrap();
        model
    }

    #[test]
    fn test_forward_before_build_fails() {
        let model = Rcnn::new(fields(), &Device::Cpu);
        let words = Tensor::new(&[[2u32, 4, 3]], &Device::Cpu).unwrap();
        assert!(matches!(
            model.forward(&Batch::new(words)),
            Err(TaggerError::NotBuilt)
        ));
        assert!(matches!(
            model.save(std::path::Path::new("unused.safetensors")),
            Err(TaggerError::NotBuilt)
        ));
    }

    #[test]
    fn test_second_build_is_rejected() {
        let options = small_options();
        let mut model = built(fields(), &options);
        assert!(matches!(
            model.build(&options),
            Err(TaggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_failed_build_leaves_model_buildable() {
        let mut model = Rcnn::new(full_fields(), &Device::Cpu);
        assert!(matches!(
            model.build(&small_options().with_prefix_lengths(0, 2)),
            Err(TaggerError::InvalidConfig(_))
        ));
        assert!(!model.is_built());
        assert!(model.parameters().is_empty());

        model.build(&small_options()).unwrap();
        assert!(model.parameters().contains("word_emb.weight"));
    }

    #[test]
    fn test_output_drops_boundaries_and_sums_to_one() {
        let fields = full_fields();
        let options = small_options();
        let model = built(fields.clone(), &options);
        let batch = BatchBuilder::new(&fields, &options, &Device::Cpu)
            .unwrap()
            .build(&sentences())
            .unwrap();

        // T = 6 including START/STOP.
        assert_eq!(batch.dims().unwrap(), (2, 6));
        let pred = model.forward(&batch).unwrap();
        assert_eq!(pred.dims(), &[2, 4, 5]);

        let sums = model
            .predict_proba(&batch)
            .unwrap()
            .sum(D::Minus1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));

        let classes = model.predict_classes(&batch).unwrap();
        assert_eq!(classes.dims(), &[2, 4]);
    }

    #[test]
    fn test_mask_and_lengths_follow_padding() {
        let fields = fields();
        let options = small_options();
        let batch = BatchBuilder::new(&fields, &options, &Device::Cpu)
            .unwrap()
            .build(&sentences())
            .unwrap();

        let mask = batch.words.ne(PAD_ID).unwrap().to_dtype(DType::F32).unwrap();
        assert_eq!(
            mask.get(1).unwrap().to_vec1::<f32>().unwrap(),
            vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0]
        );
        let lengths = mask.sum(1).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(lengths, vec![6.0, 4.0]);
    }

    #[test]
    fn test_fused_feature_width() {
        let model = built(full_fields(), &small_options());
        // word 8 + prefix 3*4 + suffix 2*4 + caps 2
        assert_eq!(model.features_size(), Some(8 + 12 + 8 + 2));

        let words_only = built(fields(), &small_options());
        assert_eq!(words_only.features_size(), Some(8));
        assert!(!words_only.parameters().contains("prefixes_emb.weight"));
    }

    #[test]
    fn test_prefix_windows_are_fused_per_position() {
        let fields = fields().with_prefixes(Vocabulary::from_tokens(
            &SpecialTokens::default(),
            ["d", "do", "dog"],
        ));
        let options = small_options().with_prefix_lengths(1, 3);
        let model = built(fields.clone(), &options);
        let batch = BatchBuilder::new(&fields, &options, &Device::Cpu)
            .unwrap()
            .build(&sentences())
            .unwrap();

        let slot = &model.layers().unwrap().slots[1];
        assert_eq!(slot.kind(), FeatureKind::Prefix);
        let h = slot.embed(&batch, 2, 6).unwrap();
        assert_eq!(h.dims(), &[2, 6, 3 * 4]);
    }

    #[test]
    fn test_sum_bidir_halves_recurrent_width() {
        let options = small_options()
            .with_hidden_size(128)
            .with_bidirectional(true, true);
        let model = built(fields(), &options);
        let weight = model.parameters().get("linear_out.weight").unwrap();
        assert_eq!(weight.dims(), &[5, 128]);

        let concat = built(fields(), &small_options().with_hidden_size(128));
        let weight = concat.parameters().get("linear_out.weight").unwrap();
        assert_eq!(weight.dims(), &[5, 256]);
    }

    #[test]
    fn test_padding_rows_survive_weight_updates() {
        let mut model = built(full_fields(), &small_options());
        for name in model.parameters().names() {
            let bumped = model.parameters().get(&name).unwrap().affine(1.0, 1.0).unwrap();
            model.parameters_mut().set(&name, &bumped).unwrap();
        }
        model.restore_padding_rows().unwrap();

        for name in [
            "word_emb.weight",
            "prefixes_emb.weight",
            "suffixes_emb.weight",
            "caps_emb.weight",
        ] {
            let rows = model.parameters().get(name).unwrap().to_vec2::<f32>().unwrap();
            assert!(rows[PAD_ID as usize].iter().all(|v| *v == 0.0), "{name}");
        }
    }

    #[test]
    fn test_summed_directions_forward() {
        let fields = full_fields();
        let options = small_options().with_bidirectional(true, true);
        let model = built(fields.clone(), &options);
        let batch = BatchBuilder::new(&fields, &options, &Device::Cpu)
            .unwrap()
            .build(&[vec!["The", "dog", "barks"]])
            .unwrap();

        let pred = model.forward(&batch).unwrap();
        assert_eq!(pred.dims(), &[1, 3, 5]);
        let sums = pred
            .exp()
            .unwrap()
            .sum(D::Minus1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_all_padding_gold_gives_zero_loss() {
        let fields = fields();
        let options = small_options();
        let model = built(fields.clone(), &options);
        let batch = BatchBuilder::new(&fields, &options, &Device::Cpu)
            .unwrap()
            .build(&sentences())
            .unwrap();

        let pred = model.forward(&batch).unwrap();
        let gold = Tensor::full(TAGS_PAD_ID, (2, 4), &Device::Cpu).unwrap();
        let loss = model.loss(&pred, &gold).unwrap();
        assert_eq!(loss.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_loss_on_tagged_batch_is_positive() {
        let fields = full_fields();
        let options = small_options();
        let model = built(fields.clone(), &options);
        let batch = BatchBuilder::new(&fields, &options, &Device::Cpu)
            .unwrap()
            .build_tagged(
                &sentences(),
                &[vec!["DET", "NOUN", "VERB", "ADV"], vec!["NOUN", "VERB"]],
            )
            .unwrap();

        let pred = model.forward_t(&batch, true).unwrap();
        let loss = model
            .loss(&pred, batch.tags.as_ref().unwrap())
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss.is_finite() && loss > 0.0);
    }

    #[test]
    fn test_balanced_weights_are_unsupported() {
        let options = small_options().with_loss_weights(LossWeights::Strategy(
            super::super::WeightStrategy::Balanced,
        ));
        let mut model = Rcnn::new(fields(), &Device::Cpu);
        assert!(matches!(
            model.build(&options),
            Err(TaggerError::Unsupported(_))
        ));
        assert!(!model.is_built());
    }

    #[test]
    fn test_explicit_weights_must_cover_every_class() {
        let options = small_options().with_loss_weights(LossWeights::Explicit(vec![1.0, 2.0]));
        let mut model = Rcnn::new(fields(), &Device::Cpu);
        assert!(matches!(
            model.build(&options),
            Err(TaggerError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_frozen_embeddings_are_not_trainable() {
        let options = small_options().with_freeze_embeddings(true);
        let model = built(full_fields(), &options);
        let params = model.parameters();
        for name in [
            "word_emb.weight",
            "prefixes_emb.weight",
            "suffixes_emb.weight",
            "caps_emb.weight",
        ] {
            assert!(params.is_frozen(name), "{name} should be frozen");
        }
        assert_eq!(params.trainable_vars().len(), params.len() - 4);
    }

    #[test]
    fn test_pretrained_word_vectors_set_width() {
        let vectors = Tensor::ones((8, 6), DType::F32, &Device::Cpu).unwrap();
        let model = built(fields().with_word_vectors(vectors), &small_options());
        assert_eq!(model.features_size(), Some(6));
        assert_eq!(
            model.parameters().get("word_emb.weight").unwrap().dims(),
            &[8, 6]
        );
    }

    #[test]
    fn test_conv_and_recurrent_parameter_shapes() {
        let model = built(fields(), &small_options());
        let params = model.parameters();
        assert_eq!(params.get("cnn_1d.weight").unwrap().dims(), &[10, 8, 3]);
        // pooled width 10 / 3 + 1 = 4
        assert_eq!(params.get("gru.weight_ih_l0").unwrap().dims(), &[15, 4]);
        assert_eq!(params.get("gru.weight_ih_l0_reverse").unwrap().dims(), &[15, 4]);
        let bias = params.get("cnn_1d.bias").unwrap().to_vec1::<f32>().unwrap();
        assert!(bias.iter().all(|b| *b == 0.0));
    }

    #[test]
    fn test_max_pool_width() {
        let xs = Tensor::arange(0f32, 12.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 12))
            .unwrap();
        let pooled = max_pool_last(&xs, 3).unwrap();
        // windows over [0, 0..=11, 0]: [0,0,1] [2,3,4] [5,6,7] [8,9,10] [11,0]
        // the last partial window is dropped.
        assert_eq!(
            pooled.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![1.0, 4.0, 7.0, 10.0]
        );
    }

    #[test]
    fn test_save_and_load_reproduce_predictions() {
        let path = std::env::temp_dir().join(format!(
            "deeptagger-rcnn-{}.safetensors",
            std::process::id()
        ));
        let fields = full_fields();
        let options = small_options();
        let model = built(fields.clone(), &options);
        model.save(&path).unwrap();

        let mut restored = built(fields.clone(), &options);
        restored.load(&path).unwrap();

        let batch = BatchBuilder::new(&fields, &options, &Device::Cpu)
            .unwrap()
            .build(&sentences())
            .unwrap();
        assert_eq!(
            model.predict_classes(&batch).unwrap().to_vec2::<u32>().unwrap(),
            restored.predict_classes(&batch).unwrap().to_vec2::<u32>().unwrap()
        );

        let _ = std::fs::remove_file(&path);
    }
}
