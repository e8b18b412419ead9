//! # DeepTagger Core
//!
//! Feature-fusion sequence tagging: loads pretrained word vectors from
//! polyglot, word2vec, fastText or GloVe files into one lookup table, and
//! tags sentences with a conv-recurrent network over word, affix and
//! capitalization embeddings.
//!
//! ## Quick Start
//!
//! ```rust
//! use candle_core::Device;
//! use deeptagger_core::{
//!     BatchBuilder, ModelOptions, Rcnn, SequenceTagger, SpecialTokens, TaggerFields, Vocabulary,
//! };
//!
//! let specials = SpecialTokens::default();
//! let fields = TaggerFields::new(
//!     Vocabulary::from_tokens(&specials, ["the", "dog", "barks"]),
//!     Vocabulary::tags_from_labels(&specials.pad, ["DET", "NOUN", "VERB"]),
//! );
//! let options = ModelOptions::default().with_word_embeddings_size(16);
//!
//! let mut model = Rcnn::new(fields.clone(), &Device::Cpu);
//! model.build(&options).unwrap();
//!
//! let batch = BatchBuilder::new(&fields, &options, &Device::Cpu)
//!     .unwrap()
//!     .build(&[vec!["the", "dog", "barks"]])
//!     .unwrap();
//! let classes = model.predict_classes(&batch).unwrap();
//! assert_eq!(classes.dims(), &[1, 3]);
//! ```
pub mod batch;
pub mod error;
pub mod features;
pub mod model;
pub mod vectors;
pub mod vocab;

// Re-export primary API
pub use batch::{Batch, BatchBuilder};
pub use error::{Result, TaggerError};
pub use features::{AffixExtractor, CapsClass, EmbeddingSpec, FeatureEncoder, FeatureKind};
pub use model::{
    LossWeights, ModelOptions, ParameterStore, Rcnn, SequenceTagger, TaggerFields,
    WeightStrategy, masked_nll,
};
pub use vectors::{
    EmbeddingFormat, LoadOptions, RawVectors, ReaderRegistry, TokenMap, UnkInit, VectorReader,
    VectorTable,
};
pub use vocab::{SpecialTokens, Vocabulary, VocabularyBuilder};
