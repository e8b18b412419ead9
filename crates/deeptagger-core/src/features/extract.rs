//! # Token Feature Extraction
//!
//! Turns a token into the sub-word ids the affix and caps encoders embed.
//! Windows are counted in characters, not bytes.

use std::fmt;

use crate::error::{Result, TaggerError};
use crate::vocab::{PAD_ID, SpecialTokens, Vocabulary, VocabularyBuilder};

/// Which end of the token a window is cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffixKind {
    Prefix,
    Suffix,
}

/// Cuts every prefix (or suffix) of length `min_length..=max_length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffixExtractor {
    kind: AffixKind,
    min_length: usize,
    max_length: usize,
}

impl AffixExtractor {
    pub fn new(kind: AffixKind, min_length: usize, max_length: usize) -> Result<Self> {
        if min_length == 0 || min_length > max_length {
            return Err(TaggerError::InvalidConfig(format!(
                "{kind:?} lengths must satisfy 1 <= min <= max, got {min_length}..={max_length}"
            )));
        }
        Ok(Self {
            kind,
            min_length,
            max_length,
        })
    }

    pub fn prefixes(min_length: usize, max_length: usize) -> Result<Self> {
        Self::new(AffixKind::Prefix, min_length, max_length)
    }

    pub fn suffixes(min_length: usize, max_length: usize) -> Result<Self> {
        Self::new(AffixKind::Suffix, min_length, max_length)
    }

    pub fn kind(&self) -> AffixKind {
        self.kind
    }

    /// Windows per token, `max_length - min_length + 1`.
    pub fn windows(&self) -> usize {
        self.max_length - self.min_length + 1
    }

    /// One entry per window length; `None` where the token is too short.
    pub fn extract(&self, token: &str) -> Vec<Option<String>> {
        let chars: Vec<char> = token.chars().collect();
        (self.min_length..=self.max_length)
            .map(|len| {
                if len > chars.len() {
                    return None;
                }
                let window = match self.kind {
                    AffixKind::Prefix => &chars[..len],
                    AffixKind::Suffix => &chars[chars.len() - len..],
                };
                Some(window.iter().collect())
            })
            .collect()
    }

    /// Window ids for `token`; short windows become `PAD_ID`.
    pub fn encode(&self, token: &str, vocab: &Vocabulary) -> Result<Vec<u32>> {
        self.extract(token)
            .into_iter()
            .map(|window| match window {
                Some(affix) => vocab.encode(&affix),
                None => Ok(PAD_ID),
            })
            .collect()
    }

    /// Count the windows of `token` towards an affix vocabulary.
    pub fn count(&self, builder: &mut VocabularyBuilder, token: &str) {
        builder.add_all(self.extract(token).into_iter().flatten());
    }
}

/// Capitalization shape of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapsClass {
    /// Every letter is lowercase.
    Lower,
    /// Every letter is uppercase.
    Upper,
    /// Uppercase first letter followed only by lowercase letters.
    Title,
    /// Any other mix of cases.
    Mixed,
    /// No letters, at least one digit.
    Digit,
    /// Neither letters nor digits.
    Other,
}

impl CapsClass {
    pub fn all() -> &'static [CapsClass] {
        &[
            CapsClass::Lower,
            CapsClass::Upper,
            CapsClass::Title,
            CapsClass::Mixed,
            CapsClass::Digit,
            CapsClass::Other,
        ]
    }

    pub fn of(token: &str) -> Self {
        let letters: Vec<char> = token.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.is_empty() {
            return if token.chars().any(|c| c.is_numeric()) {
                CapsClass::Digit
            } else {
                CapsClass::Other
            };
        }

        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        let lower = letters.iter().filter(|c| c.is_lowercase()).count();
        if upper == 0 {
            CapsClass::Lower
        } else if lower == 0 {
            CapsClass::Upper
        } else if upper == 1 && letters[0].is_uppercase() {
            CapsClass::Title
        } else {
            CapsClass::Mixed
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CapsClass::Lower => "lower",
            CapsClass::Upper => "upper",
            CapsClass::Title => "title",
            CapsClass::Mixed => "mixed",
            CapsClass::Digit => "digit",
            CapsClass::Other => "other",
        }
    }

    /// Vocabulary holding the specials and every class name.
    pub fn vocabulary(specials: &SpecialTokens) -> Vocabulary {
        Vocabulary::from_tokens(specials, CapsClass::all().iter().map(CapsClass::name))
    }
}

impl fmt::Display for CapsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::UNK_ID;

    #[test]
    fn test_prefix_windows() {
        let prefixes = AffixExtractor::prefixes(1, 3).unwrap();
        assert_eq!(prefixes.windows(), 3);
        assert_eq!(
            prefixes.extract("dogs"),
            vec![Some("d".into()), Some("do".into()), Some("dog".into())]
        );
    }

    #[test]
    fn test_suffix_windows_on_short_token() {
        let suffixes = AffixExtractor::suffixes(1, 3).unwrap();
        assert_eq!(
            suffixes.extract("is"),
            vec![Some("s".into()), Some("is".into()), None]
        );
    }

    #[test]
    fn test_windows_count_characters() {
        let suffixes = AffixExtractor::suffixes(2, 2).unwrap();
        assert_eq!(suffixes.extract("café"), vec![Some("fé".into())]);
    }

    #[test]
    fn test_encode_pads_short_windows_and_maps_unknown() {
        let specials = SpecialTokens::default();
        let vocab = Vocabulary::from_tokens(&specials, ["d", "do"]);
        let prefixes = AffixExtractor::prefixes(1, 3).unwrap();

        assert_eq!(prefixes.encode("do", &vocab).unwrap(), vec![4, 5, PAD_ID]);
        assert_eq!(prefixes.encode("xyz", &vocab).unwrap(), vec![UNK_ID; 3]);
    }

    #[test]
    fn test_invalid_lengths_are_rejected() {
        assert!(matches!(
            AffixExtractor::prefixes(0, 2),
            Err(TaggerError::InvalidConfig(_))
        ));
        assert!(matches!(
            AffixExtractor::suffixes(3, 2),
            Err(TaggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_count_feeds_builder() {
        let prefixes = AffixExtractor::prefixes(1, 2).unwrap();
        let mut builder = VocabularyBuilder::new();
        prefixes.count(&mut builder, "dog");
        prefixes.count(&mut builder, "do");
        let vocab = builder.build(&SpecialTokens::default(), None);
        assert_eq!(vocab.get("d"), Some(4));
        assert_eq!(vocab.get("do"), Some(5));
    }

    #[test]
    fn test_caps_classes() {
        assert_eq!(CapsClass::of("dog"), CapsClass::Lower);
        assert_eq!(CapsClass::of("NASA"), CapsClass::Upper);
        assert_eq!(CapsClass::of("A"), CapsClass::Upper);
        assert_eq!(CapsClass::of("Paris"), CapsClass::Title);
        assert_eq!(CapsClass::of("iPhone"), CapsClass::Mixed);
        assert_eq!(CapsClass::of("McDonald"), CapsClass::Mixed);
        assert_eq!(CapsClass::of("1984"), CapsClass::Digit);
        assert_eq!(CapsClass::of("..."), CapsClass::Other);
    }

    #[test]
    fn test_caps_vocabulary_holds_every_class() {
        let vocab = CapsClass::vocabulary(&SpecialTokens::default());
        assert_eq!(vocab.len(), 4 + CapsClass::all().len());
        assert_eq!(vocab.get("lower"), Some(4));
    }
}
