//! Vocabulary contract and the HuggingFace tokenizer behind it.
//!
//! The decode loop only needs ids: text encoding and decoding, plus the four
//! special ids it writes into and looks for in the token buffer.

use crate::error::{ArborError, Result};
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer as HfTokenizer;

/// Special token ids of a vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Beginning of sequence.
    pub bos: u32,
    /// End of sequence.
    pub eos: u32,
    /// Unknown token.
    pub unknown: u32,
    /// Padding.
    pub pad: u32,
}

/// Text to ids and back.
pub trait Vocabulary: Send + Sync {
    /// Encode text to token ids, without special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids to text, skipping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Beginning-of-sequence id.
    fn bos_id(&self) -> u32;

    /// End-of-sequence id.
    fn eos_id(&self) -> u32;

    /// Unknown-token id.
    fn unknown_id(&self) -> u32;

    /// Padding id.
    fn pad_id(&self) -> u32;

    /// All special ids at once.
    fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens {
            bos: self.bos_id(),
            eos: self.eos_id(),
            unknown: self.unknown_id(),
            pad: self.pad_id(),
        }
    }
}

impl<V: Vocabulary + ?Sized> Vocabulary for &V {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        (**self).encode(text)
    }
    fn decode(&self, ids: &[u32]) -> Result<String> {
        (**self).decode(ids)
    }
    fn bos_id(&self) -> u32 {
        (**self).bos_id()
    }
    fn eos_id(&self) -> u32 {
        (**self).eos_id()
    }
    fn unknown_id(&self) -> u32 {
        (**self).unknown_id()
    }
    fn pad_id(&self) -> u32 {
        (**self).pad_id()
    }
}

impl<V: Vocabulary + ?Sized> Vocabulary for Arc<V> {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        (**self).encode(text)
    }
    fn decode(&self, ids: &[u32]) -> Result<String> {
        (**self).decode(ids)
    }
    fn bos_id(&self) -> u32 {
        (**self).bos_id()
    }
    fn eos_id(&self) -> u32 {
        (**self).eos_id()
    }
    fn unknown_id(&self) -> u32 {
        (**self).unknown_id()
    }
    fn pad_id(&self) -> u32 {
        (**self).pad_id()
    }
}

const BOS_CANDIDATES: &[&str] = &["<bos>", "<s>", "<|begin_of_text|>"];
const EOS_CANDIDATES: &[&str] = &["<eos>", "</s>", "<|end_of_text|>"];
const UNKNOWN_CANDIDATES: &[&str] = &["<unk>", "<|unk|>"];
const PAD_CANDIDATES: &[&str] = &["<pad>", "<|pad|>"];

/// HuggingFace tokenizer with its special ids resolved at load time.
#[derive(Clone)]
pub struct Tokenizer {
    /// Underlying HuggingFace tokenizer.
    inner: HfTokenizer,
    /// Special token ids.
    special: SpecialTokens,
}

impl Tokenizer {
    /// Load a tokenizer from a tokenizer.json file.
    ///
    /// Fails if any of the four special tokens cannot be found.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = Self::load(path.as_ref())?;
        let special = SpecialTokens {
            bos: resolve(&inner, "bos", BOS_CANDIDATES)?,
            eos: resolve(&inner, "eos", EOS_CANDIDATES)?,
            unknown: resolve(&inner, "unknown", UNKNOWN_CANDIDATES)?,
            pad: resolve(&inner, "pad", PAD_CANDIDATES)?,
        };
        tracing::debug!(?special, "loaded tokenizer");
        Ok(Self { inner, special })
    }

    /// Load a tokenizer.json file with explicitly supplied special ids.
    pub fn with_special_tokens<P: AsRef<Path>>(path: P, special: SpecialTokens) -> Result<Self> {
        let inner = Self::load(path.as_ref())?;
        Ok(Self { inner, special })
    }

    /// Load a tokenizer from a model directory.
    ///
    /// Looks for tokenizer.json in the directory.
    pub fn from_dir<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let tokenizer_path = model_dir.as_ref().join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(ArborError::Tokenizer(format!(
                "tokenizer.json not found in {}",
                model_dir.as_ref().display()
            )));
        }
        Self::from_file(tokenizer_path)
    }

    fn load(path: &Path) -> Result<HfTokenizer> {
        HfTokenizer::from_file(path)
            .map_err(|e| ArborError::Tokenizer(format!("failed to load {}: {e}", path.display())))
    }

    /// Get vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Token to string (for debugging).
    pub fn id_to_token(&self, id: u32) -> Option<String> {
        self.inner.id_to_token(id)
    }
}

fn resolve(inner: &HfTokenizer, kind: &str, candidates: &[&str]) -> Result<u32> {
    candidates
        .iter()
        .find_map(|token| inner.token_to_id(token))
        .ok_or_else(|| {
            ArborError::Tokenizer(format!(
                "no {kind} token found (tried {})",
                candidates.join(", ")
            ))
        })
}

impl Vocabulary for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| ArborError::Tokenizer(format!("failed to encode text: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| ArborError::Tokenizer(format!("failed to decode tokens: {e}")))
    }

    fn bos_id(&self) -> u32 {
        self.special.bos
    }

    fn eos_id(&self) -> u32 {
        self.special.eos
    }

    fn unknown_id(&self) -> u32 {
        self.special.unknown
    }

    fn pad_id(&self) -> u32 {
        self.special.pad
    }

    fn special_tokens(&self) -> SpecialTokens {
        self.special
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("special", &self.special)
            .finish()
    }
}
