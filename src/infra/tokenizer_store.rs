// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the tokenizer that matches the pretrained encoder
// (a HuggingFace `tokenizer.json`), or fits a small word-level
// one on the transcript sentences when no pretrained tokenizer
// is available. Corpus words fill the ids the BERT special
// tokens leave free: 0 [PAD], 1 [UNK], 101-103 [CLS] [SEP] [MASK].
//
// Sentences are encoded BERT-style:
//
//   [CLS] tok tok … tok [SEP] [PAD] … [PAD]     length = max_len
//    1    1   1  …  1    1     0   …   0        attention mask
//
// Long sentences are truncated so [SEP] always fits.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokenizers::models::wordlevel::WordLevel;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::{
    AddedToken, Normalizer, OffsetReferential, OffsetType, PreTokenizedString, PreTokenizer, Tokenizer,
};

use crate::domain::error::{PipelineError, Result as PipelineResult};

const CLS_TOKEN: &str = "[CLS]";
const SEP_TOKEN: &str = "[SEP]";
const PAD_TOKEN: &str = "[PAD]";
const UNK_TOKEN: &str = "[UNK]";

// BERT vocabulary ids, used when the tokenizer does not define the tokens
const DEFAULT_CLS_ID: u32 = 101;
const DEFAULT_SEP_ID: u32 = 102;
const DEFAULT_PAD_ID: u32 = 0;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    /// Load the pretrained tokenizer, or build a word-level one from texts.
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        if self.path().exists() {
            tracing::info!("Loading tokenizer from '{}'", self.path().display());
            self.load()
        } else {
            tracing::info!("Building word-level tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.path();
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    /// Fit a word-level vocabulary on the transcript sentences, save it,
    /// then load it back.
    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let counts = word_counts(texts)?;
        let vocab = dense_vocab(counts, vocab_size);
        let words = vocab.len() - SPECIAL_TOKENS.len();

        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token(UNK_TOKEN.to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("Cannot build word-level model: {e}"))?;
        let mut tokenizer = Tokenizer::new(model);
        tokenizer.with_normalizer(transcript_normalizer());
        tokenizer.with_pre_tokenizer(BertPreTokenizer);
        let specials: Vec<AddedToken> =
            SPECIAL_TOKENS.iter().map(|(tok, _)| AddedToken::from(*tok, true)).collect();
        tokenizer.add_special_tokens(&specials);

        let path = self.path();
        tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write tokenizer to '{}': {e}", path.display()))?;
        tracing::info!("Tokenizer built with {} words, saved to '{}'", words, path.display());

        self.load()
    }
}

// ─── Vocabulary ──────────────────────────────────────────────────────────────

/// Special tokens pinned to their BERT ids.
const SPECIAL_TOKENS: [(&str, u32); 5] = [
    (PAD_TOKEN, DEFAULT_PAD_ID),
    (UNK_TOKEN, 1),
    (CLS_TOKEN, DEFAULT_CLS_ID),
    (SEP_TOKEN, DEFAULT_SEP_ID),
    ("[MASK]", 103),
];

fn transcript_normalizer() -> BertNormalizer {
    // lowercase, accents kept
    BertNormalizer::new(true, true, Some(false), true)
}

/// Occurrences of every word piece the saved tokenizer will see, using
/// the same normalizer and pre-tokenizer so the vocabulary cannot drift
/// from encoding (contractions split as `don ' t`).
fn word_counts(texts: &[String]) -> Result<HashMap<String, usize>> {
    let normalizer = transcript_normalizer();
    let mut counts = HashMap::new();
    for text in texts {
        let mut pieces = PreTokenizedString::from(text.as_str());
        pieces
            .normalize(|n| normalizer.normalize(n))
            .map_err(|e| anyhow::anyhow!("Cannot normalise '{text}': {e}"))?;
        BertPreTokenizer
            .pre_tokenize(&mut pieces)
            .map_err(|e| anyhow::anyhow!("Cannot split '{text}': {e}"))?;
        for (piece, _, _) in pieces.get_splits(OffsetReferential::Normalized, OffsetType::Byte) {
            *counts.entry(piece.to_string()).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Most frequent words first (ties alphabetical), packed into the ids
/// the special tokens leave free. At most `vocab_size` entries in total.
fn dense_vocab(counts: HashMap<String, usize>, vocab_size: usize) -> HashMap<String, u32> {
    let mut words: Vec<(String, usize)> = counts.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(vocab_size.saturating_sub(SPECIAL_TOKENS.len()));

    let taken = |id: u32| SPECIAL_TOKENS.iter().any(|&(_, t)| t == id);
    let free_ids = (0u32..).filter(|&id| !taken(id));

    let mut vocab: HashMap<String, u32> =
        SPECIAL_TOKENS.iter().map(|&(tok, id)| (tok.to_string(), id)).collect();
    vocab.extend(words.into_iter().map(|(w, _)| w).zip(free_ids));
    vocab
}

// ─── SentenceEncoder ──────────────────────────────────────────────────────────
/// Fixed-length BERT-style encoding of single sentences.
#[derive(Clone)]
pub struct SentenceEncoder {
    tokenizer: Tokenizer,
    max_len:   usize,
    cls_id:    u32,
    sep_id:    u32,
    pad_id:    u32,
}

impl SentenceEncoder {
    pub fn new(tokenizer: Tokenizer, max_len: usize) -> PipelineResult<Self> {
        if max_len < 2 {
            return Err(PipelineError::invalid_input(format!(
                "max_len must leave room for [CLS] and [SEP], got {max_len}"
            )));
        }
        let cls_id = tokenizer.token_to_id(CLS_TOKEN).unwrap_or(DEFAULT_CLS_ID);
        let sep_id = tokenizer.token_to_id(SEP_TOKEN).unwrap_or(DEFAULT_SEP_ID);
        let pad_id = tokenizer.token_to_id(PAD_TOKEN).unwrap_or(DEFAULT_PAD_ID);
        Ok(Self { tokenizer, max_len, cls_id, sep_id, pad_id })
    }

    pub fn with_max_len(self, max_len: usize) -> PipelineResult<Self> {
        Self::new(self.tokenizer, max_len)
    }

    /// Embedding rows needed to cover every id the tokenizer can emit.
    pub fn vocab_size(&self) -> usize {
        let max_id = self
            .tokenizer
            .get_vocab(true)
            .values()
            .copied()
            .chain([self.cls_id, self.sep_id, self.pad_id])
            .max()
            .unwrap_or(0);
        max_id as usize + 1
    }

    /// Token ids and attention mask, both exactly `max_len` long.
    pub fn encode(&self, text: &str) -> PipelineResult<(Vec<u32>, Vec<u32>)> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| PipelineError::invalid_input(format!("cannot tokenise '{text}': {e}")))?;

        let mut ids = Vec::with_capacity(self.max_len);
        ids.push(self.cls_id);
        ids.extend(encoding.get_ids().iter().take(self.max_len - 2));
        ids.push(self.sep_id);

        let mut mask = vec![1u32; ids.len()];
        ids.resize(self.max_len, self.pad_id);
        mask.resize(self.max_len, 0);
        Ok((ids, mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec!["I remember the old house".into(), "the house was cold".into()]
    }

    #[test]
    fn test_build_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let built = store.load_or_build(&corpus(), 100).unwrap();
        assert!(store.path().exists());
        assert_eq!(built.token_to_id("[CLS]"), Some(101));

        // most frequent first, ties alphabetical
        assert_eq!(built.token_to_id("house"), Some(2));
        assert_eq!(built.token_to_id("the"), Some(3));

        let loaded = store.load_or_build(&[], 100).unwrap();
        assert_eq!(loaded.token_to_id("house"), built.token_to_id("house"));
    }

    #[test]
    fn test_contractions_and_case_share_the_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let texts = vec!["I don't remember.".to_string(), "Um, we didn't go".to_string()];
        let tok = TokenizerStore::new(dir.path()).load_or_build(&texts, 100).unwrap();
        let enc = SentenceEncoder::new(tok, 12).unwrap();

        let (ids, mask) = enc.encode("WE DON'T").unwrap();
        let used = mask.iter().sum::<u32>() as usize;
        // [CLS] we don ' t [SEP]
        assert_eq!(used, 6);
        assert!(ids[1..used - 1].iter().all(|&id| id != 1), "{ids:?}");
        assert_eq!(enc.encode("zebra").unwrap().0[1], 1);
    }

    #[test]
    fn test_vocabulary_skips_special_ids_and_respects_size() {
        let counts: HashMap<String, usize> = (0..150).map(|i| (format!("w{i:03}"), 1)).collect();
        let vocab = dense_vocab(counts.clone(), 120);
        assert_eq!(vocab.len(), 120);
        assert_eq!(vocab["[CLS]"], 101);
        assert_eq!(vocab["w000"], 2);
        // 99 words fit below [CLS]; the next lands after [MASK]
        assert_eq!(vocab["w098"], 100);
        assert_eq!(vocab["w099"], 104);

        let mut ids: Vec<u32> = vocab.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 120);

        assert_eq!(dense_vocab(counts, 3).len(), SPECIAL_TOKENS.len());
    }

    #[test]
    fn test_encode_pads_and_masks() {
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&corpus(), 100).unwrap();
        let enc = SentenceEncoder::new(tok, 8).unwrap();

        let (ids, mask) = enc.encode("the house").unwrap();
        assert_eq!(ids.len(), 8);
        assert_eq!(ids[0], 101);
        assert_eq!(ids[3], 102);
        assert_eq!(mask, vec![1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(enc.vocab_size(), 104);
    }

    #[test]
    fn test_encode_truncates_before_sep() {
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&corpus(), 100).unwrap();
        let enc = SentenceEncoder::new(tok, 4).unwrap();

        let (ids, mask) = enc.encode("I remember the old house").unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[3], 102);
        assert_eq!(mask, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_max_len_too_small() {
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&corpus(), 100).unwrap();
        assert!(SentenceEncoder::new(tok, 1).is_err());
    }
}
