use serde::{Deserialize, Serialize};

/// One tokenised, padded sentence with its binary class.
/// Sequence format: [CLS] tokens [SEP] [PAD]...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceItem {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub label:          usize,
}
