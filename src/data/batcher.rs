// ============================================================
// Layer 4 — Sentence Batcher
// ============================================================
// Implements Burn's Batcher trait to stack tokenised sentences
// into tensors for one forward pass.
//
//   Input:  Vec of N SentenceItems, each padded to length S
//   Output: SentenceBatch with input_ids / attention_mask [N, S]
//           and labels [N]
//
// All items are padded to the same max_len by the tokenizer
// store, so the flat Vec reshapes directly to [N, S].

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::SentenceItem;

// ─── SentenceBatch ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SentenceBatch<B: Backend> {
    /// Token ids — shape: [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding — shape: [batch_size, seq_len]
    pub attention_mask: Tensor<B, 2, Int>,

    /// Class index per sentence — shape: [batch_size]
    pub labels: Tensor<B, 1, Int>,
}

// ─── SentenceBatcher ──────────────────────────────────────────────────────────
#[derive(Clone, Debug, Default)]
pub struct SentenceBatcher;

impl SentenceBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, SentenceItem, SentenceBatch<B>> for SentenceBatcher {
    fn batch(&self, items: Vec<SentenceItem>, device: &B::Device) -> SentenceBatch<B> {
        let batch_size = items.len();
        let seq_len    = items.first().map(|i| i.input_ids.len()).unwrap_or(0);

        let input_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.input_ids.iter().map(|&x| x as i32))
            .collect();

        let mask_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.attention_mask.iter().map(|&x| x as i32))
            .collect();

        let labels: Vec<i32> = items.iter().map(|s| s.label as i32).collect();

        let input_ids = Tensor::<B, 1, Int>::from_ints(input_flat.as_slice(), device)
            .reshape([batch_size, seq_len]);

        let attention_mask = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), device)
            .reshape([batch_size, seq_len]);

        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), device);

        SentenceBatch { input_ids, attention_mask, labels }
    }
}

/// Split items into consecutive batches of at most `batch_size`
/// (sequential sampling; order is preserved).
pub fn sequential_batches<B: Backend>(
    items:      &[SentenceItem],
    batch_size: usize,
    device:     &B::Device,
) -> Vec<SentenceBatch<B>> {
    let batcher = SentenceBatcher::new();
    items
        .chunks(batch_size.max(1))
        .map(|chunk| batcher.batch(chunk.to_vec(), device))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn item(label: usize) -> SentenceItem {
        SentenceItem {
            input_ids:      vec![101, 5, 102, 0],
            attention_mask: vec![1, 1, 1, 0],
            label,
        }
    }

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batch: SentenceBatch<TestBackend> =
            SentenceBatcher::new().batch(vec![item(0), item(1), item(1)], &device);
        assert_eq!(batch.input_ids.dims(), [3, 4]);
        assert_eq!(batch.attention_mask.dims(), [3, 4]);
        assert_eq!(batch.labels.dims(), [3]);
    }

    #[test]
    fn test_sequential_batches_keep_order_and_remainder() {
        let device = Default::default();
        let items: Vec<_> = (0..5).map(|i| item(i % 2)).collect();
        let batches = sequential_batches::<TestBackend>(&items, 2, &device);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].labels.dims(), [1]);

        let first: Vec<i64> = batches[0].labels.clone().into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(first, vec![0, 1]);
    }
}
