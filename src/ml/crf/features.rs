// ============================================================
// Layer 5 — CRF Feature Index
// ============================================================
// Maps the open-ended attribute strings of the training data to
// dense weight indices.
//
//   attribute "par_type=client"  ──► attr id 7
//   state feature (attr 7, label "is_nar") ──► weight 12
//   transition ("not_nar" → "is_nar")      ──► weight 31
//
// Weight vector layout: [ state features … | transitions … ]
//
// State features are pruned by frequency: the summed attribute
// value of (attr, label) over the training data must reach
// `min_freq`. Transitions are never pruned. With
// `all_possible_transitions` every label pair owns a weight;
// otherwise only pairs observed in training do, and the rest
// score a constant 0.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::features::SentenceFeatures;

/// One sentence as sparse (attribute id, value) pairs.
pub type EncodedItem = Vec<(usize, f64)>;

/// A training sequence with its label ids.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSequence {
    pub items:  Vec<EncodedItem>,
    pub labels: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureIndex {
    labels:      Vec<String>,
    attributes:  HashMap<String, usize>,
    /// Per attribute id: (label id, weight id) of its kept state features
    state:       Vec<Vec<(usize, usize)>>,
    /// Row-major `labels × labels`: weight id of prev → next
    transitions: Vec<Option<usize>>,
    n_weights:   usize,
}

impl FeatureIndex {
    /// Build the index from training sequences.
    ///
    /// `labels` must already be validated to have one label per item.
    pub fn build(
        x: &[Vec<SentenceFeatures>],
        y: &[Vec<String>],
        min_freq: f64,
        all_possible_transitions: bool,
    ) -> Self {
        // Labels in first-appearance order
        let mut labels: Vec<String> = Vec::new();
        let mut label_ids: HashMap<&str, usize> = HashMap::new();
        for seq in y {
            for label in seq {
                if !label_ids.contains_key(label.as_str()) {
                    label_ids.insert(label.as_str(), labels.len());
                    labels.push(label.clone());
                }
            }
        }

        let mut attributes: HashMap<String, usize> = HashMap::new();
        let mut freq: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut seen_transitions: Vec<bool> = vec![false; labels.len() * labels.len()];

        for (items, seq_labels) in x.iter().zip(y) {
            let mut prev: Option<usize> = None;
            for (item, label) in items.iter().zip(seq_labels) {
                let l = label_ids[label.as_str()];
                for (name, value) in item.attributes() {
                    let next_id = attributes.len();
                    let a = *attributes.entry(name).or_insert(next_id);
                    *freq.entry((a, l)).or_insert(0.0) += value;
                }
                if let Some(p) = prev {
                    seen_transitions[p * labels.len() + l] = true;
                }
                prev = Some(l);
            }
        }

        let mut state: Vec<Vec<(usize, usize)>> = vec![Vec::new(); attributes.len()];
        let mut n_weights = 0usize;
        for (&(a, l), &f) in &freq {
            if f >= min_freq {
                state[a].push((l, n_weights));
                n_weights += 1;
            }
        }

        let transitions = seen_transitions
            .iter()
            .map(|&seen| {
                if seen || all_possible_transitions {
                    n_weights += 1;
                    Some(n_weights - 1)
                } else {
                    None
                }
            })
            .collect();

        Self { labels, attributes, state, transitions, n_weights }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn n_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn n_weights(&self) -> usize {
        self.n_weights
    }

    pub fn n_attributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn label_id(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Kept state features of one attribute.
    pub fn state_features(&self, attr: usize) -> &[(usize, usize)] {
        self.state.get(attr).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn transition(&self, prev: usize, next: usize) -> Option<usize> {
        self.transitions[prev * self.labels.len() + next]
    }

    /// Encode one sentence; attributes unseen in training are dropped.
    pub fn encode_item(&self, features: &SentenceFeatures) -> EncodedItem {
        features
            .attributes()
            .into_iter()
            .filter_map(|(name, value)| self.attributes.get(&name).map(|&a| (a, value)))
            .filter(|&(a, value)| value != 0.0 && !self.state[a].is_empty())
            .collect()
    }

    pub fn encode_items(&self, items: &[SentenceFeatures]) -> Vec<EncodedItem> {
        items.iter().map(|f| self.encode_item(f)).collect()
    }

    /// Encode a labelled sequence. Returns None when a label is unknown.
    pub fn encode(&self, items: &[SentenceFeatures], labels: &[String]) -> Option<EncodedSequence> {
        let labels = labels
            .iter()
            .map(|l| self.label_id(l))
            .collect::<Option<Vec<_>>>()?;
        Some(EncodedSequence { items: self.encode_items(items), labels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::FeatureValue;

    fn sent(token: &str, len: f64) -> SentenceFeatures {
        let mut f = SentenceFeatures::default();
        f.set("TOKEN", FeatureValue::Text(token.into())).unwrap();
        f.set("sent_len", FeatureValue::Number(len)).unwrap();
        f
    }

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_labels_in_first_appearance_order() {
        let x = vec![vec![sent("a", 1.0), sent("b", 1.0)]];
        let y = vec![labels(&["not_nar", "is_nar"])];
        let idx = FeatureIndex::build(&x, &y, 0.0, true);
        assert_eq!(idx.labels(), &["not_nar".to_string(), "is_nar".to_string()]);
    }

    #[test]
    fn test_min_freq_prunes_rare_state_features() {
        let x = vec![vec![sent("a", 1.0), sent("a", 1.0), sent("b", 1.0)]];
        let y = vec![labels(&["x", "x", "x"])];
        let idx = FeatureIndex::build(&x, &y, 2.0, true);

        // TOKEN=a seen twice, sent_len summed to 3, TOKEN=b once
        let kept: usize = (0..idx.n_attributes()).map(|a| idx.state_features(a).len()).sum();
        assert_eq!(kept, 2);
        // 2 state features + 1×1 transitions
        assert_eq!(idx.n_weights(), 3);
    }

    #[test]
    fn test_all_possible_transitions_flag() {
        let x = vec![vec![sent("a", 1.0), sent("b", 1.0)]];
        let y = vec![labels(&["p", "q"])];

        let all = FeatureIndex::build(&x, &y, 0.0, true);
        assert!(all.transition(1, 0).is_some());
        assert!(all.transition(0, 0).is_some());

        let seen = FeatureIndex::build(&x, &y, 0.0, false);
        assert!(seen.transition(0, 1).is_some());
        assert!(seen.transition(1, 0).is_none());
    }

    #[test]
    fn test_encode_drops_unknown_attributes() {
        let x = vec![vec![sent("a", 2.0)]];
        let y = vec![labels(&["p"])];
        let idx = FeatureIndex::build(&x, &y, 0.0, true);

        let encoded = idx.encode_item(&sent("zzz", 2.0));
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0].1, 2.0);

        assert!(idx.encode(&[sent("a", 1.0)], &labels(&["unknown"])).is_none());
    }
}
