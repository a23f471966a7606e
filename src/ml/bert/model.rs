use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, log_softmax, relu, tanh},
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct NarrativeClassifierConfig {
    pub vocab_size: usize,
    #[config(default = 512)]
    pub max_position: usize,
    #[config(default = 768)]
    pub hidden_size: usize,
    #[config(default = 12)]
    pub num_heads: usize,
    #[config(default = 12)]
    pub num_layers: usize,
    #[config(default = 3072)]
    pub intermediate_size: usize,
    /// Width of the head's hidden layer
    #[config(default = 512)]
    pub head_hidden: usize,
    #[config(default = 2)]
    pub n_classes: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl NarrativeClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> NarrativeClassifier<B> {
        NarrativeClassifier {
            encoder: self.init_encoder(device),
            head:    self.init_head(device),
        }
    }

    pub fn init_encoder<B: Backend>(&self, device: &B::Device) -> BertEncoder<B> {
        let layers = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        BertEncoder {
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.hidden_size).init(device),
            position_embedding: EmbeddingConfig::new(self.max_position, self.hidden_size).init(device),
            embedding_norm:     LayerNormConfig::new(self.hidden_size).init(device),
            layers,
            pooler:             LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            dropout:            DropoutConfig::new(self.dropout).init(),
        }
    }

    pub fn init_head<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            hidden:  LinearConfig::new(self.hidden_size, self.head_hidden).init(device),
            output:  LinearConfig::new(self.head_hidden, self.n_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn = MultiHeadAttentionConfig::new(self.hidden_size, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        EncoderBlock {
            self_attn,
            ffn_linear1: LinearConfig::new(self.hidden_size, self.intermediate_size).init(device),
            ffn_linear2: LinearConfig::new(self.intermediate_size, self.hidden_size).init(device),
            norm1:       LayerNormConfig::new(self.hidden_size).init(device),
            norm2:       LayerNormConfig::new(self.hidden_size).init(device),
            dropout:     DropoutConfig::new(self.dropout).init(),
        }
    }
}

// ─── Encoder ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `mask_pad`: [batch, seq_len], true at padding positions
    pub fn forward(&self, x: Tensor<B, 3>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attn = self
            .self_attn
            .forward(MhaInput::self_attn(x.clone()).mask_pad(mask_pad))
            .context;
        let x = self.norm1.forward(x + self.dropout.forward(attn));
        let ffn = self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn))
    }
}

/// Post-norm transformer encoder with a BERT-style tanh pooler on [CLS].
#[derive(Module, Debug)]
pub struct BertEncoder<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub embedding_norm:     LayerNorm<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub pooler:             Linear<B>,
    pub dropout:            Dropout,
}

impl<B: Backend> BertEncoder<B> {
    /// input_ids, attention_mask: [batch, seq_len] → pooled: [batch, hidden]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let [batch_size, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let tok_emb = self.token_embedding.forward(input_ids);
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let mut x = self.dropout.forward(self.embedding_norm.forward(tok_emb + pos_emb));
        let mask_pad = attention_mask.equal_elem(0);
        for layer in &self.layers {
            x = layer.forward(x, mask_pad.clone());
        }

        let [_, _, hidden] = x.dims();
        let cls = x.slice([0..batch_size, 0..1, 0..hidden]).reshape([batch_size, hidden]);
        tanh(self.pooler.forward(cls))
    }
}

// ─── Head ─────────────────────────────────────────────────────────────────────
/// dropout → Linear(hidden, head_hidden) → ReLU → dropout → Linear(head_hidden, classes) → log-softmax
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub hidden:  Linear<B>,
    pub output:  Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn forward(&self, pooled: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.hidden.forward(self.dropout.forward(pooled)));
        let logits = self.output.forward(self.dropout.forward(x));
        log_softmax(logits, 1)
    }
}

// ─── Full model ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct NarrativeClassifier<B: Backend> {
    pub encoder: BertEncoder<B>,
    pub head:    ClassifierHead<B>,
}

impl<B: Backend> NarrativeClassifier<B> {
    /// Log-probabilities per class: [batch, n_classes]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        self.head.forward(self.encoder.forward(input_ids, attention_mask))
    }

    /// Stop gradients through the encoder; only the head trains.
    pub fn freeze_body(self) -> Self {
        Self { encoder: self.encoder.no_grad(), head: self.head }
    }
}
