//! Generic encoder stack.
//!
//! Embeddings, N encoder layers, an optional final norm and pooler. The
//! [`Architecture`] decides the parameter names and the variant points
//! (positions, mask, norm placement, activation, pooler).

use super::{
    Architecture, Embeddings, EncoderLayer, FeedForward, MaskKind, ModelConfig, NormPlacement,
    Pooler, PositionIds, SelfAttention,
};
use crate::error::{EmbeddingsError, Result};
use crate::tensor::{LayerNorm, Linear};
use crate::weights::WeightResolver;
use candle_core::Tensor;
use tracing::{debug, info};

/// Result of one encoder forward pass.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Per-token hidden states: [batch, seq_len, hidden]
    pub sequence_output: Tensor,
    /// Pooled output: [batch, hidden], when the stack has a pooler.
    pub pooled_output: Option<Tensor>,
}

/// A complete encoder for one architecture family.
#[derive(Debug, Clone)]
pub struct EncoderStack {
    architecture: Architecture,
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
    mask: MaskKind,
    final_norm: Option<LayerNorm>,
    pooler: Option<Pooler>,
    /// CLIP text projection: [projection_dim, hidden]
    projection: Option<Linear>,
}

impl EncoderStack {
    /// Assemble a stack from already-built parts.
    pub fn new(
        architecture: Architecture,
        embeddings: Embeddings,
        layers: Vec<EncoderLayer>,
        mask: MaskKind,
        final_norm: Option<LayerNorm>,
        pooler: Option<Pooler>,
        projection: Option<Linear>,
    ) -> Self {
        Self {
            architecture,
            embeddings,
            layers,
            mask,
            final_norm,
            pooler,
            projection,
        }
    }

    /// Build a stack from checkpoint weights.
    ///
    /// Every tensor is shape-checked against `config`; any missing or
    /// mis-shaped tensor fails the whole load.
    pub fn load(
        resolver: &WeightResolver<'_>,
        config: &ModelConfig,
        architecture: Architecture,
    ) -> Result<Self> {
        config.validate()?;
        let stack = match architecture {
            Architecture::Bert | Architecture::XlmRoberta => {
                load_bert_like(resolver, config, architecture)?
            }
            Architecture::ClipText => load_clip_text(resolver, config)?,
        };
        info!(
            architecture = %architecture,
            layers = stack.layers.len(),
            hidden = config.hidden_size,
            pooler = stack.pooler.is_some(),
            "Built encoder stack"
        );
        Ok(stack)
    }

    /// Forward pass.
    ///
    /// `input_ids: [batch, seq_len]`; the optional tensors have the same
    /// shape (a rank-3 `attention_mask` is accepted by XLM-R).
    pub fn encode(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        position_ids: Option<&Tensor>,
    ) -> Result<EncoderOutput> {
        let mut hidden_states = self
            .embeddings
            .forward(input_ids, token_type_ids, position_ids)?;
        let mask = self.mask.build(input_ids, attention_mask)?;

        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, mask.as_ref())?;
        }

        if let Some(norm) = &self.final_norm {
            hidden_states = norm.forward(&hidden_states)?;
        }

        let pooled_output = match &self.pooler {
            Some(pooler) => Some(pooler.forward(&hidden_states, input_ids)?),
            None => None,
        };

        Ok(EncoderOutput {
            sequence_output: hidden_states,
            pooled_output,
        })
    }

    /// Apply the text projection, if the stack has one.
    pub fn project(&self, pooled: &Tensor) -> Result<Tensor> {
        match &self.projection {
            Some(projection) => projection.forward(pooled),
            None => Ok(pooled.clone()),
        }
    }

    /// Get the architecture.
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Get the number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Get the hidden width.
    pub fn hidden_size(&self) -> usize {
        self.embeddings.hidden_size()
    }

    /// Width of [`EncoderStack::project`] output.
    pub fn output_size(&self) -> usize {
        self.projection
            .as_ref()
            .map_or_else(|| self.hidden_size(), Linear::out_features)
    }

    /// Get the mask strategy.
    pub fn mask_kind(&self) -> MaskKind {
        self.mask
    }

    /// Whether the stack has a pooler.
    pub fn has_pooler(&self) -> bool {
        self.pooler.is_some()
    }
}

fn load_bert_like(
    resolver: &WeightResolver<'_>,
    config: &ModelConfig,
    architecture: Architecture,
) -> Result<EncoderStack> {
    let hidden = config.hidden_size;
    let eps = config.layer_norm_eps(architecture);

    let (positions, mask) = match architecture {
        Architecture::XlmRoberta => (
            PositionIds::PaddingAware {
                padding_idx: config.pad_token_id(),
            },
            MaskKind::XlmRobertaExtended,
        ),
        _ => (PositionIds::Range, MaskKind::BertExtended),
    };

    let embeddings = Embeddings::new(
        resolver.embedding(
            "embeddings.word_embeddings.weight",
            config.vocab_size,
            hidden,
        )?,
        resolver.embedding(
            "embeddings.position_embeddings.weight",
            config.max_position_embeddings,
            hidden,
        )?,
        Some(resolver.embedding(
            "embeddings.token_type_embeddings.weight",
            config.type_vocab_size,
            hidden,
        )?),
        Some(resolver.layer_norm("embeddings.LayerNorm", hidden, eps)?),
        positions,
    );

    let layers = (0..config.num_hidden_layers)
        .map(|i| {
            let p = format!("encoder.layer.{i}");
            debug!(layer = i, "Loading encoder layer");
            let attention = SelfAttention::new(
                resolver.linear(&format!("{p}.attention.self.query"), hidden, hidden, true)?,
                resolver.linear(&format!("{p}.attention.self.key"), hidden, hidden, true)?,
                resolver.linear(&format!("{p}.attention.self.value"), hidden, hidden, true)?,
                resolver.linear(&format!("{p}.attention.output.dense"), hidden, hidden, true)?,
                config.num_attention_heads,
            )?;
            let feed_forward = FeedForward::new(
                resolver.linear(
                    &format!("{p}.intermediate.dense"),
                    hidden,
                    config.intermediate_size,
                    true,
                )?,
                resolver.linear(
                    &format!("{p}.output.dense"),
                    config.intermediate_size,
                    hidden,
                    true,
                )?,
                architecture.activation(),
            );
            Ok(EncoderLayer::new(
                attention,
                resolver.layer_norm(&format!("{p}.attention.output.LayerNorm"), hidden, eps)?,
                feed_forward,
                resolver.layer_norm(&format!("{p}.output.LayerNorm"), hidden, eps)?,
                NormPlacement::Post,
                i,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let pooler = if config.add_pooling_layer() {
        Some(Pooler::FirstTokenDense(resolver.linear(
            "pooler.dense",
            hidden,
            hidden,
            true,
        )?))
    } else {
        None
    };

    Ok(EncoderStack::new(
        architecture,
        embeddings,
        layers,
        mask,
        None,
        pooler,
        None,
    ))
}

fn load_clip_text(resolver: &WeightResolver<'_>, config: &ModelConfig) -> Result<EncoderStack> {
    let hidden = config.hidden_size;
    let eps = config.layer_norm_eps(Architecture::ClipText);
    let projection_dim = config.projection_dim.ok_or_else(|| {
        EmbeddingsError::InvalidFile("CLIP config has no projection_dim".into())
    })?;

    let embeddings = Embeddings::new(
        resolver.embedding(
            "text_model.embeddings.token_embedding.weight",
            config.vocab_size,
            hidden,
        )?,
        resolver.embedding(
            "text_model.embeddings.position_embedding.weight",
            config.max_position_embeddings,
            hidden,
        )?,
        None,
        None,
        PositionIds::Range,
    );

    let layers = (0..config.num_hidden_layers)
        .map(|i| {
            let p = format!("text_model.encoder.layers.{i}");
            debug!(layer = i, "Loading encoder layer");
            let attention = SelfAttention::new(
                resolver.linear(&format!("{p}.self_attn.q_proj"), hidden, hidden, true)?,
                resolver.linear(&format!("{p}.self_attn.k_proj"), hidden, hidden, true)?,
                resolver.linear(&format!("{p}.self_attn.v_proj"), hidden, hidden, true)?,
                resolver.linear(&format!("{p}.self_attn.out_proj"), hidden, hidden, true)?,
                config.num_attention_heads,
            )?;
            let feed_forward = FeedForward::new(
                resolver.linear(&format!("{p}.mlp.fc1"), hidden, config.intermediate_size, true)?,
                resolver.linear(&format!("{p}.mlp.fc2"), config.intermediate_size, hidden, true)?,
                Architecture::ClipText.activation(),
            );
            Ok(EncoderLayer::new(
                attention,
                resolver.layer_norm(&format!("{p}.layer_norm1"), hidden, eps)?,
                feed_forward,
                resolver.layer_norm(&format!("{p}.layer_norm2"), hidden, eps)?,
                NormPlacement::Pre,
                i,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EncoderStack::new(
        Architecture::ClipText,
        embeddings,
        layers,
        MaskKind::Causal,
        Some(resolver.layer_norm("text_model.final_layer_norm", hidden, eps)?),
        Some(Pooler::EndToken),
        Some(resolver.linear("text_projection", hidden, projection_dim, false)?),
    ))
}

/// Canonical parameter names and shapes a checkpoint of `architecture`
/// must provide for `config`.
pub fn expected_parameters(
    architecture: Architecture,
    config: &ModelConfig,
) -> Vec<(String, Vec<usize>)> {
    let h = config.hidden_size;
    let ff = config.intermediate_size;
    let mut params = Vec::new();
    let linear = |params: &mut Vec<(String, Vec<usize>)>,
                  prefix: String,
                  inp: usize,
                  out: usize,
                  bias: bool| {
        params.push((format!("{prefix}.weight"), vec![out, inp]));
        if bias {
            params.push((format!("{prefix}.bias"), vec![out]));
        }
    };
    let norm = |params: &mut Vec<(String, Vec<usize>)>, prefix: String| {
        params.push((format!("{prefix}.weight"), vec![h]));
        params.push((format!("{prefix}.bias"), vec![h]));
    };

    match architecture {
        Architecture::Bert | Architecture::XlmRoberta => {
            params.push(("embeddings.word_embeddings.weight".into(), vec![config.vocab_size, h]));
            params.push((
                "embeddings.position_embeddings.weight".into(),
                vec![config.max_position_embeddings, h],
            ));
            params.push((
                "embeddings.token_type_embeddings.weight".into(),
                vec![config.type_vocab_size, h],
            ));
            norm(&mut params, "embeddings.LayerNorm".into());
            for i in 0..config.num_hidden_layers {
                let p = format!("encoder.layer.{i}");
                for name in ["query", "key", "value"] {
                    linear(&mut params, format!("{p}.attention.self.{name}"), h, h, true);
                }
                linear(&mut params, format!("{p}.attention.output.dense"), h, h, true);
                norm(&mut params, format!("{p}.attention.output.LayerNorm"));
                linear(&mut params, format!("{p}.intermediate.dense"), h, ff, true);
                linear(&mut params, format!("{p}.output.dense"), ff, h, true);
                norm(&mut params, format!("{p}.output.LayerNorm"));
            }
            if config.add_pooling_layer() {
                linear(&mut params, "pooler.dense".into(), h, h, true);
            }
        }
        Architecture::ClipText => {
            params.push((
                "text_model.embeddings.token_embedding.weight".into(),
                vec![config.vocab_size, h],
            ));
            params.push((
                "text_model.embeddings.position_embedding.weight".into(),
                vec![config.max_position_embeddings, h],
            ));
            for i in 0..config.num_hidden_layers {
                let p = format!("text_model.encoder.layers.{i}");
                for name in ["q_proj", "k_proj", "v_proj", "out_proj"] {
                    linear(&mut params, format!("{p}.self_attn.{name}"), h, h, true);
                }
                norm(&mut params, format!("{p}.layer_norm1"));
                linear(&mut params, format!("{p}.mlp.fc1"), h, ff, true);
                linear(&mut params, format!("{p}.mlp.fc2"), ff, h, true);
                norm(&mut params, format!("{p}.layer_norm2"));
            }
            norm(&mut params, "text_model.final_layer_norm".into());
            let projection_dim = config.projection_dim.unwrap_or(h);
            linear(&mut params, "text_projection".into(), h, projection_dim, false);
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{KeyDialect, KeyTransform, WeightBundle};
    use candle_core::{DType, Device};
    use std::collections::HashMap;

    fn config(architecture: Architecture) -> ModelConfig {
        ModelConfig {
            model_type: architecture.to_string(),
            vocab_size: 20,
            hidden_size: 8,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 16,
            max_position_embeddings: 16,
            layer_norm_eps: None,
            type_vocab_size: 2,
            pad_token_id: Some(1),
            add_pooling_layer: None,
            projection_dim: Some(4),
        }
    }

    fn random_bundle(
        architecture: Architecture,
        config: &ModelConfig,
        transform: &dyn KeyTransform,
    ) -> WeightBundle {
        let tensors = expected_parameters(architecture, config)
            .into_iter()
            .map(|(name, shape)| {
                let t = Tensor::randn(0.0f32, 0.1, shape, &Device::Cpu).unwrap();
                (transform.transform(&name), t)
            })
            .collect::<HashMap<_, _>>();
        WeightBundle::from_tensors(tensors)
    }

    fn load(architecture: Architecture, config: &ModelConfig) -> EncoderStack {
        let identity = KeyDialect::Identity;
        let bundle = random_bundle(architecture, config, &identity);
        let resolver = WeightResolver::new(&bundle, &identity);
        EncoderStack::load(&resolver, config, architecture).unwrap()
    }

    fn ids() -> Tensor {
        Tensor::new(&[[0u32, 5, 6, 2, 1], [0, 7, 2, 1, 1]], &Device::Cpu).unwrap()
    }

    #[test]
    fn bert_shapes() {
        let cfg = config(Architecture::Bert);
        let stack = load(Architecture::Bert, &cfg);
        assert_eq!(stack.num_layers(), 2);
        assert_eq!(stack.mask_kind(), MaskKind::BertExtended);
        let out = stack.encode(&ids(), None, None, None).unwrap();
        assert_eq!(out.sequence_output.dims(), &[2, 5, 8]);
        assert_eq!(out.pooled_output.unwrap().dims(), &[2, 8]);
    }

    #[test]
    fn bert_pooler_output_is_bounded() {
        let cfg = config(Architecture::Bert);
        let stack = load(Architecture::Bert, &cfg);
        let pooled = stack.encode(&ids(), None, None, None).unwrap().pooled_output.unwrap();
        let values = pooled.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn pooler_can_be_disabled() {
        let mut cfg = config(Architecture::Bert);
        cfg.add_pooling_layer = Some(false);
        let stack = load(Architecture::Bert, &cfg);
        assert!(!stack.has_pooler());
        assert!(stack.encode(&ids(), None, None, None).unwrap().pooled_output.is_none());
    }

    #[test]
    fn xlm_roberta_accepts_padding_mask() {
        let cfg = config(Architecture::XlmRoberta);
        let stack = load(Architecture::XlmRoberta, &cfg);
        let mask = Tensor::new(&[[1u32, 1, 1, 1, 0], [1, 1, 1, 0, 0]], &Device::Cpu).unwrap();
        let out = stack.encode(&ids(), None, Some(&mask), None).unwrap();
        assert_eq!(out.sequence_output.dims(), &[2, 5, 8]);
    }

    #[test]
    fn padding_does_not_change_valid_positions() {
        let cfg = config(Architecture::XlmRoberta);
        let stack = load(Architecture::XlmRoberta, &cfg);
        let short = Tensor::new(&[[0u32, 7, 2]], &Device::Cpu).unwrap();
        let padded = Tensor::new(&[[0u32, 7, 2, 1, 1]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 1, 0, 0]], &Device::Cpu).unwrap();

        let a = stack.encode(&short, None, None, None).unwrap().sequence_output;
        let b = stack.encode(&padded, None, Some(&mask), None).unwrap().sequence_output;
        let a = a.to_vec3::<f32>().unwrap();
        let b = b.narrow(1, 0, 3).unwrap().to_vec3::<f32>().unwrap();
        for (x, y) in a[0].iter().flatten().zip(b[0].iter().flatten()) {
            assert!((x - y).abs() < 1e-4, "{x} vs {y}");
        }
    }

    #[test]
    fn clip_projects_pooled_output() {
        let cfg = config(Architecture::ClipText);
        let stack = load(Architecture::ClipText, &cfg);
        assert_eq!(stack.mask_kind(), MaskKind::Causal);
        assert_eq!(stack.output_size(), 4);
        let out = stack.encode(&ids(), None, None, None).unwrap();
        let pooled = out.pooled_output.unwrap();
        assert_eq!(pooled.dims(), &[2, 8]);
        assert_eq!(stack.project(&pooled).unwrap().dims(), &[2, 4]);
    }

    #[test]
    fn clip_pooled_is_end_token_state() {
        let cfg = config(Architecture::ClipText);
        let stack = load(Architecture::ClipText, &cfg);
        let out = stack.encode(&ids(), None, None, None).unwrap();
        let seq = out.sequence_output.to_vec3::<f32>().unwrap();
        let pooled = out.pooled_output.unwrap().to_vec2::<f32>().unwrap();
        // Highest ids sit at positions 2 and 1
        assert_eq!(pooled[0], seq[0][2]);
        assert_eq!(pooled[1], seq[1][1]);
    }

    #[test]
    fn missing_weight_fails_whole_load() {
        let cfg = config(Architecture::Bert);
        let identity = KeyDialect::Identity;
        let mut tensors: HashMap<String, Tensor> = expected_parameters(Architecture::Bert, &cfg)
            .into_iter()
            .map(|(name, shape)| (name, Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()))
            .collect();
        tensors.remove("encoder.layer.1.output.dense.bias");
        let bundle = WeightBundle::from_tensors(tensors);
        let resolver = WeightResolver::new(&bundle, &identity);
        let err = EncoderStack::load(&resolver, &cfg, Architecture::Bert).unwrap_err();
        assert!(matches!(err, EmbeddingsError::MissingWeightKey(k) if k.contains("layer.1.output.dense.bias")));
    }

    #[test]
    fn mis_shaped_weight_fails_load() {
        let cfg = config(Architecture::Bert);
        let identity = KeyDialect::Identity;
        let mut tensors: HashMap<String, Tensor> = expected_parameters(Architecture::Bert, &cfg)
            .into_iter()
            .map(|(name, shape)| (name, Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()))
            .collect();
        tensors.insert(
            "pooler.dense.weight".into(),
            Tensor::zeros((8, 4), DType::F32, &Device::Cpu).unwrap(),
        );
        let bundle = WeightBundle::from_tensors(tensors);
        let resolver = WeightResolver::new(&bundle, &identity);
        let err = EncoderStack::load(&resolver, &cfg, Architecture::Bert).unwrap_err();
        assert!(matches!(err, EmbeddingsError::ShapeMismatch(_)));
    }

    #[test]
    fn google_bert_dialect_loads() {
        let cfg = config(Architecture::Bert);
        let dialect = KeyDialect::GoogleBert;
        let bundle = random_bundle(Architecture::Bert, &cfg, &dialect);
        assert!(bundle.contains("bert.embeddings.LayerNorm.gamma"));
        let resolver = WeightResolver::new(&bundle, &dialect);
        assert!(EncoderStack::load(&resolver, &cfg, Architecture::Bert).is_ok());
    }

    #[test]
    fn clip_requires_projection_dim() {
        let mut cfg = config(Architecture::ClipText);
        let identity = KeyDialect::Identity;
        let bundle = random_bundle(Architecture::ClipText, &cfg, &identity);
        cfg.projection_dim = None;
        let resolver = WeightResolver::new(&bundle, &identity);
        let err = EncoderStack::load(&resolver, &cfg, Architecture::ClipText).unwrap_err();
        assert!(matches!(err, EmbeddingsError::InvalidFile(_)));
    }

    #[test]
    fn expected_parameter_counts() {
        let cfg = config(Architecture::Bert);
        // 3 tables + 2 norm + 2 layers * 16 + 2 pooler
        assert_eq!(expected_parameters(Architecture::Bert, &cfg).len(), 39);
        let cfg = config(Architecture::ClipText);
        // 2 tables + 2 layers * 16 + 2 final norm + 1 projection
        assert_eq!(expected_parameters(Architecture::ClipText, &cfg).len(), 37);
    }
}
