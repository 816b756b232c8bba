//! Encoder plus tokenizer: text in, embedding tensor out.

use super::{Architecture, EncoderStack};
use crate::error::{EmbeddingsError, Result};
use crate::tensor::l2_normalize;
use crate::tokenizer::{pad_to_longest, TextTokenizer, Tokenizer};
use candle_core::{Device, Tensor};
use tracing::debug;

/// A loaded model ready to embed text.
///
/// Weights are immutable after load, so one bundle can serve concurrent
/// `encode` calls through a shared reference.
#[derive(Debug)]
pub struct ModelBundle<T: TextTokenizer = Tokenizer> {
    encoder: EncoderStack,
    tokenizer: T,
    pad_token_id: u32,
    device: Device,
}

impl<T: TextTokenizer> ModelBundle<T> {
    /// Pair an encoder with its tokenizer.
    pub fn new(encoder: EncoderStack, tokenizer: T, pad_token_id: u32, device: &Device) -> Self {
        Self {
            encoder,
            tokenizer,
            pad_token_id,
            device: device.clone(),
        }
    }

    /// Embed one text: `[1, width]`.
    ///
    /// `max_length` defaults to the architecture's usual limit.
    pub fn encode(&self, text: &str, max_length: Option<usize>) -> Result<Tensor> {
        let max_length = max_length.unwrap_or_else(|| self.architecture().default_max_length());
        let tokens = self.tokenizer.tokenize(text, Some(max_length), true)?;
        debug!(tokens = tokens.len(), "Encoding text");
        let len = tokens.len();
        let input_ids = Tensor::from_vec(tokens, (1, len), &self.device)?;
        self.embed_ids(&input_ids, None)
    }

    /// Embed several texts: `[batch, width]`.
    ///
    /// Texts are padded to the longest one with the bundle's pad id; BERT
    /// and XLM-R get an attention mask covering the unpadded tokens.
    pub fn batch_encode(&self, texts: &[&str], max_length: Option<usize>) -> Result<Tensor> {
        if texts.is_empty() {
            return Err(EmbeddingsError::InvalidArgument(
                "batch_encode needs at least one text".into(),
            ));
        }
        let max_length = max_length.unwrap_or_else(|| self.architecture().default_max_length());
        let encoded = texts
            .iter()
            .map(|text| self.tokenizer.tokenize(text, Some(max_length), true))
            .collect::<Result<Vec<_>>>()?;
        let lengths: Vec<usize> = encoded.iter().map(Vec::len).collect();
        let padded = pad_to_longest(encoded, self.pad_token_id);

        let batch = padded.len();
        let seq_len = padded.first().map_or(0, Vec::len);
        debug!(batch, seq_len, "Encoding batch");

        let input_ids = Tensor::from_vec(
            padded.into_iter().flatten().collect::<Vec<u32>>(),
            (batch, seq_len),
            &self.device,
        )?;
        let mask = match self.architecture() {
            Architecture::Bert | Architecture::XlmRoberta => {
                Some(length_mask(&lengths, seq_len, &self.device)?)
            }
            Architecture::ClipText => None,
        };
        self.embed_ids(&input_ids, mask.as_ref())
    }

    fn embed_ids(&self, input_ids: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let output = self.encoder.encode(input_ids, None, attention_mask, None)?;
        match self.architecture() {
            Architecture::Bert | Architecture::XlmRoberta => {
                Ok(output.sequence_output.narrow(1, 0, 1)?.squeeze(1)?)
            }
            Architecture::ClipText => {
                let pooled = output.pooled_output.ok_or_else(|| {
                    EmbeddingsError::InvalidArgument("CLIP encoder has no pooler".into())
                })?;
                let projected = self.encoder.project(&pooled)?;
                l2_normalize(&projected, f64::from(f32::EPSILON))
            }
        }
    }

    /// Get the architecture.
    pub fn architecture(&self) -> Architecture {
        self.encoder.architecture()
    }

    /// Get the encoder.
    pub fn encoder(&self) -> &EncoderStack {
        &self.encoder
    }

    /// Get the tokenizer.
    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    /// Get the padding id used for batches.
    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    /// Width of the vectors `encode` returns.
    pub fn dimension(&self) -> usize {
        self.encoder.output_size()
    }

    /// Get the device.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// `[batch, seq_len]` mask with ones over the first `lengths[i]` positions.
fn length_mask(lengths: &[usize], seq_len: usize, device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = lengths
        .iter()
        .flat_map(|&len| (0..seq_len).map(move |pos| if pos < len { 1.0 } else { 0.0 }))
        .collect();
    Ok(Tensor::from_vec(values, (lengths.len(), seq_len), device)?)
}
