use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::{
    EncodeInput, Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams, TruncationStrategy,
};

/// XLM-RoBERTa `<pad>` id.
pub const PAD_ID: u32 = 1;

/// Token tensors for one batch, all shaped `[B,T]`.
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

/// Configure batch-longest padding and longest-first truncation in place.
pub fn configure(tokenizer: &mut Tokenizer, max_len: usize) -> Result<()> {
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        pad_id: PAD_ID,
        pad_token: "<pad>".to_string(),
        ..Default::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_len,
            strategy: TruncationStrategy::LongestFirst,
            ..Default::default()
        }))
        .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
    Ok(())
}

pub fn tokenize_on_device<'s, E>(tokenizer: &Tokenizer, inputs: Vec<E>, device: &Device) -> Result<Batch>
where
    E: Into<EncodeInput<'s>> + Send,
{
    let encodings = tokenizer
        .encode_batch(inputs, true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    to_tensors(&encodings, device)
}

fn to_tensors(encodings: &[Encoding], device: &Device) -> Result<Batch> {
    let batch = encodings.len();
    let seq = encodings.first().map_or(0, Encoding::len);
    let mut ids = Vec::with_capacity(batch * seq);
    let mut mask = Vec::with_capacity(batch * seq);
    let mut types = Vec::with_capacity(batch * seq);
    for enc in encodings {
        if enc.len() != seq {
            return Err(anyhow!("Ragged batch: expected {} tokens, got {}", seq, enc.len()));
        }
        ids.extend_from_slice(enc.get_ids());
        mask.extend_from_slice(enc.get_attention_mask());
        types.extend_from_slice(enc.get_type_ids());
    }
    Ok(Batch {
        input_ids: Tensor::from_vec(ids, (batch, seq), device)?,
        attention_mask: Tensor::from_vec(mask, (batch, seq), device)?,
        token_type_ids: Tensor::from_vec(types, (batch, seq), device)?,
    })
}
