//! Local sentence embeddings through ONNX Runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::{ArrayViewD, Axis, Ix3};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tokenizers::{
    Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams, TruncationStrategy,
};

use super::EmbeddingProvider;
use crate::error::{EmbeddingError, ModelError};
use crate::models::{EmbeddingConfig, Pooling};

struct Inner {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
    pooling: Pooling,
    uses_token_type_ids: bool,
}

/// Sentence-transformer style model (`model.onnx` + `tokenizer.json`).
///
/// Inference is synchronous, so calls are moved onto the blocking pool.
#[derive(Clone)]
pub struct OnnxEmbedder {
    inner: Arc<Inner>,
    model_id: String,
}

impl OnnxEmbedder {
    pub fn load(config: &EmbeddingConfig, model_dir: &Path) -> Result<Self, ModelError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            return Err(ModelError::NotFound(model_path.display().to_string()));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .with_intra_threads(num_cpus())
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?;

        let uses_token_type_ids = session.inputs.iter().any(|i| i.name == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_tokens as usize,
                strategy: TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
                dimension: config.dimension as usize,
                pooling: config.pooling,
                uses_token_type_ids,
            }),
            model_id: config.model_id.clone(),
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.embed(texts))
            .await
            .map_err(|e| ModelError::InferenceError(format!("inference task failed: {e}")))?
            .map_err(EmbeddingError::from)
    }
}

impl Inner {
    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        let batch_size = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let input_ids = flatten(&encodings, seq_len, Encoding::get_ids);
        let attention_mask = flatten(&encodings, seq_len, Encoding::get_attention_mask);
        let token_type_ids = flatten(&encodings, seq_len, Encoding::get_type_ids);

        let tensor = |data: Vec<i64>| {
            Tensor::from_array(([batch_size, seq_len], data))
                .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))
        };
        let ids_tensor = tensor(input_ids)?;
        let mask_tensor = tensor(attention_mask.clone())?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::InferenceError("session lock poisoned".to_string()))?;

        let outputs = if self.uses_token_type_ids {
            let types_tensor = tensor(token_type_ids)?;
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => types_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            ])
        }
        .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let pooled = pool(output, &attention_mask, seq_len, self.pooling)?;

        match pooled.iter().find(|v| v.len() != self.dimension) {
            Some(v) => Err(ModelError::InferenceError(format!(
                "model produced {}-dimensional output, configured dimension is {}",
                v.len(),
                self.dimension
            ))),
            None => Ok(pooled.iter().map(|v| normalize(v)).collect()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.inner.dimension
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.run(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding output".to_string()))
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.run(texts).await
    }
}

fn flatten(encodings: &[Encoding], seq_len: usize, field: fn(&Encoding) -> &[u32]) -> Vec<i64> {
    let mut out = vec![0i64; encodings.len() * seq_len];
    for (i, encoding) in encodings.iter().enumerate() {
        for (j, &value) in field(encoding).iter().enumerate() {
            out[i * seq_len + j] = i64::from(value);
        }
    }
    out
}

/// Reduce `[batch, seq, dim]` token states to one vector per input.
/// A 2-D output is taken as already pooled.
fn pool(
    output: ArrayViewD<'_, f32>,
    attention_mask: &[i64],
    seq_len: usize,
    pooling: Pooling,
) -> Result<Vec<Vec<f32>>, ModelError> {
    match output.ndim() {
        2 => Ok(output
            .axis_iter(Axis(0))
            .map(|row| row.iter().copied().collect())
            .collect()),
        3 => {
            let states = output
                .into_dimensionality::<Ix3>()
                .map_err(|e| ModelError::InferenceError(e.to_string()))?;

            let pooled = states
                .axis_iter(Axis(0))
                .enumerate()
                .map(|(i, tokens)| {
                    let mask = &attention_mask[i * seq_len..(i + 1) * seq_len];
                    match pooling {
                        Pooling::Mean => {
                            let dim = tokens.shape()[1];
                            let mut sum = vec![0.0f32; dim];
                            let mut count = 0.0f32;
                            for (token, _) in tokens
                                .axis_iter(Axis(0))
                                .zip(mask)
                                .filter(|(_, m)| **m == 1)
                            {
                                for (acc, v) in sum.iter_mut().zip(token.iter()) {
                                    *acc += v;
                                }
                                count += 1.0;
                            }
                            sum.iter().map(|v| v / count.max(1.0)).collect()
                        }
                        Pooling::LastToken => {
                            let last = mask.iter().rposition(|m| *m == 1).unwrap_or(0);
                            tokens.index_axis(Axis(0), last).iter().copied().collect()
                        }
                    }
                })
                .collect();
            Ok(pooled)
        }
        n => Err(ModelError::InferenceError(format!(
            "unexpected output rank: {n}"
        ))),
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn states() -> Array3<f32> {
        // batch 1, 3 tokens, dim 2; the last token is padding
        Array3::from_shape_vec((1, 3, 2), vec![1.0, 2.0, 3.0, 4.0, 100.0, 100.0]).unwrap()
    }

    #[test]
    fn test_mean_pooling_ignores_padding() {
        let out = pool(states().into_dyn().view(), &[1, 1, 0], 3, Pooling::Mean).unwrap();
        assert_eq!(out, vec![vec![2.0, 3.0]]);
    }

    #[test]
    fn test_last_token_pooling_uses_last_unmasked() {
        let out = pool(states().into_dyn().view(), &[1, 1, 0], 3, Pooling::LastToken).unwrap();
        assert_eq!(out, vec![vec![3.0, 4.0]]);
    }

    #[test]
    fn test_two_dimensional_output_passes_through() {
        let arr = ndarray::Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let out = pool(arr.into_dyn().view(), &[1, 1], 1, Pooling::Mean).unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_normalize() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxEmbedder::load(&EmbeddingConfig::default(), dir.path());
        assert!(matches!(result, Err(ModelError::NotFound(_))));
    }
}
