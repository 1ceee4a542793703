use crate::core::config::Config;
use crate::core::error::{Error, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::api::sync::Api;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

/// Sentence embedding model used for documents and queries
/// https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2
const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Longest input, in tokens, the model accepts
const MAX_SEQUENCE_LENGTH: usize = 512;

/// Text to fixed-length vector. Must be deterministic for a given model version
/// and return exactly one vector per input text.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// BERT sentence embedder running locally on candle
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Mutex<Tokenizer>,
    device: Device,
}

impl BertEmbedder {
    /// Load the model from the models directory, downloading it on first use
    pub fn init(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.models_dir)?;

        let model_path = config.models_dir.join("model.safetensors");
        let config_path = config.models_dir.join("config.json");
        let tokenizer_path = config.models_dir.join("tokenizer.json");

        if !(model_path.exists() && config_path.exists() && tokenizer_path.exists()) {
            Self::download_model(&model_path, &config_path, &tokenizer_path)?;
        }

        Self::load_model_files(&model_path, &config_path, &tokenizer_path)
    }

    /// Download model files from HuggingFace Hub into the models directory
    fn download_model(model_path: &Path, config_path: &Path, tokenizer_path: &Path) -> Result<()> {
        info!(model = DEFAULT_MODEL, "Downloading embedding model");

        let api = Api::new()?;
        let repo = api.model(DEFAULT_MODEL.to_string());

        let config_file = repo.get("config.json")?;
        let tokenizer_file = repo.get("tokenizer.json")?;
        let weights_file = repo.get("model.safetensors")?;

        std::fs::copy(&config_file, config_path)?;
        std::fs::copy(&tokenizer_file, tokenizer_path)?;
        std::fs::copy(&weights_file, model_path)?;

        info!("Embedding model downloaded");
        Ok(())
    }

    fn load_model_files(model_path: &Path, config_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let config_content = std::fs::read_to_string(config_path)?;
        let bert_config: BertConfig = serde_json::from_str(&config_content)
            .map_err(|e| Error::Model(format!("Failed to parse config: {}", e)))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| Error::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;
        // No padding: this BertModel takes no attention mask, so each text
        // runs on its own tokens only.
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| Error::Tokenizer(format!("Failed to configure truncation: {}", e)))?;

        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);

        // Memory-mapped safetensors; the file is owned by our models directory.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_path], DTYPE, &device)
                .map_err(|e| Error::Model(format!("Failed to load weights: {}", e)))?
        };
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| Error::Model(format!("Failed to load model: {}", e)))?;

        info!(model = DEFAULT_MODEL, "Embedding model loaded");

        Ok(Self {
            model,
            tokenizer: Mutex::new(tokenizer),
            device,
        })
    }
}

impl Embedder for BertEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = {
            let tokenizer = self
                .tokenizer
                .lock()
                .map_err(|e| Error::Model(format!("Failed to lock tokenizer: {}", e)))?;
            tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|e| Error::Tokenizer(format!("Tokenization failed: {}", e)))?
        };

        let mut vectors = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            let token_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
            let token_type_ids = token_ids.zeros_like()?;
            let mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;

            // [1, seq, hidden]
            let hidden = self.model.forward(&token_ids, &token_type_ids)?;
            let pooled = mean_pool(&hidden, &mask)?;
            vectors.push(pooled.get(0)?.to_vec1::<f32>()?);
        }
        Ok(vectors)
    }
}

/// Mean of the token states over positions where `mask` is 1.
/// `hidden` is `[batch, seq, dim]`, `mask` is `[batch, seq]`.
fn mean_pool(hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let mask = mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.maximum(1.0)?;
    Ok(summed.broadcast_div(&counts)?)
}

/// Loads the BERT model on the first embedding request, so commands that
/// never embed do not pay for the download or the load.
pub struct LazyBertEmbedder {
    config: Config,
    model: Mutex<Option<Arc<BertEmbedder>>>,
}

impl LazyBertEmbedder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            model: Mutex::new(None),
        }
    }

    fn model(&self) -> Result<Arc<BertEmbedder>> {
        let mut guard = self
            .model
            .lock()
            .map_err(|e| Error::Model(format!("Failed to lock model: {}", e)))?;
        if let Some(model) = guard.as_ref() {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(BertEmbedder::init(&self.config)?);
        *guard = Some(Arc::clone(&model));
        Ok(model)
    }
}

impl Embedder for LazyBertEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.model()?.embed(texts)
    }
}
