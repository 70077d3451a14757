//! Experiment families: one zero-argument factory per family.
//!
//! Each factory hardcodes the defaults for its dataset/model pairing and
//! performs no I/O. Adding a family means adding a factory and an entry in
//! [`FAMILIES`]; the dispatcher is untouched.

use super::{
    BackendConfig, Composition, Conditioning, Dataset, Dtype, ExperimentConfig, OptimizerConfig,
    SamplingConfig, SamplingMethod, SortBy,
};
use crate::error::ConfigError;

/// A zero-argument config factory.
pub type ConfigFactory = fn() -> ExperimentConfig;

/// Family name used when a source does not name one.
pub const DEFAULT_FAMILY: &str = "bert_layout_categorized";

const FAMILIES: &[(&str, ConfigFactory)] = &[
    ("bert_layout_categorized", bert_layout_categorized),
    ("transformer_categorized", transformer_categorized),
];

/// Look up the factory for a family identifier.
pub fn family(name: &str) -> Result<ConfigFactory, ConfigError> {
    FAMILIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, factory)| *factory)
        .ok_or_else(|| ConfigError::UnknownFamily {
            name: name.to_string(),
        })
}

/// Names of every registered family.
pub fn family_names() -> Vec<&'static str> {
    FAMILIES.iter().map(|(n, _)| *n).collect()
}

/// Masked BERT-layout model with a VAE objective on the categorized dataset.
pub fn bert_layout_categorized() -> ExperimentConfig {
    ExperimentConfig {
        dataset_path: "/home/work/increased_en_data/BLT/data2/".to_string(),
        dataset: Dataset::Categorized,
        vocab_size: 154,
        experiment: "bert_layout".to_string(),
        model_class: "bert_layout".to_string(),
        image_size: 256,
        composition: Composition::Default,
        sort_by: SortBy::TopLeftToBottomRight,

        seed: 0,
        layout_dim: 2,
        log_every_steps: 100,
        eval_num_steps: 1000,
        max_length: 128,
        batch_size: 64,
        train_shuffle: true,
        eval_pad_last_batch: false,
        eval_batch_size: 64,
        num_train_steps: 50_000,
        checkpoint_every_steps: 5000,
        eval_every_steps: 1000,
        num_eval_steps: 100,
        max_checkpoints: 3,

        dtype: Dtype::Float32,
        autoregressive: false,
        shuffle_buffer_size: 10,
        use_vae: true,
        share_embeddings: true,
        num_layers: 4,
        qkv_dim: 512,
        emb_dim: 512,
        mlp_dim: 2048,
        num_heads: 8,
        dropout_rate: 0.3,
        attention_dropout_rate: 0.1,
        restore_checkpoints: true,
        label_smoothing: 0.0,
        sampling_method: SamplingMethod::TopP,
        use_vertical_info: false,

        optimizer: OptimizerConfig::default(),
        beta_rate: 1.0 / 20_000.0,

        sampling: SamplingConfig::default(),
        backend: BackendConfig::default(),
    }
}

/// Left-to-right transformer baseline on the categorized dataset.
pub fn transformer_categorized() -> ExperimentConfig {
    ExperimentConfig {
        experiment: "transformer".to_string(),
        model_class: "transformer".to_string(),
        autoregressive: true,
        use_vae: false,
        sampling: SamplingConfig {
            conditional: Conditioning::None,
            iterative_nums: vec![1],
            ..SamplingConfig::default()
        },
        ..bert_layout_categorized()
    }
}
