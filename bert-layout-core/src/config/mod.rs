//! Experiment configuration for BERT-layout runs.
//!
//! An [`ExperimentConfig`] carries every hyperparameter of one experiment:
//! dataset identity, layout semantics, training schedule, model architecture,
//! optimizer, sampling, and backend worker settings. Values come from a
//! family factory (see [`families`]) and may be layered with a file,
//! environment variables, and `key=value` overrides (see [`loader`]).
//!
//! Enum-valued fields are closed: deserializing an unknown variant fails.
//! Numeric constraints are checked by [`ExperimentConfig::validate`].

pub mod families;
pub mod loader;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use families::{ConfigFactory, family, family_names};
pub use loader::{ConfigSource, load_config, parse_override};

/// Top-level hyperparameter configuration for one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    // Exp info
    pub dataset_path: String,
    pub dataset: Dataset,
    pub vocab_size: u32,
    pub experiment: String,
    /// Selects the trainer; resolved by the dispatcher's registry.
    pub model_class: String,
    pub image_size: u32,
    pub composition: Composition,
    pub sort_by: SortBy,

    // Training info
    pub seed: u64,
    pub layout_dim: u32,
    pub log_every_steps: u64,
    pub eval_num_steps: u64,
    pub max_length: u32,
    pub batch_size: u32,
    pub train_shuffle: bool,
    pub eval_pad_last_batch: bool,
    pub eval_batch_size: u32,
    pub num_train_steps: u64,
    pub checkpoint_every_steps: u64,
    pub eval_every_steps: u64,
    pub num_eval_steps: u64,
    /// Number of checkpoints kept in the manifest.
    pub max_checkpoints: usize,

    // Model info
    pub dtype: Dtype,
    pub autoregressive: bool,
    pub shuffle_buffer_size: u64,
    pub use_vae: bool,
    pub share_embeddings: bool,
    pub num_layers: u32,
    pub qkv_dim: u32,
    pub emb_dim: u32,
    pub mlp_dim: u32,
    pub num_heads: u32,
    pub dropout_rate: f64,
    pub attention_dropout_rate: f64,
    pub restore_checkpoints: bool,
    pub label_smoothing: f64,
    pub sampling_method: SamplingMethod,
    pub use_vertical_info: bool,

    // Optimizer info
    pub optimizer: OptimizerConfig,
    /// KL-weight annealing rate for the VAE objective.
    pub beta_rate: f64,

    pub sampling: SamplingConfig,
    pub backend: BackendConfig,
}

/// Optimizer sub-configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    #[serde(rename = "type")]
    pub kind: OptimizerType,
    pub warmup_steps: u64,
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerType::Adam,
            warmup_steps: 4000,
            lr: 5e-3,
            beta1: 0.9,
            beta2: 0.98,
            weight_decay: 0.01,
        }
    }
}

/// Interactive sampling settings used by the `test` mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Conditioning applied when sampling against a dataset example.
    pub conditional: Conditioning,
    /// Iterative refinement schedule: step count of each round.
    pub iterative_nums: Vec<u32>,
    pub border_size: u32,
    pub thickness: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            conditional: Conditioning::AttributeSize,
            iterative_nums: vec![22, 22, 22],
            border_size: 1,
            thickness: 6,
        }
    }
}

/// Backend worker process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Executable speaking the NDJSON worker protocol.
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: "bert-layout-worker".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            request_timeout_secs: 600,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        families::bert_layout_categorized()
    }
}

/// Declares a closed string enum with serde names, `Display`, and the list
/// of legal values used in error messages.
macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every legal serialized value, in declaration order.
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_enum! {
    /// Layout dataset identifiers.
    Dataset {
        Categorized => "CATEGORIZED",
        Rico => "RICO",
        PubLayNet => "PUBLAYNET",
        Magazine => "MAGAZINE",
    }
}

closed_enum! {
    /// Box encoding convention.
    Composition {
        Default => "default",
        Ltwh => "ltwh",
        Ltrb => "ltrb",
    }
}

closed_enum! {
    /// Canonical element ordering within a layout.
    SortBy {
        TopLeftToBottomRight => "top_left_to_bottom_right",
        DistanceFromCenter => "distance_from_center",
    }
}

closed_enum! {
    /// Token sampling strategy.
    SamplingMethod {
        Greedy => "greedy",
        TopK => "top-k",
        TopP => "top-p",
    }
}

closed_enum! {
    OptimizerType {
        Adam => "adam",
        AdamW => "adamw",
        Sgd => "sgd",
    }
}

closed_enum! {
    /// Parameter dtype of the model.
    Dtype {
        Float32 => "float32",
        BFloat16 => "bfloat16",
        Float16 => "float16",
    }
}

closed_enum! {
    /// Which attributes are fixed when sampling conditionally.
    ///
    /// `a` fixes categories, `a+s` fixes categories and sizes.
    Conditioning {
        None => "none",
        Attribute => "a",
        AttributeSize => "a+s",
    }
}

impl ExperimentConfig {
    /// Check every numeric constraint, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&str, u64); 16] = [
            ("vocab_size", self.vocab_size.into()),
            ("image_size", self.image_size.into()),
            ("layout_dim", self.layout_dim.into()),
            ("max_length", self.max_length.into()),
            ("batch_size", self.batch_size.into()),
            ("eval_batch_size", self.eval_batch_size.into()),
            ("log_every_steps", self.log_every_steps),
            ("eval_every_steps", self.eval_every_steps),
            ("checkpoint_every_steps", self.checkpoint_every_steps),
            ("max_checkpoints", self.max_checkpoints as u64),
            ("num_layers", self.num_layers.into()),
            ("qkv_dim", self.qkv_dim.into()),
            ("emb_dim", self.emb_dim.into()),
            ("mlp_dim", self.mlp_dim.into()),
            ("num_heads", self.num_heads.into()),
            ("backend.request_timeout_secs", self.backend.request_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(out_of_range(field, value, "must be at least 1"));
            }
        }

        if self.qkv_dim % self.num_heads != 0 {
            return Err(out_of_range(
                "qkv_dim",
                self.qkv_dim,
                &format!("must be divisible by num_heads ({})", self.num_heads),
            ));
        }

        let probabilities = [
            ("dropout_rate", self.dropout_rate),
            ("attention_dropout_rate", self.attention_dropout_rate),
            ("label_smoothing", self.label_smoothing),
            ("optimizer.beta1", self.optimizer.beta1),
            ("optimizer.beta2", self.optimizer.beta2),
        ];
        for (field, value) in probabilities {
            if !(0.0..1.0).contains(&value) {
                return Err(out_of_range(field, value, "must be in [0, 1)"));
            }
        }

        let non_negative = [
            ("optimizer.lr", self.optimizer.lr),
            ("optimizer.weight_decay", self.optimizer.weight_decay),
            ("beta_rate", self.beta_rate),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(out_of_range(field, value, "must be finite and non-negative"));
            }
        }

        if self.sampling.iterative_nums.is_empty() {
            return Err(out_of_range(
                "sampling.iterative_nums",
                "[]",
                "must contain at least one round",
            ));
        }
        if let Some(pos) = self.sampling.iterative_nums.iter().position(|&n| n == 0) {
            return Err(out_of_range(
                &format!("sampling.iterative_nums[{pos}]"),
                0,
                "must be at least 1",
            ));
        }
        if crate::types::total_steps(&self.sampling.iterative_nums).is_none() {
            return Err(out_of_range(
                "sampling.iterative_nums",
                format!("{:?}", self.sampling.iterative_nums),
                &format!("total steps must not exceed {}", u32::MAX),
            ));
        }
        if self.sampling.thickness == 0 {
            return Err(out_of_range("sampling.thickness", 0, "must be at least 1"));
        }
        if self.backend.command.trim().is_empty() {
            return Err(out_of_range("backend.command", "\"\"", "must not be empty"));
        }

        Ok(())
    }
}

fn out_of_range(field: &str, value: impl fmt::Display, constraint: &str) -> ConfigError {
    ConfigError::OutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        constraint: constraint.to_string(),
    }
}
