use std::{num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainErr};

/// The optimizer families the driver knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
    /// Adam driven by a one-cycle learning-rate/momentum policy.
    OneCycle,
}

impl OptimizerKind {
    /// Maps a configuration name onto a kind.
    ///
    /// # Errors
    /// `TrainErr::UnsupportedConfiguration` for any unknown name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            "adam_onecycle" => Ok(Self::OneCycle),
            other => Err(TrainErr::UnsupportedConfiguration(other.to_string())),
        }
    }
}

/// The optimisation block of a training configuration.
///
/// Field names on disk follow the upper-case keys used by existing
/// experiment configs (`LR`, `LR_decay`, `MOMS`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub name: String,
    #[serde(rename = "LR")]
    pub learning_rate: f32,
    #[serde(default)]
    pub weight_decay: f32,
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    #[serde(default)]
    pub decay_step_list: Vec<f64>,
    #[serde(rename = "LR_decay", default = "default_lr_decay")]
    pub lr_decay: f64,
    #[serde(rename = "LR_clip", default = "default_lr_clip")]
    pub lr_clip: f64,
    #[serde(rename = "LR_warmup", default)]
    pub warmup_enabled: bool,
    #[serde(rename = "WARMUP_EPOCH", default = "default_warmup_epochs")]
    pub warmup_epochs: usize,
    #[serde(rename = "div_factors", default = "default_div_factor")]
    pub div_factor: f64,
    #[serde(rename = "MOMS", default = "default_moms")]
    pub moms: (f64, f64),
    #[serde(default = "default_pct_start")]
    pub pct_start: f64,
    #[serde(rename = "GRAD_NORM_CLIP", default = "default_grad_norm_clip")]
    pub grad_norm_clip: f32,
}

fn default_momentum() -> f32 {
    0.9
}

fn default_lr_decay() -> f64 {
    0.1
}

fn default_lr_clip() -> f64 {
    1e-7
}

fn default_warmup_epochs() -> usize {
    1
}

fn default_div_factor() -> f64 {
    10.
}

fn default_moms() -> (f64, f64) {
    (0.95, 0.85)
}

fn default_pct_start() -> f64 {
    0.4
}

fn default_grad_norm_clip() -> f32 {
    10.
}

impl OptimizerConfig {
    /// Creates a config for `name` with every other knob at its default.
    pub fn new(name: impl Into<String>, learning_rate: f32) -> Self {
        Self {
            name: name.into(),
            learning_rate,
            weight_decay: 0.,
            momentum: default_momentum(),
            decay_step_list: Vec::new(),
            lr_decay: default_lr_decay(),
            lr_clip: default_lr_clip(),
            warmup_enabled: false,
            warmup_epochs: default_warmup_epochs(),
            div_factor: default_div_factor(),
            moms: default_moms(),
            pct_start: default_pct_start(),
            grad_norm_clip: default_grad_norm_clip(),
        }
    }

    /// Resolves the configured optimizer name.
    ///
    /// # Errors
    /// `TrainErr::UnsupportedConfiguration` when the name is unknown.
    pub fn kind(&self) -> Result<OptimizerKind> {
        OptimizerKind::from_name(&self.name)
    }

    /// Checks value ranges before any training state is allocated.
    pub fn validate(&self) -> Result<()> {
        self.kind()?;

        if !(self.learning_rate > 0.) {
            return Err(invalid(format!("LR must be > 0, got {}", self.learning_rate)));
        }
        if self.weight_decay < 0. {
            return Err(invalid(format!(
                "weight_decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        if let Some(f) = self
            .decay_step_list
            .iter()
            .find(|f| !(0.0..=1.0).contains(*f))
        {
            return Err(invalid(format!("decay_step_list entry {f} is not in [0, 1]")));
        }
        if !(self.lr_decay > 0. && self.lr_decay <= 1.) {
            return Err(invalid(format!("LR_decay must be in (0, 1], got {}", self.lr_decay)));
        }
        if self.lr_clip < 0. {
            return Err(invalid(format!("LR_clip must be >= 0, got {}", self.lr_clip)));
        }
        if !(self.div_factor > 0.) {
            return Err(invalid(format!(
                "div_factors must be > 0, got {}",
                self.div_factor
            )));
        }
        if !(self.pct_start > 0. && self.pct_start < 1.) {
            return Err(invalid(format!(
                "pct_start must be in (0, 1), got {}",
                self.pct_start
            )));
        }
        if !(self.grad_norm_clip > 0.) {
            return Err(invalid(format!(
                "GRAD_NORM_CLIP must be > 0, got {}",
                self.grad_norm_clip
            )));
        }

        Ok(())
    }
}

fn invalid(msg: String) -> TrainErr {
    TrainErr::InvalidConfig(msg)
}

/// Run-level configuration: the optimisation block plus loop and
/// checkpoint knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(rename = "OPTIMIZATION")]
    pub optimization: OptimizerConfig,
    pub epochs: usize,
    pub batch_size: NonZeroUsize,
    #[serde(default = "default_ckpt_save_interval")]
    pub ckpt_save_interval: NonZeroUsize,
    #[serde(default = "default_max_ckpt_save_num")]
    pub max_ckpt_save_num: NonZeroUsize,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_ckpt_save_interval() -> NonZeroUsize {
    NonZeroUsize::MIN
}

fn default_max_ckpt_save_num() -> NonZeroUsize {
    NonZeroUsize::new(50).unwrap_or(NonZeroUsize::MIN)
}

impl TrainingConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    /// I/O and parse failures, and any range violation found by `validate`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Parses and validates a configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(invalid("epochs must be greater than 0".into()));
        }
        self.optimization.validate()
    }
}
