//! Training module
//!
//! This module provides:
//! - `TrainingConfig`: run configuration (batch size, epochs, augmentation, optimizer)
//! - `FitPlan`: the fit mode chosen for a run
//! - `Fit`: the fit entry point, implemented by the Burn loop in `supervised`
//!
//! ## Fit Modes
//!
//! 1. **In-memory**: every epoch is one shuffled pass over the training set
//! 2. **Generator**: every epoch draws `steps_per_epoch` augmented batches
//!    from an endless generator over the training set
//!
//! Both validate against the held-out test split after each epoch.

pub mod supervised;

use serde::{Deserialize, Serialize};
use tracing::info;

use burn::config::Config;

use crate::dataset::{AugmentationConfig, Cifar10Dataset};
use crate::model::Cifar10CnnConfig;

pub use supervised::{run_training, BurnFitter};

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 200;

/// Default RMSprop learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 1e-3;

/// Training configuration
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Model architecture
    pub model: Cifar10CnnConfig,

    #[config(default = 32)]
    pub batch_size: usize,

    #[config(default = 200)]
    pub epochs: usize,

    /// Train on augmented batches drawn from a generator
    #[config(default = false)]
    pub data_augmentation: bool,

    /// Generator steps per epoch; the training-set size when unset
    #[config(default = "None")]
    pub steps_per_epoch: Option<usize>,

    /// RMSprop learning rate
    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// RMSprop moving-average decay
    #[config(default = 0.9)]
    pub rho: f32,

    /// RMSprop numerical stability term
    #[config(default = 1e-7)]
    pub epsilon: f32,

    /// Seed for shuffling and augmentation
    #[config(default = 42)]
    pub seed: u64,
}

/// How a run fits the model
#[derive(Debug, Clone, PartialEq)]
pub enum FitPlan {
    /// Full passes over the in-memory training set
    InMemory {
        batch_size: usize,
        epochs: usize,
        shuffle: bool,
    },
    /// Augmented batches from an endless generator
    Generator {
        batch_size: usize,
        epochs: usize,
        steps_per_epoch: usize,
        augmentation: AugmentationConfig,
    },
}

impl FitPlan {
    pub fn batch_size(&self) -> usize {
        match self {
            FitPlan::InMemory { batch_size, .. } | FitPlan::Generator { batch_size, .. } => {
                *batch_size
            }
        }
    }

    pub fn epochs(&self) -> usize {
        match self {
            FitPlan::InMemory { epochs, .. } | FitPlan::Generator { epochs, .. } => *epochs,
        }
    }
}

/// Choose the fit mode for `config` over a training set of `train_len` images
pub fn plan_fit(config: &TrainingConfig, train_len: usize) -> FitPlan {
    if config.data_augmentation {
        FitPlan::Generator {
            batch_size: config.batch_size,
            epochs: config.epochs,
            // One step per training sample unless overridden.
            steps_per_epoch: config.steps_per_epoch.unwrap_or(train_len),
            augmentation: AugmentationConfig::cifar10(),
        }
    } else {
        FitPlan::InMemory {
            batch_size: config.batch_size,
            epochs: config.epochs,
            shuffle: true,
        }
    }
}

/// Metrics of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Zero-based epoch index
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Per-epoch metrics of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn best_val_accuracy(&self) -> f64 {
        self.epochs
            .iter()
            .map(|m| m.val_accuracy)
            .fold(0.0, f64::max)
    }
}

/// A fit loop: trains on `train`, validating on `validation`, per `plan`
pub trait Fit {
    fn fit(
        &mut self,
        train: &Cifar10Dataset,
        validation: &Cifar10Dataset,
        plan: &FitPlan,
    ) -> anyhow::Result<TrainingHistory>;
}

/// Plan the run and hand it to `fitter`, validating on the held-out split
pub fn train_run<F: Fit>(
    fitter: &mut F,
    config: &TrainingConfig,
    train: &Cifar10Dataset,
    test: &Cifar10Dataset,
) -> anyhow::Result<TrainingHistory> {
    info!("{} train samples", train.len());
    info!("{} test samples", test.len());

    let plan = plan_fit(config, train.len());
    match &plan {
        FitPlan::InMemory { .. } => info!("Not using data augmentation."),
        FitPlan::Generator {
            steps_per_epoch, ..
        } => info!(
            "Using real-time data augmentation ({} steps per epoch).",
            steps_per_epoch
        ),
    }

    fitter.fit(train, test, &plan)
}
