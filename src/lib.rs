//! # CIFAR-10 CNN
//!
//! Trains a convolutional CIFAR-10 classifier with the Burn framework on a
//! managed training platform.
//!
//! ## Modules
//!
//! - `dataset`: input staging, the binary CIFAR-10 loader, Burn batching and augmentation
//! - `model`: the CNN and single-file persistence
//! - `training`: fit planning and the training loop
//! - `utils`: logging and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cifar10_cnn::backend::{default_device, TrainingBackend};
//! use cifar10_cnn::dataset::{stage_inputs, StagingConfig, StagingMode};
//! use cifar10_cnn::model::Cifar10CnnConfig;
//! use cifar10_cnn::training::{run_training, TrainingConfig};
//!
//! let staging = StagingConfig::from_env()?;
//! stage_inputs(&staging, StagingMode::CopyAll)?;
//!
//! let config = TrainingConfig::new(Cifar10CnnConfig::new()).with_epochs(10);
//! run_training::<TrainingBackend>(&config, &staging.cache_root, "./".as_ref(), default_device())?;
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{Cifar10Dataset, StagingConfig, StagingMode};
pub use model::{Cifar10Cnn, Cifar10CnnConfig};
pub use training::{FitPlan, TrainingConfig, TrainingHistory};
pub use utils::error::{Cifar10Error, Result};
