//! Dataset module for CIFAR-10 data handling
//!
//! This module provides functionality for:
//! - Staging platform-provided input files into the dataset cache
//! - Loading the binary CIFAR-10 batches (extracting or downloading when absent)
//! - Burn `Dataset` / batcher integration
//! - On-the-fly data augmentation for training
//!
//! ## Cache Layout
//!
//! ```text
//! ~/.keras/datasets/
//! ├── cifar-10-binary.tar.gz        (optional, extracted on demand)
//! └── cifar-10-batches-bin/
//!     ├── data_batch_1.bin ... data_batch_5.bin
//!     └── test_batch.bin
//! ```

pub mod augmentation;
pub mod burn_dataset;
pub mod cifar10;
pub mod staging;

pub use augmentation::{AugmentationConfig, AugmentedBatches, Augmenter};
pub use burn_dataset::{to_categorical, Cifar10Batch, Cifar10Batcher, Cifar10Item};
pub use cifar10::{class_name, load_data, Cifar10Dataset, Cifar10Image, DatasetSplit};
pub use staging::{stage_inputs, StagingConfig, StagingMode};

/// Fixed name of the dataset folder, under both the input mount and the cache root
pub const DATASET_FOLDER_NAME: &str = "cifar-10-batches-bin";

/// File name of the CIFAR-10 binary archive
pub const ARCHIVE_FILE_NAME: &str = "cifar-10-binary.tar.gz";

/// Number of classes in CIFAR-10
pub const NUM_CLASSES: usize = 10;
