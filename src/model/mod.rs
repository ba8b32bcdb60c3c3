//! Model module: the CIFAR-10 CNN and its persistence
//!
//! - `cnn`: fixed convolutional architecture built with Burn
//! - `artifact`: single-file save/load of configuration plus weights

pub mod artifact;
pub mod cnn;

pub use artifact::{artifact_path, load_model, save_model};
pub use cnn::{Cifar10Cnn, Cifar10CnnConfig};
