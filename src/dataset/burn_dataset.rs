//! Burn Dataset Integration for CIFAR-10
//!
//! Implements Burn's `Dataset` trait over the in-memory splits and a batcher
//! that produces unit-interval image tensors with one-hot targets.

use burn::data::dataset::Dataset;
use burn::prelude::*;
use burn::tensor::TensorData;

use crate::utils::error::{Cifar10Error, Result};

use super::cifar10::{Cifar10Dataset, CHANNELS, IMAGE_BYTES, IMAGE_SIDE};

/// A single CIFAR-10 item ready for Burn
#[derive(Clone, Debug, PartialEq)]
pub struct Cifar10Item {
    /// Image data as flattened CHW float array [3 * 32 * 32], in [0, 1]
    pub image: Vec<f32>,
    /// Class label
    pub label: usize,
}

impl Dataset<Cifar10Item> for Cifar10Dataset {
    fn get(&self, index: usize) -> Option<Cifar10Item> {
        self.images.get(index).map(|img| Cifar10Item {
            image: img.normalized(),
            label: img.label as usize,
        })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// One-hot encode `labels` into a row-major `[labels.len(), num_classes]` matrix
///
/// Fails on a label outside `0..num_classes`.
pub fn to_categorical(labels: &[usize], num_classes: usize) -> Result<Vec<f32>> {
    let mut one_hot = vec![0.0f32; labels.len() * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(Cifar10Error::Dataset(format!(
                "label {} at row {} is out of range for {} classes",
                label, row, num_classes
            )));
        }
        one_hot[row * num_classes + label] = 1.0;
    }
    Ok(one_hot)
}

/// A batch of CIFAR-10 images for training
#[derive(Clone, Debug)]
pub struct Cifar10Batch<B: Backend> {
    /// Images with shape [batch_size, 3, 32, 32]
    pub images: Tensor<B, 4>,
    /// One-hot targets with shape [batch_size, num_classes]
    pub targets: Tensor<B, 2>,
}

/// Batcher for creating CIFAR-10 batches on a device
#[derive(Clone, Debug)]
pub struct Cifar10Batcher<B: Backend> {
    device: B::Device,
    num_classes: usize,
}

impl<B: Backend> Cifar10Batcher<B> {
    pub fn new(device: B::Device, num_classes: usize) -> Self {
        Self {
            device,
            num_classes,
        }
    }

    pub fn batch(&self, items: Vec<Cifar10Item>) -> Result<Cifar10Batch<B>> {
        let batch_size = items.len();

        let mut pixels = Vec::with_capacity(batch_size * IMAGE_BYTES);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend_from_slice(&item.image);
            labels.push(item.label);
        }

        let one_hot = to_categorical(&labels, self.num_classes)?;

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, CHANNELS, IMAGE_SIDE, IMAGE_SIDE]),
            &self.device,
        );

        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(one_hot, [batch_size, self.num_classes]),
            &self.device,
        );

        Ok(Cifar10Batch { images, targets })
    }

    /// Batch a contiguous range of a dataset
    pub fn batch_range(
        &self,
        dataset: &Cifar10Dataset,
        start: usize,
        end: usize,
    ) -> Result<Cifar10Batch<B>> {
        let items = (start..end).filter_map(|i| dataset.get(i)).collect();
        self.batch(items)
    }
}
