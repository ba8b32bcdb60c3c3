//! Data Augmentation Module
//!
//! On-the-fly image transformations applied per training batch, configured
//! like an image data generator. Only geometric transforms that keep the
//! 32x32 frame are supported: integer shifts with nearest-edge fill and
//! flips. Per-sample standardization is available; dataset-wide statistics
//! (featurewise normalization, ZCA) and rotation are rejected.
//!
//! # Augmentation Strategy
//!
//! - **Training**: shifts up to 10% of width/height plus a random horizontal flip
//! - **Validation**: no augmentation (clean evaluation on the held-out split)

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{Cifar10Error, Result};

use super::burn_dataset::Cifar10Item;
use super::cifar10::{Cifar10Dataset, CHANNELS, IMAGE_SIDE};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Set input mean to 0 over the dataset
    pub featurewise_center: bool,
    /// Set each sample mean to 0
    pub samplewise_center: bool,
    /// Divide inputs by the std of the dataset
    pub featurewise_std_normalization: bool,
    /// Divide each input by its std
    pub samplewise_std_normalization: bool,
    /// Apply ZCA whitening
    pub zca_whitening: bool,
    /// Random rotation range in degrees
    pub rotation_range: f32,
    /// Random horizontal shift, as a fraction of total width
    pub width_shift_range: f32,
    /// Random vertical shift, as a fraction of total height
    pub height_shift_range: f32,
    /// Randomly flip images left-right
    pub horizontal_flip: bool,
    /// Randomly flip images upside-down
    pub vertical_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl AugmentationConfig {
    /// Identity pipeline
    pub fn none() -> Self {
        Self {
            featurewise_center: false,
            samplewise_center: false,
            featurewise_std_normalization: false,
            samplewise_std_normalization: false,
            zca_whitening: false,
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            horizontal_flip: false,
            vertical_flip: false,
        }
    }

    /// The CIFAR-10 training preset
    pub fn cifar10() -> Self {
        Self {
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            horizontal_flip: true,
            ..Self::none()
        }
    }

    /// Reject settings the augmenter cannot apply
    pub fn validate(&self) -> Result<()> {
        if self.featurewise_center || self.featurewise_std_normalization || self.zca_whitening {
            return Err(Cifar10Error::Config(
                "featurewise normalization and ZCA whitening are not supported".to_string(),
            ));
        }

        if self.rotation_range != 0.0 {
            return Err(Cifar10Error::Config(
                "rotation_range must be 0".to_string(),
            ));
        }

        for (name, range) in [
            ("width_shift_range", self.width_shift_range),
            ("height_shift_range", self.height_shift_range),
        ] {
            if !(0.0..1.0).contains(&range) {
                return Err(Cifar10Error::Config(format!(
                    "{} must be in [0.0, 1.0), got {}",
                    name, range
                )));
            }
        }

        Ok(())
    }
}

/// Applies random transformations to CHW images
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    rng: ChaCha8Rng,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Augment one normalized 3x32x32 image
    pub fn augment(&mut self, image: &[f32]) -> Vec<f32> {
        let (h, w) = (IMAGE_SIDE, IMAGE_SIDE);
        let mut out = image.to_vec();

        let dy = random_shift(&mut self.rng, self.config.height_shift_range, h);
        let dx = random_shift(&mut self.rng, self.config.width_shift_range, w);
        if dy != 0 || dx != 0 {
            out = shift_image(&out, CHANNELS, h, w, dy, dx);
        }

        if self.config.horizontal_flip && self.rng.gen_bool(0.5) {
            flip_horizontal(&mut out, CHANNELS, h, w);
        }
        if self.config.vertical_flip && self.rng.gen_bool(0.5) {
            flip_vertical(&mut out, CHANNELS, h, w);
        }

        if self.config.samplewise_center || self.config.samplewise_std_normalization {
            standardize(
                &mut out,
                self.config.samplewise_center,
                self.config.samplewise_std_normalization,
            );
        }

        out
    }
}

fn random_shift(rng: &mut ChaCha8Rng, range: f32, size: usize) -> isize {
    if range <= 0.0 {
        return 0;
    }
    let fraction: f32 = rng.gen_range(-range..=range);
    (fraction * size as f32).round() as isize
}

/// Translate every channel by (`dy`, `dx`) pixels, filling from the nearest edge
pub fn shift_image(
    image: &[f32],
    channels: usize,
    h: usize,
    w: usize,
    dy: isize,
    dx: isize,
) -> Vec<f32> {
    let clamp = |v: isize, max: usize| v.clamp(0, max as isize - 1) as usize;
    let mut out = vec![0.0f32; image.len()];

    for c in 0..channels {
        let plane = c * h * w;
        for y in 0..h {
            let sy = clamp(y as isize - dy, h);
            for x in 0..w {
                let sx = clamp(x as isize - dx, w);
                out[plane + y * w + x] = image[plane + sy * w + sx];
            }
        }
    }

    out
}

/// Mirror every channel left-right in place
pub fn flip_horizontal(image: &mut [f32], channels: usize, h: usize, w: usize) {
    for row in image[..channels * h * w].chunks_exact_mut(w) {
        row.reverse();
    }
}

/// Mirror every channel upside-down in place
pub fn flip_vertical(image: &mut [f32], channels: usize, h: usize, w: usize) {
    for plane in image[..channels * h * w].chunks_exact_mut(h * w) {
        for y in 0..h / 2 {
            let (top, bottom) = plane.split_at_mut((h - 1 - y) * w);
            top[y * w..(y + 1) * w].swap_with_slice(&mut bottom[..w]);
        }
    }
}

fn standardize(image: &mut [f32], center: bool, scale: bool) {
    let n = image.len() as f32;
    let mean = image.iter().sum::<f32>() / n;
    if center {
        image.iter_mut().for_each(|v| *v -= mean);
    }
    if scale {
        let offset = if center { 0.0 } else { mean };
        let var = image.iter().map(|v| (v - offset).powi(2)).sum::<f32>() / n;
        let std = var.sqrt() + 1e-6;
        image.iter_mut().for_each(|v| *v /= std);
    }
}

/// Endless generator of augmented training batches
///
/// Each pass over the dataset visits every image once in a fresh random
/// order; the final batch of a pass may be shorter than `batch_size`.
pub struct AugmentedBatches<'a> {
    dataset: &'a Cifar10Dataset,
    augmenter: Augmenter,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: ChaCha8Rng,
}

impl<'a> AugmentedBatches<'a> {
    pub fn new(
        dataset: &'a Cifar10Dataset,
        augmenter: Augmenter,
        batch_size: usize,
        seed: u64,
    ) -> Self {
        let mut batches = Self {
            dataset,
            augmenter,
            batch_size: batch_size.max(1),
            order: (0..dataset.len()).collect(),
            cursor: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        batches.order.shuffle(&mut batches.rng);
        batches
    }
}

impl Iterator for AugmentedBatches<'_> {
    type Item = Vec<Cifar10Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.order.is_empty() {
            return None;
        }

        if self.cursor >= self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end]
            .iter()
            .map(|&i| {
                let img = &self.dataset.images[i];
                Cifar10Item {
                    image: self.augmenter.augment(&img.normalized()),
                    label: img.label as usize,
                }
            })
            .collect();
        self.cursor = end;

        Some(batch)
    }
}
