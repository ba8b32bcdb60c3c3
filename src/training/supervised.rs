//! Supervised Training Implementation
//!
//! A custom Burn training loop: categorical cross-entropy over one-hot
//! targets, RMSprop, accuracy as the metric, and validation on the
//! held-out split after every epoch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer, RmsPropConfig},
    tensor::{
        activation::log_softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::dataset::{
    class_name, load_data, AugmentedBatches, Augmenter, Cifar10Batch, Cifar10Batcher,
    Cifar10Dataset,
};
use crate::model::{artifact_path, save_model, Cifar10Cnn};
use crate::utils::error::Cifar10Error;
use crate::utils::logging::EpochLogger;

use super::{train_run, EpochMetrics, Fit, FitPlan, TrainingConfig, TrainingHistory};

/// Categorical cross-entropy between logits and one-hot targets, averaged over the batch
pub fn categorical_crossentropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    (log_softmax(logits, 1) * targets)
        .sum_dim(1)
        .mean()
        .neg()
}

/// Number of rows whose predicted class matches the one-hot target
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> usize {
    let n = logits.dims()[0];
    let predicted = logits.argmax(1).reshape([n]);
    let expected = targets.argmax(1).reshape([n]);

    let correct: i64 = predicted.equal(expected).int().sum().into_scalar().elem();
    correct as usize
}

/// Running sample-weighted loss and accuracy
#[derive(Debug, Default)]
struct Accumulator {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl Accumulator {
    fn add(&mut self, batch_loss: f64, correct: usize, samples: usize) {
        self.loss_sum += batch_loss * samples as f64;
        self.correct += correct;
        self.samples += samples;
    }

    fn loss(&self) -> f64 {
        self.loss_sum / self.samples.max(1) as f64
    }

    fn accuracy(&self) -> f64 {
        self.correct as f64 / self.samples.max(1) as f64
    }
}

/// Burn-backed implementation of [`Fit`]
pub struct BurnFitter<B: AutodiffBackend> {
    model: Cifar10Cnn<B>,
    config: TrainingConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> BurnFitter<B> {
    /// Build a freshly initialized model from `config`
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        let model = config.model.init::<B>(&device);
        Self {
            model,
            config,
            device,
        }
    }

    pub fn model(&self) -> &Cifar10Cnn<B> {
        &self.model
    }

    /// One gradient update; returns the updated model, batch loss and correct count
    fn step<O>(
        &self,
        model: Cifar10Cnn<B>,
        optimizer: &mut O,
        batch: Cifar10Batch<B>,
    ) -> (Cifar10Cnn<B>, f64, usize)
    where
        O: Optimizer<Cifar10Cnn<B>, B>,
    {
        let output = model.forward(batch.images);
        let loss = categorical_crossentropy(output.clone(), batch.targets.clone());
        let loss_value: f64 = loss.clone().into_scalar().elem();
        let correct = count_correct(output, batch.targets);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let model = optimizer.step(self.config.learning_rate, model, grads);

        (model, loss_value, correct)
    }
}

impl<B: AutodiffBackend> Fit for BurnFitter<B> {
    fn fit(
        &mut self,
        train: &Cifar10Dataset,
        validation: &Cifar10Dataset,
        plan: &FitPlan,
    ) -> Result<TrainingHistory> {
        if train.is_empty() {
            return Err(Cifar10Error::Training("training set is empty".to_string()).into());
        }

        let num_classes = self.config.model.num_classes;
        check_labels(train, num_classes)?;
        check_labels(validation, num_classes)?;

        let batch_size = plan.batch_size().max(1);
        let batcher = Cifar10Batcher::<B>::new(self.device.clone(), num_classes);
        let inner_device = <B::InnerBackend as Backend>::Device::default();
        let valid_batcher = Cifar10Batcher::<B::InnerBackend>::new(inner_device, num_classes);

        let mut optimizer = RmsPropConfig::new()
            .with_alpha(self.config.rho)
            .with_epsilon(self.config.epsilon)
            .init::<B, Cifar10Cnn<B>>();

        let mut model = self.model.clone();
        let mut history = TrainingHistory::default();
        let mut logger = EpochLogger::new(plan.epochs());
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let mut generator = match plan {
            FitPlan::Generator { augmentation, .. } => {
                let augmenter = Augmenter::new(augmentation.clone(), self.config.seed)?;
                Some(AugmentedBatches::new(
                    train,
                    augmenter,
                    batch_size,
                    self.config.seed,
                ))
            }
            FitPlan::InMemory { .. } => None,
        };

        for epoch in 0..plan.epochs() {
            logger.start_epoch();
            let mut acc = Accumulator::default();

            match (plan, generator.as_mut()) {
                (FitPlan::Generator { steps_per_epoch, .. }, Some(batches)) => {
                    for step in 0..*steps_per_epoch {
                        let items = batches
                            .next()
                            .context("augmented batch generator ran dry")?;
                        let samples = items.len();
                        let (updated, loss, correct) =
                            self.step(model, &mut optimizer, batcher.batch(items)?);
                        model = updated;
                        acc.add(loss, correct, samples);
                        debug!("step {}/{}: loss = {:.4}", step + 1, steps_per_epoch, loss);
                    }
                }
                (FitPlan::InMemory { shuffle, .. }, _) => {
                    let mut indices: Vec<usize> = (0..train.len()).collect();
                    if *shuffle {
                        indices.shuffle(&mut rng);
                    }

                    for chunk in indices.chunks(batch_size) {
                        let items = chunk
                            .iter()
                            .filter_map(|&i| burn::data::dataset::Dataset::get(train, i))
                            .collect::<Vec<_>>();
                        let samples = items.len();
                        let (updated, loss, correct) =
                            self.step(model, &mut optimizer, batcher.batch(items)?);
                        model = updated;
                        acc.add(loss, correct, samples);
                    }
                }
                (FitPlan::Generator { .. }, None) => {
                    anyhow::bail!("augmented batch generator was not initialized")
                }
            }

            let (val_loss, val_accuracy) =
                evaluate(&model.valid(), validation, &valid_batcher, batch_size)?;

            logger.end_epoch(epoch, acc.loss(), acc.accuracy(), val_loss, val_accuracy);
            history.push(EpochMetrics {
                epoch,
                loss: acc.loss(),
                accuracy: acc.accuracy(),
                val_loss,
                val_accuracy,
            });
        }

        logger.finish(history.best_val_accuracy());
        self.model = model;
        Ok(history)
    }
}

/// Fail when any label of `dataset` has no output unit
fn check_labels(dataset: &Cifar10Dataset, num_classes: usize) -> Result<()> {
    if let Some(label) = dataset.labels().into_iter().find(|&l| l >= num_classes) {
        return Err(Cifar10Error::Dataset(format!(
            "{:?} split has label {} but the model has {} classes",
            dataset.split, label, num_classes
        ))
        .into());
    }
    Ok(())
}

/// Loss and accuracy of `model` over `dataset`, without gradients
pub fn evaluate<B: Backend>(
    model: &Cifar10Cnn<B>,
    dataset: &Cifar10Dataset,
    batcher: &Cifar10Batcher<B>,
    batch_size: usize,
) -> Result<(f64, f64)> {
    let mut acc = Accumulator::default();
    let len = dataset.len();

    for start in (0..len).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(len);
        let batch = batcher.batch_range(dataset, start, end)?;
        let output = model.forward(batch.images);

        let loss: f64 = categorical_crossentropy(output.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        let correct = count_correct(output, batch.targets);
        acc.add(loss, correct, end - start);
    }

    Ok((acc.loss(), acc.accuracy()))
}

/// Result of a complete run
#[derive(Debug)]
pub struct TrainingOutcome {
    pub history: TrainingHistory,
    pub model_path: PathBuf,
}

/// Load CIFAR-10, train per `config` and save the model into `outputs_dir`
pub fn run_training<B: AutodiffBackend>(
    config: &TrainingConfig,
    cache_root: &Path,
    outputs_dir: &Path,
    device: B::Device,
) -> Result<TrainingOutcome> {
    let (train, test) = load_data(cache_root).context("failed to load CIFAR-10")?;
    info!("x_train shape: [{}, 3, 32, 32]", train.len());
    for (label, count) in train.class_distribution().iter().enumerate() {
        debug!("  {:<10} {}", class_name(label).unwrap_or("?"), count);
    }

    let mut fitter = BurnFitter::<B>::new(config.clone(), device);
    let history = train_run(&mut fitter, config, &train, &test)?;

    std::fs::create_dir_all(outputs_dir)
        .with_context(|| format!("failed to create {}", outputs_dir.display()))?;
    let model_path = artifact_path(outputs_dir);
    save_model(fitter.model(), &config.model, &model_path)?;

    Ok(TrainingOutcome {
        history,
        model_path,
    })
}
