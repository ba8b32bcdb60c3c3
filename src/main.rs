//! CIFAR-10 CNN training CLI
//!
//! Stages platform-provided dataset files into the loader cache, trains the
//! classifier and writes the model to the platform output directory.

use std::time::Instant;

use anyhow::Result;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use colored::Colorize;
use tracing::info;

use cifar10_cnn::backend::{backend_name, default_device, TrainingBackend};
use cifar10_cnn::dataset::{stage_inputs, StagingConfig, StagingMode, NUM_CLASSES};
use cifar10_cnn::model::artifact::outputs_dir_from_env;
use cifar10_cnn::model::Cifar10CnnConfig;
use cifar10_cnn::training::{
    run_training, TrainingConfig, DEFAULT_BATCH_SIZE, DEFAULT_EPOCHS, DEFAULT_LEARNING_RATE,
};
use cifar10_cnn::utils::format_duration;
use cifar10_cnn::utils::logging::{init_logging, LogConfig};

/// Train a convolutional CIFAR-10 classifier with Burn
///
/// Input files under `$VH_INPUTS_DIR/cifar-10-batches-bin` are staged into
/// the dataset cache first; the model is saved to `$VH_OUTPUTS_DIR/my_model.mpk`.
///
/// The input folder holds the binary distribution (`data_batch_N.bin`,
/// `test_batch.bin` or `cifar-10-binary.tar.gz`). Jobs that mounted the
/// pickled `cifar-10-batches-py` folder must mount `cifar-10-batches-bin`
/// instead; a `cifar-10-batches-py` mount is not staged.
#[derive(Parser, Debug)]
#[command(name = "cifar10_cnn")]
#[command(version)]
struct Cli {
    /// Batch size for training
    #[arg(long = "batch_size", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Number of output classes
    #[arg(long = "num_classes", default_value_t = NUM_CLASSES)]
    num_classes: usize,

    /// Number of training epochs
    #[arg(long, default_value_t = DEFAULT_EPOCHS)]
    epochs: usize,

    /// Enable real-time data augmentation (bare flag means true)
    #[arg(
        long = "data_augmentation",
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    data_augmentation: bool,

    /// Generator steps per epoch (defaults to the training-set size)
    #[arg(long = "steps_per_epoch")]
    steps_per_epoch: Option<usize>,

    /// RMSprop learning rate
    #[arg(long = "learning_rate", default_value_t = DEFAULT_LEARNING_RATE)]
    learning_rate: f64,

    /// Random seed for shuffling and augmentation
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// How input files are staged into the dataset cache
    #[arg(long, value_enum, default_value_t = StagingMode::CopyAll)]
    staging: StagingMode,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

impl Cli {
    fn training_config(&self) -> TrainingConfig {
        TrainingConfig::new(Cifar10CnnConfig::new().with_num_classes(self.num_classes))
            .with_batch_size(self.batch_size)
            .with_epochs(self.epochs)
            .with_data_augmentation(self.data_augmentation)
            .with_steps_per_epoch(self.steps_per_epoch)
            .with_learning_rate(self.learning_rate)
            .with_seed(self.seed)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    println!("{}", "Staging Inputs...".cyan().bold());
    let staging = StagingConfig::from_env()?;
    let report = stage_inputs(&staging, cli.staging)?;
    info!(
        "Staged {} file(s) into {} ({:?})",
        report.staged.len(),
        staging.cache_entry().display(),
        report.mode
    );

    let config = cli.training_config();
    let outputs_dir = outputs_dir_from_env();

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Backend:           {}", backend_name());
    println!("  Batch size:        {}", config.batch_size);
    println!("  Classes:           {}", config.model.num_classes);
    println!("  Epochs:            {}", config.epochs);
    println!("  Data augmentation: {}", config.data_augmentation);
    println!("  Learning rate:     {}", config.learning_rate);
    println!("  Output dir:        {}", outputs_dir.display());
    println!();

    let started = Instant::now();
    let outcome = run_training::<TrainingBackend>(
        &config,
        &staging.cache_root,
        &outputs_dir,
        default_device(),
    )?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Model saved to:          {}", outcome.model_path.display());
    println!(
        "  Best validation accuracy: {:.2}%",
        outcome.history.best_val_accuracy() * 100.0
    );
    println!(
        "  Total time:              {}",
        format_duration(started.elapsed().as_secs_f64())
    );

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════╗
 ║   CIFAR-10 CNN                                   ║
 ║   Convolutional image classifier, Burn + Rust    ║
 ╚══════════════════════════════════════════════════╝
  "#
        .green()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["cifar10_cnn"]).unwrap();
        assert_eq!(cli.batch_size, 32);
        assert_eq!(cli.num_classes, 10);
        assert_eq!(cli.epochs, 200);
        assert!(!cli.data_augmentation);
        assert_eq!(cli.staging, StagingMode::CopyAll);
    }

    #[test]
    fn test_underscored_flags() {
        let cli = Cli::try_parse_from([
            "cifar10_cnn",
            "--batch_size",
            "64",
            "--num_classes",
            "5",
            "--epochs",
            "3",
        ])
        .unwrap();

        let config = cli.training_config();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.model.num_classes, 5);
        assert_eq!(config.epochs, 3);
    }

    #[test]
    fn test_bare_augmentation_flag_means_true() {
        let cli = Cli::try_parse_from(["cifar10_cnn", "--data_augmentation"]).unwrap();
        assert!(cli.data_augmentation);

        let cli = Cli::try_parse_from(["cifar10_cnn", "--data_augmentation", "false"]).unwrap();
        assert!(!cli.data_augmentation);
    }

    #[test]
    fn test_long_help_names_the_input_folder() {
        use clap::CommandFactory;

        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("cifar-10-batches-bin"));
        assert!(help.contains("cifar-10-batches-py"));
    }

    #[test]
    fn test_staging_mode_flag() {
        let cli = Cli::try_parse_from(["cifar10_cnn", "--staging", "move-single"]).unwrap();
        assert_eq!(cli.staging, StagingMode::MoveSingle);
    }
}
