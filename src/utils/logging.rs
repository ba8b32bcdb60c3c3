//! Logging Module
//!
//! Structured logging on top of the `tracing` crate, plus a small per-epoch
//! logger used by the fit loop.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
        }
    }
}

/// Initialize logging with the given configuration
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Per-epoch training logger, one line per epoch
pub struct EpochLogger {
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl EpochLogger {
    pub fn new(total_epochs: usize) -> Self {
        let now = Instant::now();
        Self {
            total_epochs,
            epoch_start: now,
            training_start: now,
        }
    }

    /// Mark the start of an epoch
    pub fn start_epoch(&mut self) {
        self.epoch_start = Instant::now();
    }

    /// Log the metrics of a finished epoch (`epoch` is zero-based)
    pub fn end_epoch(
        &self,
        epoch: usize,
        loss: f64,
        accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
    ) {
        tracing::info!(
            "Epoch {}/{} - {:.1}s - loss: {:.4} - acc: {:.4} - val_loss: {:.4} - val_acc: {:.4}",
            epoch + 1,
            self.total_epochs,
            self.epoch_start.elapsed().as_secs_f64(),
            loss,
            accuracy,
            val_loss,
            val_accuracy
        );
    }

    /// Log training completion
    pub fn finish(&self, best_val_accuracy: f64) {
        tracing::info!(
            "Training complete: {} epochs in {:.1}s | best val_acc: {:.4}",
            self.total_epochs,
            self.training_start.elapsed().as_secs_f64(),
            best_val_accuracy
        );
    }
}
