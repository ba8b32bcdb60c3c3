//! Model persistence
//!
//! The trained model is written once, at the end of a run, as a single
//! named-MessagePack file. The record carries the model configuration as
//! JSON next to the weights, so loading needs nothing but the file.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder};
use burn::tensor::backend::Backend;
use tracing::info;

use crate::utils::error::{Cifar10Error, Result};

use super::cnn::{Cifar10Cnn, Cifar10CnnConfig, Cifar10CnnRecord};

/// Environment variable holding the platform output directory
pub const OUTPUTS_DIR_ENV: &str = "VH_OUTPUTS_DIR";

/// Output directory used when `VH_OUTPUTS_DIR` is unset
pub const DEFAULT_OUTPUTS_DIR: &str = "./";

/// Fixed artifact file name
pub const MODEL_FILE_NAME: &str = "my_model.mpk";

type ArtifactRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Architecture and weights of a trained model
#[derive(Record)]
pub struct TrainedModelRecord<B: Backend> {
    /// `Cifar10CnnConfig` serialized as JSON
    pub config: String,
    pub model: Cifar10CnnRecord<B>,
}

/// Output directory from the environment
pub fn outputs_dir_from_env() -> PathBuf {
    std::env::var(OUTPUTS_DIR_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUTS_DIR))
}

/// Where the artifact lands inside `outputs_dir`
pub fn artifact_path(outputs_dir: &Path) -> PathBuf {
    outputs_dir.join(MODEL_FILE_NAME)
}

/// Save `model` and its configuration to `path`
pub fn save_model<B: Backend>(
    model: &Cifar10Cnn<B>,
    config: &Cifar10CnnConfig,
    path: &Path,
) -> Result<()> {
    let config_json = serde_json::to_string(config)
        .map_err(|e| Cifar10Error::Model(format!("failed to serialize config: {}", e)))?;

    let record = TrainedModelRecord {
        config: config_json,
        model: model.clone().into_record(),
    };

    info!("Saving model to {}", path.display());
    <ArtifactRecorder as Recorder<B>>::record(&ArtifactRecorder::new(), record, path.to_path_buf())
        .map_err(|e| Cifar10Error::Model(format!("failed to save {}: {:?}", path.display(), e)))?;

    Ok(())
}

/// Load a model saved by [`save_model`]
pub fn load_model<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(Cifar10Cnn<B>, Cifar10CnnConfig)> {
    let record: TrainedModelRecord<B> = <ArtifactRecorder as Recorder<B>>::load(
        &ArtifactRecorder::new(),
        path.to_path_buf(),
        device,
    )
    .map_err(|e| Cifar10Error::Model(format!("failed to load {}: {:?}", path.display(), e)))?;

    let config: Cifar10CnnConfig = serde_json::from_str(&record.config)
        .map_err(|e| Cifar10Error::Model(format!("invalid config in {}: {}", path.display(), e)))?;

    let model = config.init::<B>(device).load_record(record.model);
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tensor};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_artifact_path() {
        assert_eq!(
            artifact_path(Path::new("/valohai/outputs")),
            PathBuf::from("/valohai/outputs/my_model.mpk")
        );
    }

    #[test]
    fn test_round_trip_reproduces_predictions() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let config = Cifar10CnnConfig::new().with_num_classes(7);
        let model = config.init::<TestBackend>(&device);

        let path = artifact_path(tmp.path());
        save_model(&model, &config, &path).unwrap();
        assert!(path.is_file());

        let (loaded, loaded_config) = load_model::<TestBackend>(&path, &device).unwrap();
        assert_eq!(loaded_config.num_classes, 7);

        let input =
            Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Uniform(0.0, 1.0), &device);
        let expected: Vec<f32> = model
            .forward_softmax(input.clone())
            .into_data()
            .to_vec()
            .unwrap();
        let actual: Vec<f32> = loaded.forward_softmax(input).into_data().to_vec().unwrap();

        assert_eq!(expected, actual);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let result = load_model::<TestBackend>(&tmp.path().join("absent.mpk"), &device);
        assert!(matches!(result, Err(Cifar10Error::Model(_))));
    }
}
