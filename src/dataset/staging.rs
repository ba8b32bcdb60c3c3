//! Input Staging
//!
//! Places dataset files injected by the training platform into the cache
//! entry the CIFAR-10 loader reads from, so the loader finds a populated
//! cache and never reaches for the network.
//!
//! ```text
//! $VH_INPUTS_DIR/cifar-10-batches-bin/*  ──copy/move──▶  ~/.keras/datasets/cifar-10-batches-bin/
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::utils::error::{Cifar10Error, IoResultExt, Result};

use super::{ARCHIVE_FILE_NAME, DATASET_FOLDER_NAME};

/// Environment variable holding the platform input mount
pub const INPUTS_DIR_ENV: &str = "VH_INPUTS_DIR";

/// Environment variable overriding the per-user cache root
pub const CACHE_DIR_ENV: &str = "CIFAR10_CACHE_DIR";

/// Input mount used when `VH_INPUTS_DIR` is unset
pub const DEFAULT_INPUTS_DIR: &str = "/";

/// How files get from the input mount into the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StagingMode {
    /// Copy every file of the mount folder
    #[default]
    CopyAll,
    /// Move a single, deterministically chosen file
    MoveSingle,
}

/// Resolved locations for staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    /// Root of the platform input mount
    pub inputs_root: PathBuf,
    /// Root of the dataset cache (`~/.keras/datasets` by default)
    pub cache_root: PathBuf,
    /// Fixed folder name under both roots
    pub folder_name: String,
}

impl StagingConfig {
    pub fn new(inputs_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            inputs_root: inputs_root.into(),
            cache_root: cache_root.into(),
            folder_name: DATASET_FOLDER_NAME.to_string(),
        }
    }

    /// Resolve the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let inputs_root = lookup(INPUTS_DIR_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_INPUTS_DIR.to_string());

        let cache_root = match lookup(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_cache_root()?,
        };

        Ok(Self::new(inputs_root, cache_root))
    }

    /// Folder under the input mount holding the dataset files
    pub fn input_dir(&self) -> PathBuf {
        self.inputs_root.join(&self.folder_name)
    }

    /// Cache entry the loader checks before fetching
    pub fn cache_entry(&self) -> PathBuf {
        self.cache_root.join(&self.folder_name)
    }
}

/// Default per-user cache root: `~/.keras/datasets`
pub fn default_cache_root() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Cifar10Error::Config("cannot determine home directory".to_string()))?;
    Ok(home.join(".keras").join("datasets"))
}

/// Outcome of a staging run
#[derive(Debug, Clone)]
pub struct StagingReport {
    pub mode: StagingMode,
    /// Destination paths of every staged file
    pub staged: Vec<PathBuf>,
}

/// Stage the platform input into the cache using `mode`
pub fn stage_inputs(config: &StagingConfig, mode: StagingMode) -> Result<StagingReport> {
    let staged = match mode {
        StagingMode::CopyAll => stage_copy_all(config)?,
        StagingMode::MoveSingle => vec![stage_move_single(config)?],
    };

    Ok(StagingReport { mode, staged })
}

/// Copy every file of the input folder into the cache entry
pub fn stage_copy_all(config: &StagingConfig) -> Result<Vec<PathBuf>> {
    let input_dir = config.input_dir();
    let cache_dir = ensure_cache_dir(config)?;

    info!("input_dir: {}", input_dir.display());
    info!("cache_dir: {}", cache_dir.display());

    let files = list_files(&input_dir)?;
    let mut staged = Vec::with_capacity(files.len());

    for source in files {
        let dest = destination_for(&source, &cache_dir)?;
        info!("copying {}", source.display());
        copy_preserving_mtime(&source, &dest)?;
        debug!("copied to {}", dest.display());
        staged.push(dest);
    }

    info!("batch copy done: {} file(s) staged", staged.len());
    Ok(staged)
}

/// Move exactly one file of the input folder into the cache entry
///
/// The dataset archive is chosen when present, otherwise the file with the
/// smallest name. An empty input folder is an error.
pub fn stage_move_single(config: &StagingConfig) -> Result<PathBuf> {
    let input_dir = config.input_dir();
    let cache_dir = ensure_cache_dir(config)?;

    let files = list_files(&input_dir)?;
    info!("input files: {:?}", files);

    let source = select_single(&files).ok_or_else(|| {
        Cifar10Error::Dataset(format!(
            "no files to stage in {}",
            input_dir.display()
        ))
    })?;

    let dest = destination_for(source, &cache_dir)?;
    info!("moving {} -> {}", source.display(), dest.display());
    move_file(source, &dest)?;
    info!("move done");

    Ok(dest)
}

/// Pick the file a single-file staging run moves
pub fn select_single(files: &[PathBuf]) -> Option<&PathBuf> {
    files
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n == ARCHIVE_FILE_NAME))
        .or_else(|| files.iter().min_by(|a, b| a.file_name().cmp(&b.file_name())))
}

/// Regular files directly inside `dir`, sorted by file name
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let path = entry.path();
        if entry.file_type().with_path(&path)?.is_file() {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn ensure_cache_dir(config: &StagingConfig) -> Result<PathBuf> {
    let cache_dir = config.cache_entry();
    if cache_dir.exists() {
        debug!("cache dir exists: {}", cache_dir.display());
    } else {
        fs::create_dir_all(&cache_dir).with_path(&cache_dir)?;
        info!("cache dir created: {}", cache_dir.display());
    }
    Ok(cache_dir)
}

fn destination_for(source: &Path, dir: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| Cifar10Error::PathNotFound(source.to_path_buf()))?;
    Ok(dir.join(name))
}

fn copy_preserving_mtime(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest).with_path(source)?;

    // Best effort, like `cp -p`: a failure here leaves a valid copy behind.
    let modified = fs::metadata(source).and_then(|m| m.modified());
    if let Ok(modified) = modified {
        let result = File::options()
            .write(true)
            .open(dest)
            .and_then(|f| f.set_modified(modified));
        if let Err(e) = result {
            debug!("could not preserve mtime of {}: {}", dest.display(), e);
        }
    }

    Ok(())
}

fn move_file(source: &Path, dest: &Path) -> Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            // rename(2) cannot cross filesystems; mounts usually do.
            debug!("rename failed ({}), falling back to copy + remove", e);
            copy_preserving_mtime(source, dest)?;
            fs::remove_file(source).with_path(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mount_with(files: &[(&str, &[u8])]) -> (TempDir, StagingConfig) {
        let tmp = TempDir::new().unwrap();
        let config = StagingConfig::new(tmp.path().join("inputs"), tmp.path().join("cache"));
        fs::create_dir_all(config.input_dir()).unwrap();
        for (name, contents) in files {
            fs::write(config.input_dir().join(name), contents).unwrap();
        }
        (tmp, config)
    }

    #[test]
    fn test_copy_all_stages_byte_identical_files() {
        let files: [(&str, &[u8]); 3] = [
            ("data_batch_1.bin", &[1, 2, 3, 4]),
            ("data_batch_2.bin", &[5, 6, 7]),
            ("test_batch.bin", &[0; 64]),
        ];
        let (_tmp, config) = mount_with(&files);

        let staged = stage_copy_all(&config).unwrap();
        assert_eq!(staged.len(), files.len());

        for (name, contents) in files {
            let copied = fs::read(config.cache_entry().join(name)).unwrap();
            assert_eq!(copied, contents);
            // Sources are left in place.
            assert!(config.input_dir().join(name).exists());
        }
    }

    #[test]
    fn test_copy_all_creates_cache_dir() {
        let (_tmp, config) = mount_with(&[("batches.meta.txt", b"airplane\n")]);
        assert!(!config.cache_entry().exists());

        stage_copy_all(&config).unwrap();
        assert!(config.cache_entry().is_dir());
    }

    #[test]
    fn test_copy_all_skips_subdirectories() {
        let (_tmp, config) = mount_with(&[("data_batch_1.bin", b"x")]);
        fs::create_dir(config.input_dir().join("nested")).unwrap();

        let staged = stage_copy_all(&config).unwrap();
        assert_eq!(staged, vec![config.cache_entry().join("data_batch_1.bin")]);
    }

    #[test]
    fn test_move_single_removes_exactly_one_file() {
        let (_tmp, config) = mount_with(&[
            ("data_batch_2.bin", b"b"),
            ("data_batch_1.bin", b"a"),
            ("test_batch.bin", b"t"),
        ]);

        let dest = stage_move_single(&config).unwrap();

        assert_eq!(dest, config.cache_entry().join("data_batch_1.bin"));
        assert_eq!(fs::read(&dest).unwrap(), b"a");
        let remaining = list_files(&config.input_dir()).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!config.input_dir().join("data_batch_1.bin").exists());
    }

    #[test]
    fn test_move_single_prefers_archive() {
        let (_tmp, config) = mount_with(&[
            ("a_readme.html", b"<html/>"),
            (ARCHIVE_FILE_NAME, b"gz"),
        ]);

        let dest = stage_move_single(&config).unwrap();
        assert_eq!(dest.file_name().unwrap(), ARCHIVE_FILE_NAME);
    }

    #[test]
    fn test_move_single_errors_on_empty_mount() {
        let (_tmp, config) = mount_with(&[]);

        let err = stage_move_single(&config).unwrap_err();
        assert!(matches!(err, Cifar10Error::Dataset(_)));
    }

    #[test]
    fn test_missing_input_dir_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let config = StagingConfig::new(tmp.path().join("absent"), tmp.path().join("cache"));

        let err = stage_inputs(&config, StagingMode::CopyAll).unwrap_err();
        match err {
            Cifar10Error::Io { path, .. } => assert_eq!(path, config.input_dir()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_config_from_lookup() {
        let config = StagingConfig::from_lookup(|key| match key {
            INPUTS_DIR_ENV => Some("/valohai/inputs".to_string()),
            CACHE_DIR_ENV => Some("/tmp/cache".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(
            config.input_dir(),
            PathBuf::from("/valohai/inputs/cifar-10-batches-bin")
        );
        assert_eq!(
            config.cache_entry(),
            PathBuf::from("/tmp/cache/cifar-10-batches-bin")
        );
    }

    #[test]
    fn test_config_defaults_to_root_mount() {
        let config = StagingConfig::from_lookup(|key| match key {
            CACHE_DIR_ENV => Some("/tmp/cache".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.inputs_root, PathBuf::from(DEFAULT_INPUTS_DIR));
    }
}
