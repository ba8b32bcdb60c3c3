//! CIFAR-10 dataset loader
//!
//! Reads the binary distribution of CIFAR-10 from the per-user cache,
//! extracting or downloading the archive first when the cache entry is
//! incomplete. CIFAR-10 consists of 60,000 32x32 colour images in 10
//! classes: 50,000 for training and 10,000 held out for testing.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::utils::error::{Cifar10Error, IoResultExt, Result};

use super::{ARCHIVE_FILE_NAME, DATASET_FOLDER_NAME};

/// Upstream location of the binary archive
pub const DOWNLOAD_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";

/// Image side length in pixels
pub const IMAGE_SIDE: usize = 32;

/// Colour channels per image
pub const CHANNELS: usize = 3;

/// Bytes of pixel data per image (32 * 32 * 3)
pub const IMAGE_BYTES: usize = CHANNELS * IMAGE_SIDE * IMAGE_SIDE;

/// Bytes per record: one label byte followed by the pixels
pub const RECORD_BYTES: usize = 1 + IMAGE_BYTES;

/// Training batch files, in load order
pub const TRAIN_BATCH_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];

/// Held-out test batch file
pub const TEST_BATCH_FILE: &str = "test_batch.bin";

/// CIFAR-10 class names
pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// Name of a class index, if it is a CIFAR-10 class
pub fn class_name(label: usize) -> Option<&'static str> {
    CLASS_NAMES.get(label).copied()
}

/// Single CIFAR-10 image with its label
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cifar10Image {
    /// Raw pixels in CHW order: 1024 red, 1024 green, 1024 blue bytes
    pub pixels: Vec<u8>,
    /// Class label (0-9)
    pub label: u8,
}

impl Cifar10Image {
    pub fn new(pixels: Vec<u8>, label: u8) -> Self {
        Self { pixels, label }
    }

    /// Pixels scaled to the unit interval, CHW order
    pub fn normalized(&self) -> Vec<f32> {
        self.pixels.iter().map(|&p| p as f32 / 255.0).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetSplit {
    Train,
    Test,
}

/// An in-memory CIFAR-10 split
#[derive(Clone, Debug)]
pub struct Cifar10Dataset {
    pub images: Vec<Cifar10Image>,
    pub split: DatasetSplit,
}

impl Cifar10Dataset {
    pub fn from_images(images: Vec<Cifar10Image>, split: DatasetSplit) -> Self {
        Self { images, split }
    }

    /// Load a split from a directory of batch files
    pub fn load(dir: impl AsRef<Path>, split: DatasetSplit) -> Result<Self> {
        let dir = dir.as_ref();
        let files: &[&str] = match split {
            DatasetSplit::Train => &TRAIN_BATCH_FILES,
            DatasetSplit::Test => &[TEST_BATCH_FILE],
        };

        let mut images = Vec::new();
        for name in files {
            let path = dir.join(name);
            let bytes = fs::read(&path).with_path(&path)?;
            let batch = parse_batch(&bytes).map_err(|e| {
                Cifar10Error::Dataset(format!("{}: {}", path.display(), e))
            })?;
            debug!("loaded {} images from {}", batch.len(), path.display());
            images.extend(batch);
        }

        Ok(Self::from_images(images, split))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Labels of every image, in order
    pub fn labels(&self) -> Vec<usize> {
        self.images.iter().map(|img| img.label as usize).collect()
    }

    /// Number of images per class
    pub fn class_distribution(&self) -> [usize; 10] {
        let mut counts = [0; 10];
        for img in &self.images {
            if let Some(count) = counts.get_mut(img.label as usize) {
                *count += 1;
            }
        }
        counts
    }
}

/// Parse one batch file's contents into images
///
/// Format: repeated `[label (1 byte)][red (1024)][green (1024)][blue (1024)]`.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<Cifar10Image>> {
    if bytes.is_empty() || bytes.len() % RECORD_BYTES != 0 {
        return Err(Cifar10Error::Dataset(format!(
            "invalid batch size: {} bytes is not a whole number of {}-byte records",
            bytes.len(),
            RECORD_BYTES
        )));
    }

    Ok(bytes
        .chunks_exact(RECORD_BYTES)
        .map(|record| Cifar10Image::new(record[1..].to_vec(), record[0]))
        .collect())
}

/// Batch files missing from a cache entry
pub fn missing_files(entry: &Path) -> Vec<&'static str> {
    TRAIN_BATCH_FILES
        .iter()
        .chain(std::iter::once(&TEST_BATCH_FILE))
        .filter(|name| !entry.join(name).is_file())
        .copied()
        .collect()
}

/// Whether a cache entry holds every batch file
pub fn is_complete(entry: &Path) -> bool {
    missing_files(entry).is_empty()
}

/// Make sure the cache entry under `cache_root` is complete
///
/// Uses the entry as-is when complete, otherwise extracts a staged archive,
/// otherwise downloads the archive first. Returns the entry path.
pub fn ensure_dataset(cache_root: &Path) -> Result<PathBuf> {
    let entry = cache_root.join(DATASET_FOLDER_NAME);
    if is_complete(&entry) {
        info!("Using cached dataset at {}", entry.display());
        return Ok(entry);
    }

    let staged = [entry.join(ARCHIVE_FILE_NAME), cache_root.join(ARCHIVE_FILE_NAME)]
        .into_iter()
        .find(|p| p.is_file());

    let archive = match staged {
        Some(path) => {
            info!("Found dataset archive at {}", path.display());
            path
        }
        None => {
            fs::create_dir_all(cache_root).with_path(cache_root)?;
            let path = cache_root.join(ARCHIVE_FILE_NAME);
            download_archive(DOWNLOAD_URL, &path)?;
            path
        }
    };

    extract_archive(&archive, cache_root)?;

    let missing = missing_files(&entry);
    if !missing.is_empty() {
        return Err(Cifar10Error::Dataset(format!(
            "{} is missing {:?} after extraction",
            entry.display(),
            missing
        )));
    }

    Ok(entry)
}

/// Load `(train, test)` from the cache, fetching it if needed
pub fn load_data(cache_root: &Path) -> Result<(Cifar10Dataset, Cifar10Dataset)> {
    let entry = ensure_dataset(cache_root)?;
    let train = Cifar10Dataset::load(&entry, DatasetSplit::Train)?;
    let test = Cifar10Dataset::load(&entry, DatasetSplit::Test)?;
    Ok((train, test))
}

/// Download the dataset archive to `dest`
pub fn download_archive(url: &str, dest: &Path) -> Result<()> {
    info!("Downloading CIFAR-10 from {}", url);

    let partial = dest.with_extension("part");
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| Cifar10Error::Download(format!("{}: {}", url, e)))?;

    let mut file = File::create(&partial).with_path(&partial)?;
    response
        .copy_to(&mut file)
        .map_err(|e| Cifar10Error::Download(format!("{}: {}", url, e)))?;
    file.flush().with_path(&partial)?;
    fs::rename(&partial, dest).with_path(dest)?;

    info!("Download complete: {}", dest.display());
    Ok(())
}

/// Unpack a `.tar.gz` archive into `output_dir`
pub fn extract_archive(archive: &Path, output_dir: &Path) -> Result<()> {
    info!("Extracting {} into {}", archive.display(), output_dir.display());

    let tar_gz = File::open(archive).with_path(archive)?;
    let decompressor = flate2::read::GzDecoder::new(tar_gz);
    let mut tarball = tar::Archive::new(decompressor);
    tarball.unpack(output_dir).with_path(archive)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    /// Serialized batch with one record per label, pixels filled with `fill`
    fn batch_bytes(labels: &[u8], fill: u8) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(labels.len() * RECORD_BYTES);
        for &label in labels {
            bytes.push(label);
            bytes.extend(std::iter::repeat(fill).take(IMAGE_BYTES));
        }
        bytes
    }

    fn write_entry(entry: &Path) {
        fs::create_dir_all(entry).unwrap();
        for (i, name) in TRAIN_BATCH_FILES.iter().enumerate() {
            fs::write(entry.join(name), batch_bytes(&[i as u8, 9], i as u8)).unwrap();
        }
        fs::write(entry.join(TEST_BATCH_FILE), batch_bytes(&[3], 200)).unwrap();
    }

    #[test]
    fn test_parse_batch_reads_label_and_planes() {
        let mut bytes = vec![7u8];
        bytes.extend(std::iter::repeat(10).take(1024));
        bytes.extend(std::iter::repeat(20).take(1024));
        bytes.extend(std::iter::repeat(30).take(1024));

        let images = parse_batch(&bytes).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].label, 7);
        assert_eq!(images[0].pixels[0], 10);
        assert_eq!(images[0].pixels[1024], 20);
        assert_eq!(images[0].pixels[2048], 30);
    }

    #[test]
    fn test_parse_batch_rejects_truncated_file() {
        let mut bytes = batch_bytes(&[1, 2], 0);
        bytes.pop();
        assert!(parse_batch(&bytes).is_err());
        assert!(parse_batch(&[]).is_err());
    }

    #[test]
    fn test_normalized_is_unit_interval() {
        let img = Cifar10Image::new(vec![0, 51, 255], 0);
        assert_eq!(img.normalized(), vec![0.0, 0.2, 1.0]);
    }

    #[test]
    fn test_load_splits_from_entry() {
        let tmp = TempDir::new().unwrap();
        let entry = tmp.path().join(DATASET_FOLDER_NAME);
        write_entry(&entry);

        let train = Cifar10Dataset::load(&entry, DatasetSplit::Train).unwrap();
        let test = Cifar10Dataset::load(&entry, DatasetSplit::Test).unwrap();

        assert_eq!(train.len(), 10);
        assert_eq!(train.labels()[..4], [0, 9, 1, 9]);
        assert_eq!(train.class_distribution()[9], 5);
        assert_eq!(test.len(), 1);
        assert_eq!(test.images[0].pixels[0], 200);
    }

    #[test]
    fn test_missing_files_reports_absent_batches() {
        let tmp = TempDir::new().unwrap();
        let entry = tmp.path().join(DATASET_FOLDER_NAME);
        write_entry(&entry);
        fs::remove_file(entry.join("data_batch_3.bin")).unwrap();

        assert_eq!(missing_files(&entry), vec!["data_batch_3.bin"]);
        assert!(!is_complete(&entry));
    }

    #[test]
    fn test_ensure_dataset_uses_complete_entry() {
        let tmp = TempDir::new().unwrap();
        write_entry(&tmp.path().join(DATASET_FOLDER_NAME));

        let entry = ensure_dataset(tmp.path()).unwrap();
        assert_eq!(entry, tmp.path().join(DATASET_FOLDER_NAME));
    }

    #[test]
    fn test_ensure_dataset_extracts_staged_archive() {
        let tmp = TempDir::new().unwrap();
        let entry = tmp.path().join(DATASET_FOLDER_NAME);
        fs::create_dir_all(&entry).unwrap();

        // Archive staged into the cache entry, the way the platform mount delivers it.
        let file = File::create(entry.join(ARCHIVE_FILE_NAME)).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for name in TRAIN_BATCH_FILES.iter().chain(std::iter::once(&TEST_BATCH_FILE)) {
            let data = batch_bytes(&[1], 1);
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/{}", DATASET_FOLDER_NAME, name), &data[..])
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let (train, test) = load_data(tmp.path()).unwrap();
        assert_eq!(train.len(), 5);
        assert_eq!(test.len(), 1);
    }

    #[test]
    fn test_class_name_lookup() {
        assert_eq!(class_name(0), Some("airplane"));
        assert_eq!(class_name(9), Some("truck"));
        assert_eq!(class_name(10), None);
    }
}
