//! Binary Record Sample Source

use crate::labels::{Label, LabelTable};
use crate::DatasetError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Number of colour planes per image
const CHANNELS: usize = 3;

/// One labeled evaluation sample
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pixels: Vec<u8>,
    label: Label,
}

impl Sample {
    /// Create a sample from planar RGB bytes and its ground-truth label
    pub fn new(pixels: Vec<u8>, label: Label) -> Self {
        Self { pixels, label }
    }

    /// Planar image bytes (all R, then all G, then all B)
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Ground-truth label
    pub fn label(&self) -> &Label {
        &self.label
    }
}

/// Dataset location and record geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Path to the binary record file
    pub path: PathBuf,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Maximum number of samples to load
    pub max_samples: usize,
    /// Optional label file (one name per line)
    pub labels_path: Option<PathBuf>,
    /// Labels used when no label file is configured or it is unreadable
    pub labels: LabelTable,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cifar-10-batches-bin/test_batch.bin"),
            width: 32,
            height: 32,
            max_samples: 10_000,
            labels_path: None,
            labels: LabelTable::cifar10(),
        }
    }
}

impl DatasetConfig {
    /// CIFAR-10 test batch at the given path
    pub fn cifar10(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Bytes of image payload per record
    pub fn image_len(&self) -> usize {
        CHANNELS * self.width as usize * self.height as usize
    }

    /// Bytes per record, including the label byte
    pub fn record_len(&self) -> usize {
        1 + self.image_len()
    }

    fn validate(&self) -> Result<(), DatasetError> {
        if self.width == 0 || self.height == 0 {
            return Err(DatasetError::InvalidConfig(format!(
                "image dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Producer of an ordered, bounded sequence of samples
pub trait SampleSource: Send {
    /// Load every sample, in source order.
    ///
    /// An unreadable source is an error; an empty `Vec` means the source
    /// was readable but held no complete records.
    fn load_all(&self) -> Result<Vec<Sample>, DatasetError>;
}

/// Sample source reading fixed-size `[label][R plane][G plane][B plane]` records
pub struct BinaryRecordSource {
    config: DatasetConfig,
    labels: LabelTable,
}

impl BinaryRecordSource {
    /// Create a source, resolving the label table
    pub fn new(config: DatasetConfig) -> Result<Self, DatasetError> {
        config.validate()?;

        let labels = match &config.labels_path {
            Some(path) => LabelTable::from_file_or(path, config.labels.clone()),
            None => config.labels.clone(),
        };

        info!(
            "Creating dataset source: {} ({}x{}, cap={})",
            config.path.display(),
            config.width,
            config.height,
            config.max_samples
        );

        Ok(Self { config, labels })
    }

    /// Label table used to resolve label bytes
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Source configuration
    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Decode records from any reader, honouring the sample cap
    pub fn decode<R: Read>(&self, mut reader: R) -> io::Result<Vec<Sample>> {
        let record_len = self.config.record_len();
        let mut record = vec![0u8; record_len];
        let mut samples = Vec::new();

        while samples.len() < self.config.max_samples {
            let filled = read_record(&mut reader, &mut record)?;
            if filled == 0 {
                break;
            }
            if filled < record_len {
                warn!(
                    "Dropping trailing partial record: {} of {} bytes",
                    filled, record_len
                );
                break;
            }

            let label = self.labels.label(record[0] as usize);
            samples.push(Sample::new(record[1..].to_vec(), label));
        }

        debug!("Decoded {} samples", samples.len());
        Ok(samples)
    }

    fn load_error(&self, err: io::Error) -> DatasetError {
        DatasetError::LoadError {
            path: self.config.path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl SampleSource for BinaryRecordSource {
    fn load_all(&self) -> Result<Vec<Sample>, DatasetError> {
        let file = File::open(&self.config.path).map_err(|e| self.load_error(e))?;
        let samples = self
            .decode(BufReader::new(file))
            .map_err(|e| self.load_error(e))?;

        info!(
            "Loaded {} samples from {}",
            samples.len(),
            self.config.path.display()
        );
        Ok(samples)
    }
}

/// Fill `buf` as far as the reader allows, returning the byte count
fn read_record<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
