use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::Array1;
use std::{fs::File, io::Read, path::Path};

use crate::error::{Result, TrainerError};

/// A single labelled image: the pixels flattened to a vector with values
/// already normalized into [0, 1], and the digit it depicts.
pub struct Example {
    pub input: Array1<f64>,
    pub label: usize,
}

/// An ordered, immutable collection of examples. Epoch-level shuffling is
/// done with an index permutation owned by the training loop, so the
/// collection itself is never reordered after construction.
pub struct Dataset {
    examples: Vec<Example>,
}

impl Dataset {
    pub fn new(examples: Vec<Example>) -> Dataset {
        Dataset { examples }
    }

    /// Loads one partition of the corpus from a pair of gzip-compressed IDX
    /// files (the distribution format of the MNIST database). Labels are
    /// checked against `num_classes` up front so the numeric core can treat
    /// them as valid indices everywhere.
    pub fn from_idx_files(
        images_path: impl AsRef<Path>,
        labels_path: impl AsRef<Path>,
        num_classes: usize,
    ) -> Result<Dataset> {
        let image_bytes = read_gz_bytes(images_path.as_ref())?;
        let label_bytes = read_gz_bytes(labels_path.as_ref())?;
        let examples = decode_idx(image_bytes, label_bytes, num_classes)?;
        Ok(Dataset { examples })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn iter(&self) -> impl Iterator<Item = &Example> {
        self.examples.iter()
    }
}

fn read_gz_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;
    Ok(bytes)
}

// IDX magic numbers: 2051 marks an image file, 2049 a label file.
const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

/// Decodes a raw IDX image/label byte pair into examples. The image file
/// header is four big-endian u32s (magic, count, rows, columns); the label
/// header is two (magic, count).
fn decode_idx(image_bytes: Vec<u8>, label_bytes: Vec<u8>, num_classes: usize) -> Result<Vec<Example>> {
    let mut image_iter = image_bytes.into_iter();
    let mut label_iter = label_bytes.into_iter();

    let image_header = read_header(&mut image_iter, 4)?;
    if image_header[0] != IMAGE_MAGIC {
        return Err(TrainerError::Format(format!(
            "bad image file magic number: {}",
            image_header[0]
        )));
    }
    let image_count = image_header[1] as usize;
    let pixels = (image_header[2] * image_header[3]) as usize;
    if pixels == 0 {
        return Err(TrainerError::Format(format!(
            "degenerate image dimensions: {}x{}",
            image_header[2], image_header[3]
        )));
    }

    let label_header = read_header(&mut label_iter, 2)?;
    if label_header[0] != LABEL_MAGIC {
        return Err(TrainerError::Format(format!(
            "bad label file magic number: {}",
            label_header[0]
        )));
    }
    if image_count != label_header[1] as usize {
        return Err(TrainerError::Format(format!(
            "{image_count} images but {} labels",
            label_header[1]
        )));
    }

    // Both iterators now sit at the start of their data sections. Walk them
    // in lockstep, one image-sized chunk per label.
    let mut examples = Vec::with_capacity(image_count);
    for (image_chunk, label_byte) in image_iter.chunks(pixels).into_iter().zip(label_iter) {
        let input = image_chunk
            .map(|byte| byte as f64 / 255.0)
            .collect::<Array1<f64>>();
        if input.len() != pixels {
            return Err(TrainerError::Format("truncated image data".into()));
        }
        let label = label_byte as usize;
        if label >= num_classes {
            return Err(TrainerError::Format(format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }
        examples.push(Example { input, label });
    }
    if examples.len() != image_count {
        return Err(TrainerError::Format(format!(
            "expected {image_count} examples, decoded {}",
            examples.len()
        )));
    }

    Ok(examples)
}

fn read_header(iter: &mut impl Iterator<Item = u8>, words: usize) -> Result<Vec<u32>> {
    let bytes: Vec<u8> = iter.by_ref().take(words * 4).collect();
    if bytes.len() != words * 4 {
        return Err(TrainerError::Format("truncated IDX header".into()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes(chunk.try_into().unwrap()))
        .collect())
}
