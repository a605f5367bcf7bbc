#![allow(dead_code)]

use data_contracts::{PoseLog, PoseRecord};
use image::{Rgb, RgbImage};
use sequence_dataset::{DatasetConfig, MemorySequence, MemorySequenceSource};

pub const W: u32 = 4;
pub const H: u32 = 2;

pub fn dataset_config() -> DatasetConfig {
    DatasetConfig {
        fix_seq_length: 3,
        num_pts: 2,
        target_size: (W, H),
        max_replacements: 4,
        ..Default::default()
    }
}

/// A sequence driving along +x with slowly brightening frames.
pub fn sequence(id: &str, len: usize) -> MemorySequence {
    let frames = (0..len)
        .map(|i| RgbImage::from_pixel(W, H, Rgb([(i * 10) as u8, 80, 160])))
        .collect();
    let records: Vec<PoseRecord> = (0..len)
        .map(|i| PoseRecord::new([i as f64 * 0.5, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]))
        .collect();
    MemorySequence {
        id: id.to_string(),
        frames: Some(frames),
        poses: PoseLog::from_records(&records),
    }
}

/// A sequence whose frames cannot be fetched.
pub fn broken(id: &str) -> MemorySequence {
    MemorySequence {
        frames: None,
        ..sequence(id, 8)
    }
}

pub fn source(count: usize) -> MemorySequenceSource {
    MemorySequenceSource::new(
        (0..count)
            .map(|i| sequence(&format!("seq{i}"), 8))
            .collect(),
    )
}
