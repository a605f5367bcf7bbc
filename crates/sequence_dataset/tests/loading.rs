use data_contracts::{PoseLog, PoseRecord, SplitList};
use image::{Rgb, RgbImage};
use rand::SeedableRng;
use sequence_dataset::{
    load_sample, load_with_replacement, DatasetConfig, DatasetError, DirSequenceSource,
    FrameTransform, LoaderConfig, MemorySequence, MemorySequenceSource, SequenceLoader,
    SequenceSource, ShardPlan,
};
use std::sync::Arc;

const W: u32 = 4;
const H: u32 = 2;

fn cfg() -> DatasetConfig {
    DatasetConfig {
        fix_seq_length: 3,
        num_pts: 2,
        target_size: (W, H),
        mean: [0.0; 3],
        std: [1.0; 3],
        max_replacements: 64,
        ..Default::default()
    }
}

/// Frame `i` is a flat gray image of value `i`; the vehicle drives along +x.
fn sequence(id: &str, len: usize) -> MemorySequence {
    let frames = (0..len)
        .map(|i| RgbImage::from_pixel(W, H, Rgb([i as u8; 3])))
        .collect();
    let records: Vec<PoseRecord> = (0..len)
        .map(|i| PoseRecord::new([i as f64 * 2.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]))
        .collect();
    MemorySequence {
        id: id.to_string(),
        frames: Some(frames),
        poses: PoseLog::from_records(&records),
    }
}

fn broken(id: &str) -> MemorySequence {
    MemorySequence {
        frames: None,
        ..sequence(id, 10)
    }
}

fn frame_value(sample_frames: &[f32], step: usize, slot: usize) -> f32 {
    let frame_len = (3 * W * H) as usize;
    sample_frames[(step * 2 + slot) * frame_len] * 255.0
}

#[test]
fn sample_pairs_previous_and_current_frames() {
    let source = MemorySequenceSource::new(vec![sequence("a", 12)]);
    let cfg = cfg();
    let transform = FrameTransform::from_config(&cfg);
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let sample = load_sample(&source, 0, &cfg, &transform, &mut rng).unwrap();

    assert_eq!(sample.frames.len(), 3 * 6 * (W * H) as usize);
    assert_eq!(sample.labels.len(), 3 * 2 * 3);
    let start = sample.window.start;
    assert!(start >= 1);
    for step in 0..3 {
        let prev = frame_value(&sample.frames, step, 0);
        let cur = frame_value(&sample.frames, step, 1);
        assert!((prev - (start + step - 1) as f32).abs() < 1e-3);
        assert!((cur - (start + step) as f32).abs() < 1e-3);
    }
    // Every step: origin, then 2 m forward.
    for step in sample.labels.chunks_exact(6) {
        assert_eq!(step, &[0.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
    }
}

#[test]
fn exact_length_sequence_pairs_first_frame_with_itself() {
    let source = MemorySequenceSource::new(vec![sequence("a", 5)]);
    let cfg = cfg();
    let transform = FrameTransform::from_config(&cfg);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let sample = load_sample(&source, 0, &cfg, &transform, &mut rng).unwrap();
    assert_eq!(sample.window.start, 0);
    assert_eq!(frame_value(&sample.frames, 0, 0), 0.0);
    assert_eq!(frame_value(&sample.frames, 0, 1), 0.0);
    assert!((frame_value(&sample.frames, 1, 0) - 0.0).abs() < 1e-3);
    assert!((frame_value(&sample.frames, 1, 1) - 1.0).abs() < 1e-3);
}

#[test]
fn forward_clamp_bounds_x() {
    let source = MemorySequenceSource::new(vec![sequence("a", 12)]);
    let cfg = DatasetConfig {
        forward_clamp: Some(0.5),
        ..cfg()
    };
    let transform = FrameTransform::from_config(&cfg);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let sample = load_sample(&source, 0, &cfg, &transform, &mut rng).unwrap();
    assert!(sample.labels.chunks_exact(3).all(|p| p[0] >= 0.5));
}

#[test]
fn short_sequence_reports_its_id() {
    let source = MemorySequenceSource::new(vec![sequence("tiny", 4)]);
    let cfg = cfg();
    let transform = FrameTransform::from_config(&cfg);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    match load_sample(&source, 0, &cfg, &transform, &mut rng) {
        Err(DatasetError::SequenceTooShort {
            id,
            length: 4,
            required: 5,
        }) => assert_eq!(id, "tiny"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn failed_sample_is_replaced() {
    let source = MemorySequenceSource::new(vec![broken("bad"), sequence("good", 12)]);
    let cfg = cfg();
    let transform = FrameTransform::from_config(&cfg);
    let mut rng = rand::rngs::StdRng::seed_from_u64(9);
    let sample = load_with_replacement(&source, 0, &cfg, &transform, &mut rng)
        .unwrap()
        .expect("replacement sample");
    assert_eq!(sample.id, "good");
    assert_eq!(sample.index, 1);
}

#[test]
fn strict_assets_surface_the_failure() {
    let source = MemorySequenceSource::new(vec![broken("bad"), sequence("good", 12)]);
    let cfg = DatasetConfig {
        strict_assets: true,
        ..cfg()
    };
    let transform = FrameTransform::from_config(&cfg);
    let mut rng = rand::rngs::StdRng::seed_from_u64(9);
    let err = load_with_replacement(&source, 0, &cfg, &transform, &mut rng).unwrap_err();
    assert!(matches!(err, DatasetError::AssetUnavailable { .. }));
}

#[test]
fn exhausted_replacements_drop_the_sample() {
    let source = MemorySequenceSource::new(vec![broken("a"), broken("b")]);
    let cfg = DatasetConfig {
        max_replacements: 2,
        ..cfg()
    };
    let transform = FrameTransform::from_config(&cfg);
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    assert!(load_with_replacement(&source, 0, &cfg, &transform, &mut rng)
        .unwrap()
        .is_none());
}

#[test]
fn loader_yields_full_batches_per_rank() {
    let sequences = (0..8).map(|i| sequence(&format!("s{i}"), 10 + i)).collect();
    let source: Arc<dyn SequenceSource> = Arc::new(MemorySequenceSource::new(sequences));
    let loader_cfg = LoaderConfig {
        batch_size: 2,
        num_workers: 2,
        prefetch: 1,
        log_every: 0,
    };

    let mut seen = Vec::new();
    for rank in 0..2 {
        let loader = SequenceLoader::new(
            Arc::clone(&source),
            cfg(),
            loader_cfg,
            ShardPlan::new(rank, 2).with_seed(4),
        )
        .unwrap();
        assert_eq!(loader.batches_per_epoch(), 2);
        let batches: Vec<_> = loader.epoch(0).collect::<Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 2);
        for batch in batches {
            assert_eq!(batch.batch, 2);
            assert_eq!(batch.seq_len, 3);
            assert_eq!(batch.frames.len(), 2 * 3 * 6 * (W * H) as usize);
            assert_eq!(batch.labels.len(), 2 * 3 * 2 * 3);
            seen.extend(batch.ids);
        }
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 8);
}

#[test]
fn loader_reports_batches_where_everything_failed() {
    let source: Arc<dyn SequenceSource> =
        Arc::new(MemorySequenceSource::new(vec![broken("a"), broken("b")]));
    let cfg = DatasetConfig {
        max_replacements: 1,
        ..cfg()
    };
    let loader = SequenceLoader::new(
        source,
        cfg,
        LoaderConfig {
            batch_size: 2,
            num_workers: 1,
            prefetch: 1,
            log_every: 0,
        },
        ShardPlan::full(),
    )
    .unwrap();
    let mut epoch = loader.epoch(0);
    let err = epoch.next_batch().unwrap().unwrap_err();
    assert!(err.is_recoverable());
    assert!(epoch.next_batch().is_none());
}

#[test]
fn dropping_an_epoch_early_stops_the_producer() {
    let sequences = (0..16).map(|i| sequence(&format!("s{i}"), 12)).collect();
    let source: Arc<dyn SequenceSource> = Arc::new(MemorySequenceSource::new(sequences));
    let loader = SequenceLoader::new(
        source,
        cfg(),
        LoaderConfig {
            batch_size: 1,
            num_workers: 1,
            prefetch: 1,
            log_every: 0,
        },
        ShardPlan::full(),
    )
    .unwrap();
    let mut epoch = loader.epoch(0);
    assert!(epoch.next_batch().unwrap().is_ok());
    drop(epoch);
}

#[test]
fn directory_source_reads_frames_and_poses() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let seq_dir = tmp.path().join("route_a/segment_0");
    std::fs::create_dir_all(seq_dir.join("frames"))?;
    for i in 0..7u8 {
        RgbImage::from_pixel(8, 4, Rgb([i * 10; 3]))
            .save(seq_dir.join("frames").join(format!("{i:06}.png")))?;
    }
    let records: Vec<PoseRecord> = (0..6)
        .map(|i| PoseRecord::new([0.0, i as f64, 0.0], [1.0, 0.0, 0.0, 0.0]))
        .collect();
    PoseLog::from_records(&records).save(&seq_dir.join("global_pose.json"))?;

    let split_path = tmp.path().join("train.txt");
    std::fs::write(&split_path, "# train split\nroute_a/segment_0\nroute_b/missing\n")?;
    let source = DirSequenceSource::from_split_file(tmp.path(), &split_path)?;
    assert_eq!(source.len(), 2);
    assert_eq!(source.sequence_length(0)?, 6);
    assert!(matches!(
        source.sequence_length(1),
        Err(DatasetError::AssetUnavailable { .. })
    ));

    let cfg = cfg();
    let transform = FrameTransform::from_config(&cfg);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let sample = load_sample(&source, 0, &cfg, &transform, &mut rng)?;
    assert_eq!(sample.frames.len(), 3 * 6 * (W * H) as usize);
    // Sideways motion along +y stays sideways in the local frame.
    assert_eq!(&sample.labels[3..6], &[0.0, 1.0, 0.0]);
    assert_eq!(SplitList::load(&split_path)?.len(), 2);
    Ok(())
}

#[test]
fn directory_index_is_listed_once_per_sample() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let frames_dir = tmp.path().join("seq/frames");
    std::fs::create_dir_all(&frames_dir)?;
    for i in 0..4u8 {
        RgbImage::from_pixel(W, H, Rgb([i * 10; 3])).save(frames_dir.join(format!("{i:06}.png")))?;
    }
    let records: Vec<PoseRecord> = (0..4)
        .map(|i| PoseRecord::new([i as f64, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]))
        .collect();
    PoseLog::from_records(&records).save(&tmp.path().join("seq/global_pose.json"))?;
    let split_path = tmp.path().join("split.txt");
    std::fs::write(&split_path, "seq\n")?;
    let source = DirSequenceSource::from_split_file(tmp.path(), &split_path)?;

    let (length, poses) = source.load_index(0)?;
    assert_eq!(length, 4);
    assert_eq!(poses.len(), 4);

    // A frame added after indexing sorts second but is not part of this sample.
    RgbImage::from_pixel(W, H, Rgb([255; 3])).save(frames_dir.join("000000a.png"))?;
    let first = source.load_frames(0, 0..2)?;
    assert_eq!(first[1].get_pixel(0, 0), &Rgb([10; 3]));

    // Later reads list the directory again.
    let second = source.load_frames(0, 0..2)?;
    assert_eq!(second[1].get_pixel(0, 0), &Rgb([255; 3]));
    Ok(())
}
