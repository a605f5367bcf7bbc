use data_contracts::{ContractError, PoseLog, PoseRecord, SplitList};

fn identity_log(n: usize) -> PoseLog {
    let records: Vec<PoseRecord> = (0..n)
        .map(|i| PoseRecord::new([i as f64, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]))
        .collect();
    PoseLog::from_records(&records)
}

#[test]
fn valid_log_passes() {
    let log = identity_log(4);
    assert_eq!(log.len(), 4);
    assert!(log.validate().is_ok());
    assert_eq!(log.records().count(), 4);
}

#[test]
fn mismatched_lengths_rejected() {
    let mut log = identity_log(3);
    log.frame_orientations.pop();
    let err = log.validate().unwrap_err();
    assert!(matches!(
        err,
        ContractError::LengthMismatch {
            positions: 3,
            orientations: 2
        }
    ));
}

#[test]
fn non_unit_quaternion_rejected() {
    let mut log = identity_log(3);
    log.frame_orientations[1] = [2.0, 0.0, 0.0, 0.0];
    let err = log.validate().unwrap_err();
    assert!(matches!(err, ContractError::NonUnitQuaternion { frame: 1, .. }));
}

#[test]
fn nan_position_rejected() {
    let mut log = identity_log(3);
    log.frame_positions[2][1] = f64::NAN;
    assert!(matches!(
        log.validate().unwrap_err(),
        ContractError::NonFinite { frame: 2 }
    ));
}

#[test]
fn pose_log_roundtrips_through_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("global_pose.json");
    let log = identity_log(5);
    log.save(&path).unwrap();
    let loaded = PoseLog::load(&path).unwrap();
    assert_eq!(loaded.frame_positions, log.frame_positions);
    assert!(matches!(
        PoseLog::load(&tmp.path().join("missing.json")).unwrap_err(),
        ContractError::Io { .. }
    ));
}

#[test]
fn split_list_skips_blank_and_comment_lines() {
    let split = SplitList::parse("# comment\nchunk_1/route_a/3\n\n  chunk_2/route_b/7  \n");
    assert_eq!(split.entries, vec!["chunk_1/route_a/3", "chunk_2/route_b/7"]);
}
