mod support;

use std::time::Duration;

use support::fixtures::{CLAIM_LEASE, TierEnv, assert_settled, wait_until};
use tierstore::tiering::{Clock, DemotionError, RecoveryOutcome, demote, recover_stale};
use tierstore::{
    ClaimKind, ClaimOutcome, Codec, PromoteError, ServiceError, StoreError, ZipCodec,
};

const JOB_TIMEOUT: Duration = Duration::from_secs(10);

fn past_lease() -> Duration {
    CLAIM_LEASE + Duration::from_secs(5)
}

#[test]
fn demotion_that_lost_its_claim_leaves_promoted_file_alone() {
    let env = TierEnv::new();
    let service = env.open_service();
    let record = service.ingest(1, "ledger.csv", b"a,b,c").unwrap();
    env.make_cold();
    let ctx = env.context(&service);

    // A demotion claims the file, then stalls past its lease.
    let ClaimOutcome::Claimed {
        record: snapshot,
        token: stale,
    } = service
        .store()
        .try_claim(&record.key, ClaimKind::Demotion, env.clock.now_secs())
    else {
        panic!("expected claim");
    };
    env.clock.advance(past_lease());

    let (reclaimed, token) = service
        .store()
        .reclaim_stale(&record.key, CLAIM_LEASE, env.clock.now_secs())
        .unwrap();
    assert_eq!(
        recover_stale(&ctx, &reclaimed, token).unwrap(),
        RecoveryOutcome::Compressed
    );
    // A reader brings the file back to the raw tier.
    assert_eq!(service.read(&record.key).unwrap(), b"a,b,c");
    assert!(!service.get(&record.key).unwrap().is_compressed);

    // The stalled demotion wakes up with its old token.
    let result = demote(&ctx, &snapshot, stale);
    assert!(matches!(
        result,
        Err(DemotionError::Store(StoreError::ClaimLost(_)))
    ));

    let current = service.get(&record.key).unwrap();
    assert!(!current.is_compressed);
    assert!(current.raw_path.exists());
    assert!(!current.compressed_path.exists());
    assert_settled(&service, &record);
    assert_eq!(service.read(&record.key).unwrap(), b"a,b,c");
}

#[test]
fn promotion_waits_for_in_flight_demotion() {
    let mut env = TierEnv::new();
    env.config.tiering.promotion_wait_ms = 5_000;
    let service = env.open_service();
    let record = service.ingest(2, "scan.tiff", b"pixels").unwrap();
    env.make_cold();
    env.codec.close_gate();

    assert_eq!(service.scan_once().unwrap().claimed, 1);
    assert!(wait_until(JOB_TIMEOUT, || env.codec.entered() == 1));

    let promoted = std::thread::scope(|scope| {
        let reader = scope.spawn(|| service.open_for_read(&record.key));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished(), "promotion did not wait for the demotion");
        env.codec.open_gate();
        reader.join().unwrap()
    })
    .unwrap();

    assert!(!promoted.is_compressed);
    assert!(promoted.claim.is_none());
    assert!(service.wait_for_jobs(JOB_TIMEOUT));
    assert_settled(&service, &record);
    assert_eq!(env.codec.packs(), 1);
    assert_eq!(std::fs::read(&promoted.raw_path).unwrap(), b"pixels");
}

#[test]
fn promotion_reports_busy_when_demotion_outlasts_wait() {
    let env = TierEnv::new();
    let service = env.open_service();
    let record = service.ingest(2, "slow.bin", b"held").unwrap();
    env.make_cold();
    env.codec.close_gate();

    assert_eq!(service.scan_once().unwrap().claimed, 1);
    assert!(wait_until(JOB_TIMEOUT, || env.codec.entered() == 1));
    let err = service.open_for_read(&record.key).unwrap_err();
    match err {
        ServiceError::Promote(PromoteError::Busy { key, kind }) => {
            assert_eq!(key, record.key);
            assert_eq!(kind, ClaimKind::Demotion.as_str());
        }
        other => panic!("unexpected error: {other}"),
    }

    env.codec.open_gate();
    assert!(service.wait_for_jobs(JOB_TIMEOUT));
    assert!(service.get(&record.key).unwrap().is_compressed);
    assert_settled(&service, &record);
}

#[test]
fn stale_promotion_with_restored_raw_copy_finishes_as_raw() {
    let env = TierEnv::new();
    let service = env.open_service();
    let record = service.ingest(3, "album.flac", b"lossless").unwrap();
    env.make_cold();
    service.scan_once().unwrap();
    assert!(service.wait_for_jobs(JOB_TIMEOUT));
    let cold = service.get(&record.key).unwrap();
    assert!(cold.is_compressed);

    let ClaimOutcome::Claimed { .. } =
        service
            .store()
            .try_claim(&record.key, ClaimKind::Promotion, env.clock.now_secs())
    else {
        panic!("expected claim");
    };
    // The promotion wrote the raw copy, then died before removing the artifact.
    std::fs::write(&record.raw_path, b"lossless").unwrap();
    env.clock.advance(past_lease());

    assert_eq!(service.scan_once().unwrap().reclaimed, 1);
    assert!(service.wait_for_jobs(JOB_TIMEOUT));

    let restored = service.get(&record.key).unwrap();
    assert!(!restored.is_compressed);
    assert_eq!(restored.last_modified_time, cold.last_modified_time);
    assert_settled(&service, &record);
    assert_eq!(service.read(&record.key).unwrap(), b"lossless");
}

#[test]
fn stale_promotion_without_raw_copy_releases_claim() {
    let env = TierEnv::new();
    let service = env.open_service();
    let record = service.ingest(3, "notes.org", b"* todo").unwrap();
    env.make_cold();
    service.scan_once().unwrap();
    assert!(service.wait_for_jobs(JOB_TIMEOUT));

    let ClaimOutcome::Claimed { .. } =
        service
            .store()
            .try_claim(&record.key, ClaimKind::Promotion, env.clock.now_secs())
    else {
        panic!("expected claim");
    };
    env.clock.advance(past_lease());
    let (stale, token) = service
        .store()
        .reclaim_stale(&record.key, CLAIM_LEASE, env.clock.now_secs())
        .unwrap();

    let outcome = recover_stale(&env.context(&service), &stale, token).unwrap();
    assert_eq!(outcome, RecoveryOutcome::Released);
    assert!(service.get(&record.key).unwrap().is_compressed);
    assert_settled(&service, &record);
    assert_eq!(service.read(&record.key).unwrap(), b"* todo");
}

#[test]
fn stale_ingest_adopts_new_raw_content() {
    let env = TierEnv::new();
    let service = env.open_service();
    let record = service.ingest(4, "config.ini", b"version one").unwrap();
    env.make_cold();
    service.scan_once().unwrap();
    assert!(service.wait_for_jobs(JOB_TIMEOUT));
    assert!(service.get(&record.key).unwrap().is_compressed);

    let ClaimOutcome::Claimed { .. } =
        service
            .store()
            .try_claim(&record.key, ClaimKind::Ingest, env.clock.now_secs())
    else {
        panic!("expected claim");
    };
    // The upload landed but the ingest never cleaned up or completed.
    std::fs::write(&record.raw_path, b"v2").unwrap();
    env.clock.advance(past_lease());

    assert_eq!(service.scan_once().unwrap().reclaimed, 1);
    assert!(service.wait_for_jobs(JOB_TIMEOUT));

    let current = service.get(&record.key).unwrap();
    assert!(!current.is_compressed);
    assert_eq!(current.size, 2);
    assert_settled(&service, &record);
    assert_eq!(service.read(&record.key).unwrap(), b"v2");
}

#[test]
fn stale_demotion_with_both_artifacts_finishes_as_compressed() {
    let env = TierEnv::new();
    let service = env.open_service();
    let content = b"archived minutes".to_vec();
    let record = service.ingest(5, "minutes.txt", &content).unwrap();

    let ClaimOutcome::Claimed { .. } =
        service
            .store()
            .try_claim(&record.key, ClaimKind::Demotion, env.clock.now_secs())
    else {
        panic!("expected claim");
    };
    // The artifact is durable; the raw delete never happened.
    std::fs::create_dir_all(record.compressed_path.parent().unwrap()).unwrap();
    let packed = ZipCodec::default().pack(&content).unwrap();
    std::fs::write(&record.compressed_path, packed).unwrap();
    env.clock.advance(past_lease());

    assert_eq!(service.scan_once().unwrap().reclaimed, 1);
    assert!(service.wait_for_jobs(JOB_TIMEOUT));

    assert!(service.get(&record.key).unwrap().is_compressed);
    assert_settled(&service, &record);
    assert_eq!(env.codec.packs(), 0);
    assert_eq!(service.read(&record.key).unwrap(), content);
}
