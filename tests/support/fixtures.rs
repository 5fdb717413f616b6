use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tempfile::TempDir;
use tierstore::config::TierConfig;
use tierstore::tiering::{ManualClock, TierContext};
use tierstore::{Codec, CodecError, FileRecord, LocalStorage, TierService, ZipCodec};

pub const HOT_THRESHOLD: Duration = Duration::from_secs(3_600);
pub const CLAIM_LEASE: Duration = Duration::from_secs(60);
const GATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Zip codec whose `pack` can be held at a gate or made to fail.
pub struct TestCodec {
    inner: ZipCodec,
    open: Mutex<bool>,
    opened: Condvar,
    failing: AtomicBool,
    entered: AtomicUsize,
    packs: AtomicUsize,
}

impl TestCodec {
    pub fn new() -> Self {
        Self {
            inner: ZipCodec::default(),
            open: Mutex::new(true),
            opened: Condvar::new(),
            failing: AtomicBool::new(false),
            entered: AtomicUsize::new(0),
            packs: AtomicUsize::new(0),
        }
    }

    pub fn close_gate(&self) {
        *self.open.lock().unwrap() = false;
    }

    pub fn open_gate(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls that reached `pack`, including ones still held at the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Successful packs.
    pub fn packs(&self) -> usize {
        self.packs.load(Ordering::SeqCst)
    }

    fn wait_for_gate(&self) {
        let deadline = Instant::now() + GATE_TIMEOUT;
        let mut open = self.open.lock().unwrap();
        while !*open {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            open = self.opened.wait_timeout(open, deadline - now).unwrap().0;
        }
    }
}

impl Codec for TestCodec {
    fn pack(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.wait_for_gate();
        if self.failing.load(Ordering::SeqCst) {
            return Err(CodecError::Archive("injected pack failure".into()));
        }
        let packed = self.inner.pack(data)?;
        self.packs.fetch_add(1, Ordering::SeqCst);
        Ok(packed)
    }

    fn unpack(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.inner.unpack(data)
    }
}

/// Temporary storage roots plus the injectable collaborators of a service.
pub struct TierEnv {
    pub temp: TempDir,
    pub config: TierConfig,
    pub clock: Arc<ManualClock>,
    pub codec: Arc<TestCodec>,
}

impl TierEnv {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create tempdir");
        let mut config = TierConfig::default();
        config.storage.raw_dir = temp.path().join("backup");
        config.storage.compressed_dir = temp.path().join("pack");
        config.storage.metadata_file = temp.path().join("meta").join("metadata.json");
        config.tiering.hot_threshold_secs = HOT_THRESHOLD.as_secs();
        config.tiering.scan_interval_ms = 20;
        config.tiering.idle_backoff_max_ms = 100;
        config.tiering.claim_lease_secs = CLAIM_LEASE.as_secs();
        config.tiering.promotion_wait_ms = 200;
        config.workers.count = 2;
        config.workers.queue_capacity = 16;
        config.persistence.compact_after = 4;
        config.logging.directory = Some(temp.path().join("logs"));
        Self {
            temp,
            config,
            clock: Arc::new(ManualClock::new(SystemTime::now())),
            codec: Arc::new(TestCodec::new()),
        }
    }

    pub fn open_service(&self) -> TierService {
        TierService::open_with(
            &self.config,
            Arc::new(LocalStorage::new()),
            self.codec.clone(),
            self.clock.clone(),
        )
        .expect("open service")
    }

    /// Collaborators of `service`, for driving tiering jobs directly.
    pub fn context(&self, service: &TierService) -> TierContext {
        TierContext {
            store: service.store().clone(),
            storage: Arc::new(LocalStorage::new()),
            codec: self.codec.clone(),
            clock: self.clock.clone(),
            settings: service.config().tiering.clone(),
        }
    }

    /// Move the clock far enough ahead that every file written so far is cold.
    pub fn make_cold(&self) {
        self.clock
            .set(SystemTime::now() + HOT_THRESHOLD + Duration::from_secs(3_600));
    }

    pub fn make_hot(&self) {
        self.clock.set(SystemTime::now());
    }
}

/// The record is unclaimed and exactly the artifact its flag names exists.
pub fn assert_settled(service: &TierService, record: &FileRecord) {
    let record = service.get(&record.key).expect("record exists");
    assert!(record.claim.is_none(), "{} still claimed", record.key);
    if record.is_compressed {
        assert!(record.compressed_path.exists(), "{} lost its artifact", record.key);
        assert!(!record.raw_path.exists(), "{} kept its raw copy", record.key);
    } else {
        assert!(record.raw_path.exists(), "{} lost its raw copy", record.key);
        assert!(!record.compressed_path.exists(), "{} kept its artifact", record.key);
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}
