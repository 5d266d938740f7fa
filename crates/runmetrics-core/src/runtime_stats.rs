//! Process statistics reported as self-metrics.
//!
//! Allocation figures come from [`TrackingAllocator`], which a binary
//! installs as its `#[global_allocator]`. Without it those gauges read 0.
//! Resource usage comes from `getrusage(RUSAGE_SELF)`.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Gauge, MetricEnvelope};

/// Counter incremented once per capture.
pub const POLL_COUNT: &str = "PollCount";

/// Gauge holding a fresh uniform sample in `[0, 1)` on every capture.
pub const RANDOM_VALUE: &str = "RandomValue";

static GLOBAL: AllocCounters = AllocCounters::new();

struct AllocCounters {
    allocs: AtomicU64,
    frees: AtomicU64,
    bytes_allocated: AtomicU64,
    current_live: AtomicU64,
    peak_live: AtomicU64,
}

impl AllocCounters {
    const fn new() -> Self {
        Self {
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            current_live: AtomicU64::new(0),
            peak_live: AtomicU64::new(0),
        }
    }

    fn on_alloc(&self, size: u64) {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(size, Ordering::Relaxed);
        let current = self.current_live.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_live.fetch_max(current, Ordering::Relaxed);
    }

    fn on_dealloc(&self, size: u64) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.current_live.fetch_sub(size, Ordering::Relaxed);
    }
}

/// Counts allocations while delegating to the system allocator.
///
/// Relaxed ordering is enough: readers only need a recent value.
pub struct TrackingAllocator;

impl TrackingAllocator {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: every call is forwarded to `System` with the same arguments; the
// only extra work is atomic bookkeeping, which cannot touch the memory.
unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: same layout as requested by the caller.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            GLOBAL.on_alloc(layout.size() as u64);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: same layout as requested by the caller.
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            GLOBAL.on_alloc(layout.size() as u64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        GLOBAL.on_dealloc(layout.size() as u64);
        // SAFETY: ptr was returned by `System` for this layout.
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: ptr was returned by `System` for this layout.
        let result = unsafe { System.realloc(ptr, layout, new_size) };
        if !result.is_null() {
            GLOBAL.on_dealloc(layout.size() as u64);
            GLOBAL.on_alloc(new_size as u64);
        }
        result
    }
}

/// One reading of process statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuntimeStats {
    /// Bytes currently allocated.
    pub alloc_bytes: u64,
    /// Cumulative bytes allocated.
    pub total_alloc_bytes: u64,
    pub mallocs: u64,
    pub frees: u64,
    pub peak_alloc_bytes: u64,
    /// Maximum resident set size in bytes.
    pub max_rss_bytes: u64,
    pub cpu_user_ns: u64,
    pub cpu_sys_ns: u64,
    pub minor_faults: u64,
    pub major_faults: u64,
    pub voluntary_ctx_switches: u64,
    pub involuntary_ctx_switches: u64,
}

impl RuntimeStats {
    pub fn read() -> Self {
        let mut stats = Self {
            alloc_bytes: GLOBAL.current_live.load(Ordering::Relaxed),
            total_alloc_bytes: GLOBAL.bytes_allocated.load(Ordering::Relaxed),
            mallocs: GLOBAL.allocs.load(Ordering::Relaxed),
            frees: GLOBAL.frees.load(Ordering::Relaxed),
            peak_alloc_bytes: GLOBAL.peak_live.load(Ordering::Relaxed),
            ..Default::default()
        };
        read_rusage(&mut stats);
        stats
    }

    /// Live allocations (mallocs not yet freed).
    pub fn heap_objects(&self) -> u64 {
        self.mallocs.saturating_sub(self.frees)
    }

    /// The fixed set of gauges written on every capture.
    pub fn gauges(&self) -> Vec<(&'static str, Gauge)> {
        vec![
            ("Alloc", self.alloc_bytes as Gauge),
            ("HeapAlloc", self.alloc_bytes as Gauge),
            ("TotalAlloc", self.total_alloc_bytes as Gauge),
            ("Mallocs", self.mallocs as Gauge),
            ("Frees", self.frees as Gauge),
            ("HeapObjects", self.heap_objects() as Gauge),
            ("PeakAlloc", self.peak_alloc_bytes as Gauge),
            ("Sys", self.max_rss_bytes as Gauge),
            ("CPUUserNs", self.cpu_user_ns as Gauge),
            ("CPUSysNs", self.cpu_sys_ns as Gauge),
            ("MinorFaults", self.minor_faults as Gauge),
            ("MajorFaults", self.major_faults as Gauge),
            ("VoluntaryCtxSwitches", self.voluntary_ctx_switches as Gauge),
            ("InvoluntaryCtxSwitches", self.involuntary_ctx_switches as Gauge),
        ]
    }

    /// The update batch for one capture: every gauge, a random sample,
    /// and a single poll-count increment.
    pub fn capture_batch(&self) -> Vec<MetricEnvelope> {
        let mut batch: Vec<MetricEnvelope> = self
            .gauges()
            .into_iter()
            .map(|(name, value)| MetricEnvelope::gauge(name, value))
            .collect();
        batch.push(MetricEnvelope::gauge(RANDOM_VALUE, rand::random::<f64>()));
        batch.push(MetricEnvelope::counter(POLL_COUNT, 1));
        batch
    }
}

#[cfg(unix)]
fn read_rusage(stats: &mut RuntimeStats) {
    // SAFETY: rusage is plain old data, so all-zero bytes are a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: `usage` is a live, exclusively borrowed rusage for the whole
    // call, and RUSAGE_SELF is a valid `who`. On failure it is left zeroed.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return;
    }

    let timeval_ns = |tv: libc::timeval| -> u64 {
        (tv.tv_sec.max(0) as u64) * 1_000_000_000 + (tv.tv_usec.max(0) as u64) * 1_000
    };

    // ru_maxrss is KiB on Linux, bytes on macOS.
    let rss_unit: u64 = if cfg!(target_os = "macos") { 1 } else { 1024 };

    stats.max_rss_bytes = (usage.ru_maxrss.max(0) as u64) * rss_unit;
    stats.cpu_user_ns = timeval_ns(usage.ru_utime);
    stats.cpu_sys_ns = timeval_ns(usage.ru_stime);
    stats.minor_faults = usage.ru_minflt.max(0) as u64;
    stats.major_faults = usage.ru_majflt.max(0) as u64;
    stats.voluntary_ctx_switches = usage.ru_nvcsw.max(0) as u64;
    stats.involuntary_ctx_switches = usage.ru_nivcsw.max(0) as u64;
}

#[cfg(not(unix))]
fn read_rusage(_stats: &mut RuntimeStats) {}
