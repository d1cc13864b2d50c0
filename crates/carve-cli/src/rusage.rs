//! getrusage-backed platform probe.

use carve_engine::{PlatformProbe, ResourceUsage};

/// Samples `getrusage(RUSAGE_SELF)` before and after a run.
pub struct RusageProbe;

#[cfg(unix)]
impl PlatformProbe for RusageProbe {
    fn snapshot(&self) -> Option<ResourceUsage> {
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
        if rc != 0 {
            return None;
        }

        fn timeval_nsecs(tv: libc::timeval) -> i64 {
            tv.tv_sec as i64 * 1_000_000_000 + tv.tv_usec as i64 * 1_000
        }

        // everywhere but mac, maxrss is KiB
        let maxrss_scale = if cfg!(target_os = "macos") { 1 } else { 1024 };

        Some(ResourceUsage {
            cpu_user_nsecs: timeval_nsecs(usage.ru_utime),
            cpu_sys_nsecs: timeval_nsecs(usage.ru_stime),
            max_rss_bytes: usage.ru_maxrss as i64 * maxrss_scale,
            min_flt: usage.ru_minflt as i64,
            maj_flt: usage.ru_majflt as i64,
            bio_read: usage.ru_inblock as i64,
            bio_write: usage.ru_oublock as i64,
            sigs: usage.ru_nsignals as i64,
            ctx_sw_yield: usage.ru_nvcsw as i64,
            ctx_sw_forced: usage.ru_nivcsw as i64,
        })
    }
}

#[cfg(not(unix))]
impl PlatformProbe for RusageProbe {
    fn snapshot(&self) -> Option<ResourceUsage> {
        None
    }
}

/// The system page size, for the summary's context block.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    4096
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reports_something() {
        let usage = RusageProbe.snapshot().expect("rusage must be available");
        assert!(usage.cpu_user_nsecs >= 0);
        assert!(usage.max_rss_bytes > 0);
    }

    #[test]
    fn test_page_size_sane() {
        let size = page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }
}
