//! 取消令牌与全局资源上限
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 协作式取消：显式 cancel 或超过截止时间
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), deadline: Some(Instant::now() + timeout) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }
}

/// 跨 worker 共享的文件数/字节数上限
#[derive(Debug, Default)]
pub struct Budget {
    max_files: Option<usize>,
    max_bytes: Option<u64>,
    files: AtomicUsize,
    bytes: AtomicU64,
}

impl Budget {
    pub fn new(max_files: Option<usize>, max_bytes: Option<u64>) -> Self {
        Self { max_files, max_bytes, files: AtomicUsize::new(0), bytes: AtomicU64::new(0) }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    /// 申请处理一个大小为 `size` 的文件；超出任一上限则返回 false 且不计数
    pub fn try_take(&self, size: u64) -> bool {
        if let Some(max) = self.max_files {
            let prev = self.files.fetch_add(1, Ordering::Relaxed);
            if prev >= max {
                self.files.fetch_sub(1, Ordering::Relaxed);
                return false;
            }
        } else {
            self.files.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(max) = self.max_bytes {
            let prev = self.bytes.fetch_add(size, Ordering::Relaxed);
            if prev.saturating_add(size) > max {
                self.bytes.fetch_sub(size, Ordering::Relaxed);
                self.files.fetch_sub(1, Ordering::Relaxed);
                return false;
            }
        } else {
            self.bytes.fetch_add(size, Ordering::Relaxed);
        }
        true
    }

    pub fn files_taken(&self) -> usize {
        self.files.load(Ordering::Relaxed)
    }

    pub fn bytes_taken(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_file_ceiling() {
        let b = Budget::new(Some(2), None);
        assert!(b.try_take(10));
        assert!(b.try_take(10));
        assert!(!b.try_take(10));
        assert_eq!(b.files_taken(), 2);
    }

    #[test]
    fn test_budget_byte_ceiling() {
        let b = Budget::new(None, Some(100));
        assert!(b.try_take(60));
        assert!(!b.try_take(60));
        assert!(b.try_take(40));
        assert_eq!(b.bytes_taken(), 100);
        assert_eq!(b.files_taken(), 2);
    }

    #[test]
    fn test_cancel_token() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        let t2 = t.clone();
        t2.cancel();
        assert!(t.is_cancelled());
        assert!(CancelToken::with_timeout(Duration::from_secs(0)).is_cancelled());
    }
}
