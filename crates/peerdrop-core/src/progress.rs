//! 传输进度
//!
//! 纯派生视图：`percent = 已处理块数 / 总块数 * 100`。
//! 同一次传输内只增不减，只有新传输的第一个块才会重置。

/// 某一时刻的进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    pub chunks_done: u32,
    pub total_chunks: u32,
    pub bytes_done: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        f64::from(self.chunks_done) / f64::from(self.total_chunks) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.chunks_done == self.total_chunks
    }
}

/// 进度跟踪器
#[derive(Debug, Default)]
pub struct ProgressTracker {
    current: Option<TransferProgress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新传输开始
    pub fn start(&mut self, total_chunks: u32, total_bytes: u64) -> TransferProgress {
        let progress = TransferProgress {
            chunks_done: 0,
            total_chunks,
            bytes_done: 0,
            total_bytes,
        };
        self.current = Some(progress);
        progress
    }

    /// 记录一个已接受的块
    ///
    /// 超过总块数的调用不会让进度继续增长。
    pub fn advance(&mut self, chunk_len: usize) -> Option<TransferProgress> {
        let progress = self.current.as_mut()?;
        if progress.chunks_done < progress.total_chunks {
            progress.chunks_done += 1;
            progress.bytes_done += chunk_len as u64;
        }
        Some(*progress)
    }

    pub fn current(&self) -> Option<TransferProgress> {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// 人类可读的大小
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size = bytes as f64;
    if size < KB {
        format!("{} B", bytes)
    } else if size < MB {
        format!("{:.1} KB", size / KB)
    } else if size < GB {
        format!("{:.1} MB", size / MB)
    } else {
        format!("{:.1} GB", size / GB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_monotonic_and_reaches_100() {
        let mut tracker = ProgressTracker::new();
        tracker.start(4, 200_000);

        let mut last = 0.0;
        for _ in 0..4 {
            let p = tracker.advance(65_536).unwrap();
            assert!(p.percent() >= last);
            last = p.percent();
        }
        assert_eq!(last, 100.0);
        assert!(tracker.current().unwrap().is_complete());

        // 多余的块不会超过 100%
        let p = tracker.advance(1).unwrap();
        assert_eq!(p.percent(), 100.0);
        assert_eq!(p.chunks_done, 4);
    }

    #[test]
    fn test_advance_without_start() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.advance(10).is_none());
    }

    #[test]
    fn test_restart_resets() {
        let mut tracker = ProgressTracker::new();
        tracker.start(2, 10);
        tracker.advance(5);
        let p = tracker.start(3, 30);
        assert_eq!(p.chunks_done, 0);
        assert_eq!(p.percent(), 0.0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(200_000), "195.3 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
