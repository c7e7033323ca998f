//! 전송 통계

use std::time::{Duration, Instant};

/// 단일 파일 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 예상 전체 바이트 (알 수 없으면 None)
    pub expected_bytes: Option<u64>,

    /// 총 전송 바이트
    pub total_bytes: u64,

    /// 총 청크 수
    pub total_chunks: u64,

    /// 마지막으로 보고한 진행률
    last_percent: Option<u8>,

    /// 본문 CRC32
    hasher: crc32fast::Hasher,
}

impl TransferStats {
    pub fn new(expected_bytes: Option<u64>) -> Self {
        Self {
            start_time: Instant::now(),
            expected_bytes,
            total_bytes: 0,
            total_chunks: 0,
            last_percent: None,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// 청크 기록
    pub fn record_chunk(&mut self, data: &[u8]) {
        self.total_chunks += 1;
        self.total_bytes += data.len() as u64;
        self.hasher.update(data);
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 진행률 (0~100), 예상 크기를 모르면 None
    pub fn progress_percent(&self) -> Option<u8> {
        let expected = self.expected_bytes?;
        if expected == 0 {
            return Some(100);
        }
        let percent = (self.total_bytes.min(expected) * 100) / expected;
        Some(percent as u8)
    }

    /// 진행률이 바뀌었을 때만 반환
    pub fn take_progress(&mut self) -> Option<u8> {
        let percent = self.progress_percent()?;
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(percent)
    }

    /// 지금까지의 CRC32
    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 처리율 (Mbps)
    pub fn throughput_mbps(&self) -> f64 {
        self.throughput() * 8.0 / 1_000_000.0
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {} | Chunks: {} | Throughput: {:.2} Mbps | CRC32: {:08X}",
            self.elapsed().as_secs_f64(),
            self.total_bytes,
            self.total_chunks,
            self.throughput_mbps(),
            self.crc32(),
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(None)
    }
}
