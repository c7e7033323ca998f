//! 전송 시간 추정
//!
//! time = (bytes * 8) / (병목 Mbps * 1e6) + (누적 지연 ms / 1000)
//!
//! 전송 시간 + 누적 전파 지연의 단순 합산 근사.

use std::fmt;
use std::time::Duration;

use crate::route::Route;

/// 전송 시간 추정값
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    /// 초 단위 추정
    Bounded(f64),
    /// 대역폭/지연을 알 수 없는 구간 존재
    Unbounded,
}

impl Estimate {
    pub fn as_secs(&self) -> Option<f64> {
        match self {
            Estimate::Bounded(secs) => Some(*secs),
            Estimate::Unbounded => None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Estimate::Bounded(_))
    }

    pub fn as_duration(&self) -> Option<Duration> {
        self.as_secs().map(Duration::from_secs_f64)
    }

    /// 진행률 표시용 균등 시간 구간 길이
    pub fn slice(&self, slices: u32) -> Option<Duration> {
        if slices == 0 {
            return None;
        }
        self.as_duration().map(|d| d / slices)
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimate::Bounded(secs) => write!(f, "{:.2} s", secs),
            Estimate::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// 경로와 파일 크기로 전송 시간 추정
pub fn estimate(route: &Route, file_size_bytes: u64) -> Estimate {
    let (Some(bottleneck), Some(latency_ms)) = (route.bottleneck_mbps(), route.total_latency_ms())
    else {
        return Estimate::Unbounded;
    };
    if bottleneck <= 0.0 || !bottleneck.is_finite() {
        return Estimate::Unbounded;
    }

    let transmission = (file_size_bytes as f64 * 8.0) / (bottleneck * 1e6);
    Estimate::Bounded(transmission + latency_ms / 1000.0)
}
