//! 지연 측정 (Metrics Probe)
//!
//! - ping 에코 요청 N회 후 평균 RTT 파싱
//! - Windows (영어/스페인어) 및 Unix 요약 형식 지원
//! - 실패 처리 정책(간선 제외, 대체값)은 호출측 책임

use std::collections::HashMap;
use std::future::Future;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::{Config, Error, Result};

/// 지연 측정기
pub trait LatencyProbe: Send + Sync {
    /// 주소까지의 평균 RTT (ms)
    fn measure_latency(&self, address: &str) -> impl Future<Output = Result<f64>> + Send;
}

/// 시스템 `ping` 기반 측정기
#[derive(Debug, Clone)]
pub struct PingProbe {
    count: u32,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(count: u32, timeout: Duration) -> Self {
        Self {
            count: count.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.probe_count,
            Duration::from_millis(config.probe_timeout_ms),
        )
    }

    fn command(&self, address: &str) -> Command {
        let mut cmd = Command::new("ping");
        // Windows: -n, 그 외: -c
        cmd.arg(if cfg!(windows) { "-n" } else { "-c" })
            .arg(self.count.to_string())
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LatencyProbe for PingProbe {
    async fn measure_latency(&self, address: &str) -> Result<f64> {
        debug!("ping {} (x{})", address, self.count);

        let output = match tokio::time::timeout(self.timeout, self.command(address).output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(probe_failure(address, format!("ping 실행 실패: {}", e))),
            Err(_) => {
                return Err(probe_failure(
                    address,
                    format!("타임아웃 ({}ms)", self.timeout.as_millis()),
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_average_latency(&stdout) {
            Some(latency) => {
                debug!("ping {}: 평균 {:.2}ms", address, latency);
                Ok(latency)
            }
            None => Err(probe_failure(
                address,
                format!("평균 RTT 파싱 실패 ({})", output.status),
            )),
        }
    }
}

/// 고정 측정값 (오프라인 모드, 테스트)
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    latencies: HashMap<String, f64>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: impl Into<String>, latency_ms: f64) -> Self {
        self.latencies.insert(address.into(), latency_ms);
        self
    }
}

impl LatencyProbe for StaticProbe {
    async fn measure_latency(&self, address: &str) -> Result<f64> {
        self.latencies
            .get(address)
            .copied()
            .ok_or_else(|| probe_failure(address, "측정값 없음".into()))
    }
}

fn probe_failure(address: &str, reason: String) -> Error {
    Error::ProbeFailure {
        address: address.to_string(),
        reason,
    }
}

fn unix_summary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:rtt|round-trip)\s+min/avg/max(?:/\w+)?\s*=\s*[\d.,]+/([\d.,]+)/")
            .expect("unix ping summary regex")
    })
}

fn windows_summary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:average|promedio|media)[^\d]*(\d+(?:[.,]\d+)?)\s*ms")
            .expect("windows ping summary regex")
    })
}

/// ping 출력에서 평균 RTT (ms) 추출
pub fn parse_average_latency(output: &str) -> Option<f64> {
    let captures = unix_summary()
        .captures(output)
        .or_else(|| windows_summary().captures(output))?;

    captures[1].replace(',', ".").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const WINDOWS_EN: &str = "\
Pinging 25.59.204.21 with 32 bytes of data:
Reply from 25.59.204.21: bytes=32 time=12ms TTL=128

Ping statistics for 25.59.204.21:
    Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),
Approximate round trip times in milli-seconds:
    Minimum = 10ms, Maximum = 14ms, Average = 12ms
";

    const WINDOWS_ES: &str = "\
Estadísticas de ping para 25.59.204.21:
    Paquetes: enviados = 4, recibidos = 4, perdidos = 0
Tiempos aproximados de ida y vuelta en milisegundos:
    Mínimo = 15ms, Máximo = 21ms, Media = 17ms
";

    const LINUX: &str = "\
--- 127.0.0.1 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3055ms
rtt min/avg/max/mdev = 0.031/0.047/0.061/0.011 ms
";

    const MACOS: &str = "\
--- 127.0.0.1 ping statistics ---
4 packets transmitted, 4 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 0.052/0.104/0.161/0.041 ms
";

    #[test]
    fn test_parse_windows_english() {
        assert_eq!(parse_average_latency(WINDOWS_EN), Some(12.0));
    }

    #[test]
    fn test_parse_windows_spanish() {
        assert_eq!(parse_average_latency(WINDOWS_ES), Some(17.0));
        assert_eq!(
            parse_average_latency("Mínimo = 1ms, Máximo = 3ms, Promedio = 2ms"),
            Some(2.0)
        );
    }

    #[test]
    fn test_parse_unix() {
        assert_eq!(parse_average_latency(LINUX), Some(0.047));
        assert_eq!(parse_average_latency(MACOS), Some(0.104));
        assert_eq!(
            parse_average_latency("rtt min/avg/max/mdev = 1,5/2,5/3,5/0,1 ms"),
            Some(2.5)
        );
    }

    #[test]
    fn test_parse_failure() {
        assert_eq!(parse_average_latency(""), None);
        assert_eq!(
            parse_average_latency("ping: unknown host nowhere.invalid"),
            None
        );
        assert_eq!(
            parse_average_latency("Request timed out.\nRequest timed out.\n"),
            None
        );
    }

    #[tokio::test]
    async fn test_static_probe() {
        let probe = StaticProbe::new().with("10.0.0.1", 7.5);

        assert_eq!(probe.measure_latency("10.0.0.1").await.unwrap(), 7.5);

        let err = probe.measure_latency("10.0.0.2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Probe);
    }

    #[tokio::test]
    async fn test_ping_invalid_address_fails() {
        let probe = PingProbe::new(1, Duration::from_secs(3));
        let err = probe.measure_latency("256.256.256.256").await.unwrap_err();
        assert!(matches!(err, Error::ProbeFailure { .. }));
    }
}
