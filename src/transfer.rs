//! 송신측 (클라이언트)
//!
//! 와이어 포맷:
//! 1. 파일 기본 이름 (UTF-8) + `\n`
//! 2. 원시 바이트, `chunk_size` 단위로 전송
//! 3. 연결 종료 = 파일 끝
//!
//! 길이 필드, 체크섬, 응답은 없음.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::events::{emit, EventSender, TransferEvent};
use crate::stats::TransferStats;
use crate::{Config, Error, Result, Stage, NAME_DELIMITER};

/// 성공한 전송 결과
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    /// 와이어로 보낸 파일 이름
    pub file_name: String,

    /// 목적지 (주소:포트)
    pub destination: String,

    pub bytes: u64,
    pub chunks: u64,
    pub elapsed: Duration,

    /// 본문 CRC32 (로그용, 와이어에는 없음)
    pub crc32: u32,
}

/// 성공/실패와 관계없이 항상 만들어지는 전송 결과
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub file_name: String,
    pub success: bool,
    pub message: String,
    pub elapsed: Duration,
    pub bytes: u64,

    /// 실패한 프로토콜 단계 (연결 에러인 경우)
    pub stage: Option<Stage>,
}

impl TransferOutcome {
    fn completed(report: &TransferReport, elapsed: Duration) -> Self {
        Self {
            file_name: report.file_name.clone(),
            success: true,
            message: format!(
                "'{}' -> {} 전송 완료 ({} bytes)",
                report.file_name, report.destination, report.bytes
            ),
            elapsed,
            bytes: report.bytes,
            stage: None,
        }
    }

    /// I/O 이전 또는 도중 실패
    pub fn aborted(file_name: impl Into<String>, error: &Error, elapsed: Duration) -> Self {
        Self {
            file_name: file_name.into(),
            success: false,
            message: error.to_string(),
            elapsed,
            bytes: 0,
            stage: error.stage(),
        }
    }

    /// 전송 태스크가 결과 없이 끝남 (panic, 취소)
    pub fn task_failed(file_name: impl Into<String>, error: &JoinError) -> Self {
        Self {
            file_name: file_name.into(),
            success: false,
            message: format!("전송 태스크 비정상 종료: {}", error),
            elapsed: Duration::ZERO,
            bytes: 0,
            stage: None,
        }
    }

    /// 경과 시간 (초)
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// 경로에서 와이어용 기본 이름 추출
pub fn wire_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?;

    if name.as_bytes().contains(&NAME_DELIMITER) || name.trim().is_empty() {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    Ok(name.to_string())
}

/// 버퍼를 최대한 채워 읽기 (EOF에서만 짧은 청크)
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

async fn connect(address: &str, config: &Config) -> Result<TcpStream> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    match tokio::time::timeout(timeout, TcpStream::connect((address, config.port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::connection(Stage::Connect, e)),
        Err(_) => Err(Error::connection(
            Stage::Connect,
            io::Error::new(io::ErrorKind::TimedOut, "연결 타임아웃"),
        )),
    }
}

/// 파일 하나를 목적지로 직접 전송
///
/// 원본 파일을 먼저 열어서 로컬 에러는 연결 전에 보고.
pub async fn send_file(
    address: &str,
    config: &Config,
    path: &Path,
    events: Option<&EventSender>,
) -> Result<TransferReport> {
    let file_name = wire_name(path)?;

    let mut file = File::open(path)
        .await
        .map_err(|e| Error::storage(path, e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| Error::storage(path, e))?
        .len();

    let destination = format!("{}:{}", address, config.port);
    debug!("연결 시도: {}", destination);
    let mut stream = connect(address, config).await?;
    let _ = stream.set_nodelay(true);

    info!("Sending '{}' ({} bytes) to {}", file_name, size, destination);
    emit(
        events,
        TransferEvent::Started {
            file: file_name.clone(),
            destination: destination.clone(),
        },
    );

    let mut header = Vec::with_capacity(file_name.len() + 1);
    header.extend_from_slice(file_name.as_bytes());
    header.push(NAME_DELIMITER);
    stream
        .write_all(&header)
        .await
        .map_err(|e| Error::connection(Stage::SendName, e))?;

    let mut stats = TransferStats::new(Some(size));
    let mut buf = vec![0u8; config.chunk_size.max(1)];
    loop {
        let n = read_chunk(&mut file, &mut buf)
            .await
            .map_err(|e| Error::storage(path, e))?;
        if n == 0 {
            break;
        }

        stream
            .write_all(&buf[..n])
            .await
            .map_err(|e| Error::connection(Stage::SendBody, e))?;
        stats.record_chunk(&buf[..n]);

        if let Some(percent) = stats.take_progress() {
            emit(
                events,
                TransferEvent::Progress {
                    file: file_name.clone(),
                    percent,
                },
            );
        }
    }

    // FIN = 파일 끝
    stream
        .shutdown()
        .await
        .map_err(|e| Error::connection(Stage::SendBody, e))?;

    if stats.total_bytes != size {
        warn!(
            "'{}' 전송 중 파일 크기 변경: {} -> {} bytes",
            file_name, size, stats.total_bytes
        );
    }
    info!("'{}' sent | {}", file_name, stats.summary());

    Ok(TransferReport {
        file_name,
        destination,
        bytes: stats.total_bytes,
        chunks: stats.total_chunks,
        elapsed: stats.elapsed(),
        crc32: stats.crc32(),
    })
}

/// 전송 + 시간 측정
///
/// 실패해도 에러 대신 `success = false`와 경과 시간을 담은 결과를 반환.
pub async fn measure_transfer(
    address: &str,
    config: &Config,
    path: &Path,
    events: Option<&EventSender>,
) -> TransferOutcome {
    let start = Instant::now();
    let display_name = wire_name(path).unwrap_or_else(|_| path.display().to_string());

    match send_file(address, config, path, events).await {
        Ok(report) => {
            let elapsed = start.elapsed();
            emit(
                events,
                TransferEvent::Completed {
                    file: report.file_name.clone(),
                    bytes: report.bytes,
                    elapsed,
                },
            );
            TransferOutcome::completed(&report, elapsed)
        }
        Err(e) => {
            warn!("'{}' 전송 실패: {}", display_name, e);
            emit(
                events,
                TransferEvent::Failed {
                    file: display_name.clone(),
                    stage: e.stage(),
                    message: e.to_string(),
                },
            );
            TransferOutcome::aborted(display_name, &e, start.elapsed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{channel, drain};
    use crate::ErrorKind;
    use std::path::PathBuf;
    use tokio::net::TcpListener;

    #[test]
    fn test_wire_name_uses_basename() {
        let name = wire_name(Path::new("/tmp/nested/dir/report.pdf")).unwrap();
        assert_eq!(name, "report.pdf");

        assert!(matches!(
            wire_name(Path::new("dir/bad\nname.txt")),
            Err(Error::InvalidFileName(_))
        ));
        assert!(wire_name(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_read_chunk_fills_buffer() {
        let data = vec![7u8; 10_000];
        let mut reader = &data[..];
        let mut buf = vec![0u8; 4096];

        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 4096);
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 4096);
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 1808);
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        let config = Config {
            port,
            ..Config::default()
        };
        let (tx, rx) = channel();
        let report = send_file("127.0.0.1", &config, &path, Some(&tx))
            .await
            .unwrap();

        assert_eq!(reader.await.unwrap(), b"hello.txt\nhello world");
        assert_eq!(report.bytes, 11);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.crc32, crc32fast::hash(b"hello world"));

        let events = drain(&rx);
        assert!(matches!(events[0], TransferEvent::Started { .. }));
        assert!(events
            .iter()
            .any(|e| matches!(e, TransferEvent::Progress { percent: 100, .. })));
    }

    #[tokio::test]
    async fn test_measure_transfer_times_whole_send() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timed.bin");
        std::fs::write(&path, vec![7u8; 20_000]).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received.len()
        });

        let config = Config {
            port,
            ..Config::default()
        };
        let (tx, rx) = channel();
        let wall = Instant::now();
        let outcome = measure_transfer("127.0.0.1", &config, &path, Some(&tx)).await;
        let wall = wall.elapsed();

        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.bytes, 20_000);
        assert_eq!(reader.await.unwrap(), "timed.bin\n".len() + 20_000);

        // 성공 시에도 실패 시와 같이 호출 전체 구간을 측정
        assert!(outcome.elapsed > Duration::ZERO);
        assert!(outcome.elapsed <= wall);
        let completed = drain(&rx)
            .into_iter()
            .find_map(|e| match e {
                TransferEvent::Completed { elapsed, .. } => Some(elapsed),
                _ => None,
            })
            .unwrap();
        assert_eq!(completed, outcome.elapsed);
    }

    #[tokio::test]
    async fn test_connection_refused_reports_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        // 바인드 후 닫아서 사용되지 않는 포트 확보
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = Config {
            port,
            connect_timeout_ms: 2000,
            ..Config::default()
        };

        let (tx, rx) = channel();
        let outcome = measure_transfer("127.0.0.1", &config, &path, Some(&tx)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Some(Stage::Connect));
        assert_eq!(outcome.file_name, "data.bin");
        assert_eq!(outcome.bytes, 0);

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            TransferEvent::Failed {
                stage: Some(Stage::Connect),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_source_is_storage_error() {
        let path = PathBuf::from("/nonexistent/dir/missing.bin");
        let err = send_file("127.0.0.1", &Config::default(), &path, None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.stage(), None);

        let outcome = measure_transfer("127.0.0.1", &Config::default(), &path, None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.file_name, "missing.bin");
    }
}
