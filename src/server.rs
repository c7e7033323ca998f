//! 수신측 (서버)
//!
//! 연결 하나 = 파일 하나.
//!
//! ```text
//! LISTENING -> ACCEPTED -> READING_NAME -> RECEIVING_BODY -> DONE -> LISTENING
//! ```
//!
//! 연결 에러나 저장 에러는 해당 연결만 실패시키고 서버는 계속 대기.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, trace, warn};

use crate::events::{emit, EventSender, TransferEvent};
use crate::stats::TransferStats;
use crate::{Config, Error, MeshConfig, Result, Stage, NAME_DELIMITER};

/// 연결 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Accepted,
    ReadingName,
    ReceivingBody,
    Done,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Listening => "LISTENING",
            ServerState::Accepted => "ACCEPTED",
            ServerState::ReadingName => "READING_NAME",
            ServerState::ReceivingBody => "RECEIVING_BODY",
            ServerState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// 수신 완료된 파일
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFile {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub crc32: u32,
    pub elapsed: Duration,
    pub peer: Option<SocketAddr>,
}

/// `serve` 종료 시 집계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub accepted: u64,
    pub received: u64,
    pub failed: u64,
}

impl ServeSummary {
    fn record(&mut self, joined: std::result::Result<Result<ReceivedFile>, JoinError>) {
        match joined {
            Ok(Ok(_)) => self.received += 1,
            Ok(Err(_)) => self.failed += 1,
            Err(e) => {
                warn!("핸들러 태스크 에러: {}", e);
                self.failed += 1;
            }
        }
    }
}

/// 와이어로 받은 이름 검증
///
/// 앞뒤 공백 제거 후 비어 있지 않은 UTF-8, 경로 구분자 없음, `.`/`..` 불가.
pub fn sanitize_name(raw: &[u8]) -> Result<String> {
    let name = std::str::from_utf8(raw)
        .map_err(|_| Error::InvalidFileName(String::from_utf8_lossy(raw).into_owned()))?
        .trim();

    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    Ok(name.to_string())
}

/// 구분자까지 한 바이트씩 읽어 이름 추출
///
/// 구분자 뒤의 바이트는 소비하지 않으므로 본문은 그대로 스트림에 남음.
pub async fn read_name<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<String> {
    let mut name = BytesMut::with_capacity(64);
    loop {
        let byte = reader
            .read_u8()
            .await
            .map_err(|e| Error::connection(Stage::ReadName, e))?;
        if byte == NAME_DELIMITER {
            break;
        }
        if name.len() >= max_len {
            return Err(Error::InvalidFileName(format!(
                "{}... ({}바이트 초과)",
                String::from_utf8_lossy(&name[..name.len().min(32)]),
                max_len
            )));
        }
        name.put_u8(byte);
    }
    sanitize_name(&name)
}

async fn receive_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    file: &mut File,
    path: &Path,
    chunk_size: usize,
) -> Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut buf = BytesMut::with_capacity(chunk_size.max(1));
    loop {
        buf.clear();
        let n = reader
            .read_buf(&mut buf)
            .await
            .map_err(|e| Error::connection(Stage::ReceiveBody, e))?;
        if n == 0 {
            break;
        }

        file.write_all(&buf)
            .await
            .map_err(|e| Error::storage(path, e))?;
        stats.record_chunk(&buf);
    }

    file.flush().await.map_err(|e| Error::storage(path, e))?;
    Ok(stats)
}

static PART_SEQ: AtomicU64 = AtomicU64::new(0);

/// 수신 중 본문을 담을 임시 파일 경로 (연결마다 고유)
fn part_path(output_dir: &Path, name: &str) -> PathBuf {
    let seq = PART_SEQ.fetch_add(1, Ordering::Relaxed);
    output_dir.join(format!(".{}.{}-{}.part", name, std::process::id(), seq))
}

/// 스트림 하나에서 파일 하나 수신
///
/// 본문은 임시 `.part` 파일에 쓰고 완료 시 최종 이름으로 rename.
/// 실패하면 `keep_partial_files`가 아닌 한 임시 파일만 삭제.
pub async fn receive_file<R: AsyncRead + Unpin>(
    reader: &mut R,
    config: &Config,
) -> Result<ReceivedFile> {
    let start = Instant::now();

    trace!("[{}]", ServerState::ReadingName);
    let name = read_name(reader, config.max_name_len).await?;
    let path = config.output_dir.join(&name);
    let part = part_path(&config.output_dir, &name);

    let mut file = File::create(&part)
        .await
        .map_err(|e| Error::storage(&part, e))?;

    trace!("[{}] {}", ServerState::ReceivingBody, name);
    let received = receive_body(reader, &mut file, &part, config.chunk_size).await;
    drop(file);

    let result = match received {
        Ok(stats) => tokio::fs::rename(&part, &path)
            .await
            .map(|()| stats)
            .map_err(|e| Error::storage(&path, e)),
        Err(e) => Err(e),
    };

    match result {
        Ok(stats) => {
            trace!("[{}] {}", ServerState::Done, name);
            Ok(ReceivedFile {
                name,
                path,
                bytes: stats.total_bytes,
                crc32: stats.crc32(),
                elapsed: start.elapsed(),
                peer: None,
            })
        }
        Err(e) => {
            if config.keep_partial_files {
                debug!("부분 파일 유지: {:?}", part);
            } else {
                match tokio::fs::remove_file(&part).await {
                    Ok(()) => debug!("부분 파일 삭제: {:?}", part),
                    Err(remove) => warn!("부분 파일 삭제 실패 ({:?}): {}", part, remove),
                }
            }
            Err(e)
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: Arc<Config>,
    events: Option<EventSender>,
) -> Result<ReceivedFile> {
    debug!("[{}] {}", ServerState::Accepted, peer);

    let result = receive_file(&mut stream, &config).await;
    match result {
        Ok(mut received) => {
            received.peer = Some(peer);
            info!(
                "File '{}' received from {} ({} bytes, CRC32 {:08X}, {:.2}s)",
                received.name,
                peer,
                received.bytes,
                received.crc32,
                received.elapsed.as_secs_f64()
            );
            emit(
                events.as_ref(),
                TransferEvent::Received {
                    file: received.name.clone(),
                    bytes: received.bytes,
                    peer,
                },
            );
            Ok(received)
        }
        Err(e) => {
            warn!("{} 수신 실패: {}", peer, e);
            emit(
                events.as_ref(),
                TransferEvent::Failed {
                    file: format!("<{}>", peer),
                    stage: e.stage(),
                    message: e.to_string(),
                },
            );
            Err(e)
        }
    }
}

/// 파일 수신 서버
pub struct FileServer {
    listener: TcpListener,
    config: Arc<Config>,
    events: Option<EventSender>,
}

impl FileServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: Config) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "Server listening on {} (output: {:?})",
            listener.local_addr()?,
            config.output_dir
        );

        Ok(Self {
            listener,
            config: Arc::new(config),
            events: None,
        })
    }

    /// 로컬 노드 주소 + 설정 포트로 바인드
    pub async fn bind_local(mesh: &MeshConfig) -> Result<Self> {
        let address = mesh.local_address()?;
        Self::bind((address, mesh.protocol.port), mesh.protocol.clone()).await
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 연결 하나만 받아 처리
    pub async fn serve_once(&self) -> Result<ReceivedFile> {
        trace!("[{}]", ServerState::Listening);
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::connection(Stage::Accept, e))?;

        handle_connection(stream, peer, self.config.clone(), self.events.clone()).await
    }

    /// `shutdown`이 끝날 때까지 연결 수락
    ///
    /// 연결마다 태스크 하나. 종료 요청 후에는 새 연결을 받지 않고
    /// 진행 중인 핸들러가 모두 끝날 때까지 대기.
    pub async fn serve<F>(self, shutdown: F) -> Result<ServeSummary>
    where
        F: Future<Output = ()>,
    {
        let FileServer {
            listener,
            config,
            events,
        } = self;

        let mut summary = ServeSummary::default();
        let mut handlers: JoinSet<Result<ReceivedFile>> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            trace!("[{}] {} in flight", ServerState::Listening, handlers.len());
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, draining {} connection(s)", handlers.len());
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        summary.accepted += 1;
                        handlers.spawn(handle_connection(
                            stream,
                            peer,
                            config.clone(),
                            events.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!("accept 에러: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    summary.record(joined);
                }
            }
        }

        drop(listener);
        while let Some(joined) = handlers.join_next().await {
            summary.record(joined);
        }

        info!(
            "Server stopped: {} accepted, {} received, {} failed",
            summary.accepted, summary.received, summary.failed
        );
        Ok(summary)
    }
}
