//! # MRT (Mesh Route Transfer)
//!
//! 소규모 메시 네트워크용 최적 경로 계산 + 직접 TCP 파일 전송
//!
//! ## 핵심 특징
//! - **지연 측정**: ping 기반 RTT 측정, 로케일별 출력 파싱
//! - **토폴로지 모델**: 방향성 간선별 지연/대역폭
//! - **경로 최적화**: 최소 지연 / 최대 대역폭 Dijkstra, 병목 최대화 경로
//! - **효율 분석**: Kruskal 최소 신장 트리로 토폴로지 효율 계산
//! - **전송 시간 추정**: 병목 대역폭 + 누적 지연
//! - **전송 프로토콜**: `이름\n` + 원시 바이트, 연결 종료로 끝 표시
//!
//! 계산된 경로는 보고/추정용이며, 실제 전송은 항상 목적지 주소로 직접 이루어짐.

pub mod config;
pub mod error;
pub mod estimate;
pub mod events;
pub mod probe;
pub mod route;
pub mod server;
pub mod session;
pub mod spanning;
pub mod stats;
pub mod topology;
pub mod transfer;

pub use config::{Config, LinkConfig, MeshConfig, NodeConfig};
pub use error::{Error, ErrorKind, Result, Stage};
pub use estimate::{estimate, Estimate};
pub use events::{EventReceiver, EventSender, TransferEvent};
pub use probe::{LatencyProbe, PingProbe, StaticProbe};
pub use route::{route_table, shortest_route, widest_route, Criterion, Hop, Route};
pub use server::{FileServer, ReceivedFile, ServeSummary};
pub use session::{Dispatcher, SessionPlan, SessionResult, TransferSession};
pub use spanning::{efficient_topology, CapacityEdge, CapacityGraph, SpanningReport};
pub use stats::TransferStats;
pub use topology::{EdgeMetrics, Node, NodeId, SharedTopology, Topology};
pub use transfer::{measure_transfer, send_file, TransferOutcome, TransferReport};

/// 기본 전송 포트
pub const DEFAULT_PORT: u16 = 5001;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// 기본 에코 요청 수
pub const DEFAULT_PROBE_COUNT: u32 = 4;

/// 파일 이름 구분자
pub const NAME_DELIMITER: u8 = b'\n';

/// 파일 이름 최대 길이 (바이트)
pub const MAX_NAME_LEN: usize = 4096;
