//! 전송 세션 오케스트레이션
//!
//! 세션 = (출발, 도착, 파일, 기준). 경로/추정을 먼저 계산하고, 경로가 없으면
//! 아무 I/O 없이 중단. 경로가 있으면 목적지 주소로 직접 전송.
//! 계산된 경로는 보고/추정용이며 중계는 하지 않음.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::estimate::{estimate, Estimate};
use crate::events::{emit, EventSender, TransferEvent};
use crate::probe::LatencyProbe;
use crate::route::{shortest_route, widest_route, Criterion, Route};
use crate::topology::{NodeId, SharedTopology, Topology};
use crate::transfer::{measure_transfer, wire_name, TransferOutcome};
use crate::{Error, MeshConfig, Result};

/// 전송 요청
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSession {
    pub origin: NodeId,
    pub destination: NodeId,
    pub file: PathBuf,
    pub criterion: Criterion,
}

impl TransferSession {
    pub fn new(
        origin: impl Into<NodeId>,
        destination: impl Into<NodeId>,
        file: impl Into<PathBuf>,
        criterion: Criterion,
    ) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
            file: file.into(),
            criterion,
        }
    }

    /// 보고용 파일 이름
    pub fn file_name(&self) -> String {
        display_name(&self.file)
    }
}

fn display_name(path: &Path) -> String {
    wire_name(path).unwrap_or_else(|_| path.display().to_string())
}

/// 전송 전 계산 결과
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub session: TransferSession,
    pub route: Route,

    /// 병목 최대화 경로 (`Bandwidth` 기준이고 선택 경로와 다를 때만)
    pub widest: Option<Route>,

    pub estimate: Estimate,
    pub file_size: u64,
    pub destination_address: String,

    /// 출발 -> 도착 직접 간선 지연 (비교용)
    pub direct_latency_ms: Option<f64>,
}

impl fmt::Display for SessionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({}): {}",
            self.session.criterion.description(),
            self.session.criterion,
            self.route
        )?;
        if let Some(widest) = &self.widest {
            writeln!(
                f,
                "Widest bottleneck path: {} ({:.2} Mbps)",
                widest,
                widest.bottleneck_mbps().unwrap_or_default()
            )?;
        }
        match self.direct_latency_ms {
            Some(latency) => writeln!(f, "Direct latency: {} ms", latency)?,
            None => writeln!(f, "Direct latency: N/A")?,
        }
        write!(
            f,
            "Estimated transfer time for {} bytes: {}",
            self.file_size, self.estimate
        )
    }
}

/// 세션 하나의 최종 결과
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub file: String,
    pub route: Option<Route>,
    pub estimate: Option<Estimate>,
    pub outcome: TransferOutcome,
}

impl SessionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.success
    }
}

/// 세션 실행기
///
/// 파일마다 독립 태스크로 실행하며 상태는 이벤트 채널로 보고.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    mesh: Arc<MeshConfig>,
    topology: Arc<SharedTopology>,
    events: Option<EventSender>,
}

impl Dispatcher {
    pub fn new(mesh: Arc<MeshConfig>, topology: Arc<SharedTopology>) -> Self {
        Self {
            mesh,
            topology,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn mesh(&self) -> &MeshConfig {
        &self.mesh
    }

    /// 현재 토폴로지 스냅샷
    pub fn topology(&self) -> Arc<Topology> {
        self.topology.snapshot()
    }

    /// 지연 재측정 후 토폴로지 교체
    pub async fn rebuild<P>(&self, probe: Arc<P>) -> Result<Arc<Topology>>
    where
        P: LatencyProbe + 'static,
    {
        self.topology.rebuild(&self.mesh, probe).await
    }

    /// 경로/추정 계산 (I/O는 파일 크기 조회뿐)
    pub async fn plan(&self, session: &TransferSession) -> Result<SessionPlan> {
        let topology = self.topology.snapshot();
        let route = shortest_route(
            &topology,
            &session.origin,
            &session.destination,
            session.criterion,
        )?;

        let file_size = tokio::fs::metadata(&session.file)
            .await
            .map_err(|e| Error::storage(&session.file, e))?
            .len();

        let destination_address = topology
            .node(&session.destination)
            .map(|n| n.address.clone())
            .ok_or_else(|| Error::UnknownEndpoint(session.destination.clone()))?;

        let widest = match session.criterion {
            Criterion::Bandwidth => widest_route(&topology, &session.origin, &session.destination)
                .ok()
                .filter(|w| w.nodes != route.nodes),
            Criterion::Latency => None,
        };

        let plan = SessionPlan {
            session: session.clone(),
            estimate: estimate(&route, file_size),
            direct_latency_ms: topology
                .get_edge(&session.origin, &session.destination)
                .and_then(|m| m.latency_ms),
            route,
            widest,
            file_size,
            destination_address,
        };

        info!(
            "Planned '{}': {} [{}], estimate {}",
            session.file_name(),
            plan.route,
            session.criterion,
            plan.estimate
        );
        if let Some(widest) = &plan.widest {
            info!("Bandwidth path differs from widest bottleneck path {}", widest);
        }
        emit(
            self.events.as_ref(),
            TransferEvent::Planned {
                file: session.file_name(),
                route: plan.route.path(),
                estimate: plan.estimate,
            },
        );

        Ok(plan)
    }

    /// 계획대로 목적지로 직접 전송
    pub async fn execute(&self, plan: &SessionPlan) -> TransferOutcome {
        measure_transfer(
            &plan.destination_address,
            &self.mesh.protocol,
            &plan.session.file,
            self.events.as_ref(),
        )
        .await
    }

    /// 계획 + 전송
    pub async fn run(&self, session: TransferSession) -> SessionResult {
        let file = session.file_name();

        match self.plan(&session).await {
            Ok(plan) => {
                let outcome = self.execute(&plan).await;
                SessionResult {
                    file,
                    route: Some(plan.route),
                    estimate: Some(plan.estimate),
                    outcome,
                }
            }
            Err(e) => {
                warn!("'{}' 전송 중단: {}", file, e);
                emit(
                    self.events.as_ref(),
                    TransferEvent::Failed {
                        file: file.clone(),
                        stage: None,
                        message: e.to_string(),
                    },
                );
                SessionResult {
                    outcome: TransferOutcome::aborted(file.clone(), &e, Duration::ZERO),
                    file,
                    route: None,
                    estimate: None,
                }
            }
        }
    }

    /// 로컬 노드에서 목적지로 여러 파일 전송 (파일마다 태스크 하나)
    ///
    /// 결과는 입력 순서대로 반환.
    pub async fn dispatch(
        &self,
        destination: &str,
        files: Vec<PathBuf>,
        criterion: Criterion,
    ) -> Vec<SessionResult> {
        let tasks = files
            .into_iter()
            .map(|file| {
                let session = TransferSession::new(
                    self.mesh.local_node.clone(),
                    destination,
                    file,
                    criterion,
                );
                let file = session.file_name();
                let dispatcher = self.clone();
                (file, tokio::spawn(async move { dispatcher.run(session).await }))
            })
            .collect();

        join_in_order(tasks).await
    }
}

/// 태스크 결과를 입력 순서대로 수집
///
/// 비정상 종료된 태스크도 해당 위치에 실패 결과로 채움.
async fn join_in_order(tasks: Vec<(String, JoinHandle<SessionResult>)>) -> Vec<SessionResult> {
    let mut results = Vec::with_capacity(tasks.len());
    for (file, handle) in tasks {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!("'{}' 전송 태스크 에러: {}", file, e);
                results.push(SessionResult {
                    outcome: TransferOutcome::task_failed(file.clone(), &e),
                    file,
                    route: None,
                    estimate: None,
                });
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{channel, drain};
    use crate::probe::StaticProbe;
    use crate::server::FileServer;
    use crate::{Config, ErrorKind};

    fn mesh(port: u16) -> Arc<MeshConfig> {
        let mut mesh = MeshConfig::from_toml_str(
            r#"
            local_node = "A"
            [[nodes]]
            id = "A"
            address = "127.0.0.1"
            [[nodes]]
            id = "B"
            address = "127.0.0.1"
            [[nodes]]
            id = "C"
            address = "127.0.0.1"
            [[nodes]]
            id = "D"
            address = "127.0.0.1"
            "#,
        )
        .unwrap();
        mesh.protocol.port = port;
        Arc::new(mesh)
    }

    /// A -> B 직접 (5ms, 8Mbps), A -> C -> B (1ms + 1ms, 100Mbps), D 고립
    fn topology() -> Topology {
        let mut t = Topology::new();
        for id in ["A", "B", "C", "D"] {
            t.add_node(id, "127.0.0.1").unwrap();
        }
        t.set_edge("A", "B", Some(5.0), Some(8.0)).unwrap();
        t.set_edge("A", "C", Some(1.0), Some(100.0)).unwrap();
        t.set_edge("C", "B", Some(1.0), Some(100.0)).unwrap();
        t
    }

    fn dispatcher(port: u16) -> Dispatcher {
        Dispatcher::new(mesh(port), Arc::new(SharedTopology::new(topology())))
    }

    #[tokio::test]
    async fn test_plan_latency_route() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mkv");
        std::fs::write(&path, vec![0u8; 1_000_000]).unwrap();

        let (tx, rx) = channel();
        let dispatcher = dispatcher(5001).with_events(tx);
        let plan = dispatcher
            .plan(&TransferSession::new("A", "B", &path, Criterion::Latency))
            .await
            .unwrap();

        assert_eq!(plan.route.nodes, vec!["A", "C", "B"]);
        assert_eq!(plan.direct_latency_ms, Some(5.0));
        assert_eq!(plan.destination_address, "127.0.0.1");
        assert_eq!(plan.file_size, 1_000_000);
        assert!(plan.widest.is_none());

        // 8e6 bit / 100 Mbps + 2 ms
        let secs = plan.estimate.as_secs().unwrap();
        assert!((secs - 0.082).abs() < 1e-9);
        assert!(plan.to_string().contains("A -> C -> B"));

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransferEvent::Planned { .. }));
    }

    #[tokio::test]
    async fn test_plan_reports_widest_when_different() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"x").unwrap();

        // S -> T 4 Mbps vs S -> X -> Y -> T 10 Mbps
        let mut t = Topology::new();
        for id in ["S", "T", "X", "Y"] {
            t.add_node(id, "127.0.0.1").unwrap();
        }
        t.set_edge("S", "T", Some(1.0), Some(4.0)).unwrap();
        t.set_edge("S", "X", Some(1.0), Some(10.0)).unwrap();
        t.set_edge("X", "Y", Some(1.0), Some(10.0)).unwrap();
        t.set_edge("Y", "T", Some(1.0), Some(10.0)).unwrap();

        let dispatcher = Dispatcher::new(mesh(5001), Arc::new(SharedTopology::new(t)));
        let plan = dispatcher
            .plan(&TransferSession::new("S", "T", &path, Criterion::Bandwidth))
            .await
            .unwrap();

        assert_eq!(plan.route.nodes, vec!["S", "T"]);
        let widest = plan.widest.as_ref().unwrap();
        assert_eq!(widest.nodes, vec!["S", "X", "Y", "T"]);
        assert_eq!(widest.bottleneck_mbps(), Some(10.0));
    }

    #[tokio::test]
    async fn test_unreachable_destination_aborts_without_io() {
        let (tx, rx) = channel();
        let dispatcher = dispatcher(5001).with_events(tx);

        // 파일이 없어도 경로 계산에서 먼저 중단
        let result = dispatcher
            .run(TransferSession::new(
                "A",
                "D",
                "/nonexistent/file.bin",
                Criterion::Latency,
            ))
            .await;

        assert!(!result.is_success());
        assert!(result.route.is_none());
        assert_eq!(result.file, "file.bin");
        assert_eq!(result.outcome.elapsed, Duration::ZERO);

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransferEvent::Failed { stage: None, .. }));

        let err = dispatcher
            .plan(&TransferSession::new("A", "D", "x", Criterion::Latency))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RouteNotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::Route);
    }

    #[tokio::test]
    async fn test_unknown_destination_is_route_failure() {
        let dispatcher = dispatcher(5001);
        let err = dispatcher
            .plan(&TransferSession::new("A", "NOPE", "x", Criterion::Latency))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownEndpoint(ref id) if id == "NOPE"));
        assert_eq!(err.kind(), ErrorKind::Route);
        assert!(!err.kind().is_fatal());

        let result = dispatcher
            .run(TransferSession::new("A", "NOPE", "x", Criterion::Latency))
            .await;
        assert!(!result.is_success());
        assert_eq!(result.outcome.stage, None);
    }

    #[tokio::test]
    async fn test_join_keeps_order_when_task_panics() {
        fn finished(file: &str) -> SessionResult {
            SessionResult {
                file: file.to_string(),
                route: None,
                estimate: None,
                outcome: TransferOutcome::aborted(
                    file,
                    &Error::InvalidFileName(file.to_string()),
                    Duration::ZERO,
                ),
            }
        }

        async fn crashed() -> SessionResult {
            panic!("transfer task crashed")
        }

        let tasks = vec![
            ("a.bin".to_string(), tokio::spawn(async { finished("a.bin") })),
            ("b.bin".to_string(), tokio::spawn(crashed())),
            ("c.bin".to_string(), tokio::spawn(async { finished("c.bin") })),
        ];
        let results = join_in_order(tasks).await;

        assert_eq!(results.len(), 3);
        let files: Vec<&str> = results.iter().map(|r| r.file.as_str()).collect();
        assert_eq!(files, vec!["a.bin", "b.bin", "c.bin"]);

        let crashed = &results[1];
        assert!(!crashed.is_success());
        assert!(crashed.route.is_none());
        assert_eq!(crashed.outcome.file_name, "b.bin");
        assert_eq!(crashed.outcome.stage, None);
    }

    #[tokio::test]
    async fn test_self_route_rejected() {
        let err = dispatcher(5001)
            .plan(&TransferSession::new("A", "A", "x", Criterion::Latency))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SelfRoute(ref id) if id == "A"));
    }

    #[tokio::test]
    async fn test_dispatch_multiple_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        let server = FileServer::bind(
            "127.0.0.1:0",
            Config {
                output_dir: dst.path().to_path_buf(),
                ..Config::default()
            },
        )
        .await
        .unwrap();
        let port = server.local_addr().unwrap().port();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(async {
            let _ = stop_rx.await;
        }));

        let files: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = src.path().join(format!("part{}.bin", i));
                std::fs::write(&path, vec![i as u8; 5000 + i]).unwrap();
                path
            })
            .collect();

        let (tx, rx) = channel();
        let dispatcher = dispatcher(port).with_events(tx);
        let results = dispatcher
            .dispatch("B", files.clone(), Criterion::Latency)
            .await;

        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert!(result.is_success(), "{}", result.outcome.message);
            assert_eq!(result.file, format!("part{}.bin", i));
            assert_eq!(result.outcome.bytes, 5000 + i as u64);
            assert!(result.estimate.unwrap().is_bounded());
        }

        let events = drain(&rx);
        let completed = events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Completed { .. }))
            .count();
        assert_eq!(completed, 3);

        // 서버가 마지막 파일을 다 쓸 때까지 대기 후 종료
        for _ in 0..200 {
            let done = (0..3).all(|i| {
                std::fs::metadata(dst.path().join(format!("part{}.bin", i)))
                    .map(|m| m.len() == 5000 + i as u64)
                    .unwrap_or(false)
            });
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        stop_tx.send(()).unwrap();
        let summary = serving.await.unwrap().unwrap();
        assert_eq!(summary.received, 3);
    }

    #[tokio::test]
    async fn test_rebuild_swaps_topology() {
        let dispatcher = dispatcher(5001);
        let before = dispatcher.topology();
        assert_eq!(before.edge_count(), 3);

        // 모든 주소가 같으므로 측정 한 번으로 전체 간선 생성
        let probe = Arc::new(StaticProbe::new().with("127.0.0.1", 2.0));
        let after = dispatcher.rebuild(probe).await.unwrap();

        assert_eq!(after.edge_count(), 12);
        assert_eq!(before.edge_count(), 3);
        assert_eq!(dispatcher.topology().edge_count(), 12);
    }
}
