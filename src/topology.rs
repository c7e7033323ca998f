//! 토폴로지 모델
//!
//! 노드 ID -> (이웃 ID -> 간선 지표) 인접 맵.
//! 정렬된 맵을 사용하므로 순회 순서는 항상 노드 ID 사전순.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::check_metric;
use crate::probe::LatencyProbe;
use crate::{Error, MeshConfig, Result};

/// 노드 식별자
pub type NodeId = String;

/// 노드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
}

/// 방향성 간선 지표
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeMetrics {
    /// 지연 (ms), None = 미측정/도달 불가
    pub latency_ms: Option<f64>,

    /// 대역폭 (Mbps), None = 알 수 없음
    pub bandwidth_mbps: Option<f64>,
}

impl EdgeMetrics {
    pub fn new(latency_ms: Option<f64>, bandwidth_mbps: Option<f64>) -> Self {
        Self {
            latency_ms,
            bandwidth_mbps,
        }
    }
}

/// 방향성 토폴로지 그래프
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeMap<NodeId, Node>,
    adjacency: BTreeMap<NodeId, BTreeMap<NodeId, EdgeMetrics>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// 노드 추가 (중복 ID 불가)
    pub fn add_node(&mut self, id: impl Into<NodeId>, address: impl Into<String>) -> Result<()> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateNode(id));
        }

        self.adjacency.insert(id.clone(), BTreeMap::new());
        self.nodes.insert(
            id.clone(),
            Node {
                id,
                address: address.into(),
            },
        );
        Ok(())
    }

    /// 간선 추가/덮어쓰기
    ///
    /// 지표는 음이 아닌 유한값만 허용.
    pub fn set_edge(
        &mut self,
        from: &str,
        to: &str,
        latency_ms: Option<f64>,
        bandwidth_mbps: Option<f64>,
    ) -> Result<()> {
        if from == to {
            return Err(Error::SelfLoop(from.to_string()));
        }
        if !self.nodes.contains_key(to) {
            return Err(Error::UnknownNode(to.to_string()));
        }

        let neighbors = self
            .adjacency
            .get_mut(from)
            .ok_or_else(|| Error::UnknownNode(from.to_string()))?;
        check_metric("latency_ms", from, to, latency_ms)?;
        check_metric("bandwidth_mbps", from, to, bandwidth_mbps)?;
        neighbors.insert(to.to_string(), EdgeMetrics::new(latency_ms, bandwidth_mbps));
        Ok(())
    }

    /// 간선 조회
    pub fn get_edge(&self, from: &str, to: &str) -> Option<EdgeMetrics> {
        self.adjacency.get(from)?.get(to).copied()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// 노드 ID 목록 (사전순)
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|n| n.len()).sum()
    }

    /// 나가는 간선
    pub fn neighbors<'a>(
        &'a self,
        from: &str,
    ) -> impl Iterator<Item = (&'a NodeId, &'a EdgeMetrics)> + 'a {
        self.adjacency.get(from).into_iter().flat_map(|n| n.iter())
    }

    /// 전체 간선 (from, to, 지표)
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId, &EdgeMetrics)> + '_ {
        self.adjacency
            .iter()
            .flat_map(|(from, n)| n.iter().map(move |(to, m)| (from, to, m)))
    }

    /// 지표 표
    pub fn metrics_table(&self) -> MetricsTable {
        MetricsTable(
            self.edges()
                .map(|(from, to, m)| MetricsRow {
                    from: from.clone(),
                    to: to.clone(),
                    latency_ms: m.latency_ms,
                    bandwidth_mbps: m.bandwidth_mbps,
                })
                .collect(),
        )
    }

    /// 설정 + 실시간 측정으로 토폴로지 구성
    ///
    /// 모든 (출발, 도착) 쌍에 대해 정적 지연이 있으면 사용하고, 없으면 도착 노드
    /// 주소를 측정한 값을 사용. 주소당 한 번만 측정하며 모두 동시에 진행.
    /// 측정 실패는 `unreachable_latency_ms` 정책으로 흡수됨.
    pub async fn build<P>(mesh: &MeshConfig, probe: Arc<P>) -> Result<Self>
    where
        P: LatencyProbe + 'static,
    {
        let mut topology = Topology::new();
        for node in &mesh.nodes {
            topology.add_node(node.id.clone(), node.address.clone())?;
        }

        let mut targets = BTreeSet::new();
        for from in &mesh.nodes {
            for to in &mesh.nodes {
                if from.id != to.id && mesh.latency_override(&from.id, &to.id).is_none() {
                    targets.insert(to.address.clone());
                }
            }
        }

        let measured: Arc<DashMap<String, f64>> = Arc::new(DashMap::new());
        let mut probes = JoinSet::new();
        for address in targets {
            let probe = probe.clone();
            let measured = measured.clone();
            probes.spawn(async move {
                match probe.measure_latency(&address).await {
                    Ok(latency) => {
                        measured.insert(address, latency);
                    }
                    Err(e) => warn!("{}", e),
                }
            });
        }
        while let Some(joined) = probes.join_next().await {
            if let Err(e) = joined {
                warn!("측정 태스크 에러: {}", e);
            }
        }

        let fallback = mesh.protocol.unreachable_latency_ms;
        for from in &mesh.nodes {
            for to in &mesh.nodes {
                if from.id == to.id {
                    continue;
                }

                let latency = mesh
                    .latency_override(&from.id, &to.id)
                    .or_else(|| measured.get(&to.address).map(|l| *l))
                    .or(fallback);

                match latency {
                    Some(latency) => topology.set_edge(
                        &from.id,
                        &to.id,
                        Some(latency),
                        mesh.bandwidth(&from.id, &to.id),
                    )?,
                    None => debug!("간선 제외 (지연 없음): {} -> {}", from.id, to.id),
                }
            }
        }

        info!(
            "Topology built: {} nodes, {} edges ({} addresses probed)",
            topology.node_count(),
            topology.edge_count(),
            measured.len()
        );

        Ok(topology)
    }
}

/// 지표 표의 한 행
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRow {
    pub from: NodeId,
    pub to: NodeId,
    pub latency_ms: Option<f64>,
    pub bandwidth_mbps: Option<f64>,
}

/// (출발, 도착, 지연, 대역폭) 표
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsTable(pub Vec<MetricsRow>);

impl MetricsTable {
    pub fn rows(&self) -> &[MetricsRow] {
        &self.0
    }
}

fn metric(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{} {}", v, unit),
        None => "N/A".to_string(),
    }
}

impl fmt::Display for MetricsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<10} {:<12} {:<12} {:<15}",
            "Origin", "Destination", "Latency", "Bandwidth"
        )?;
        writeln!(f, "{}", "-".repeat(52))?;
        for row in &self.0 {
            writeln!(
                f,
                "{:<10} {:<12} {:<12} {:<15}",
                row.from,
                row.to,
                metric(row.latency_ms, "ms"),
                metric(row.bandwidth_mbps, "Mbps")
            )?;
        }
        Ok(())
    }
}

/// 토폴로지 스냅샷 보관소
///
/// 읽기는 `Arc` 스냅샷을 가져가고, 재구성은 새 `Arc`로 교체.
/// 진행 중인 경로 계산이 보고 있는 스냅샷은 변경되지 않음.
#[derive(Debug, Default)]
pub struct SharedTopology {
    current: RwLock<Arc<Topology>>,
}

impl SharedTopology {
    pub fn new(topology: Topology) -> Self {
        Self {
            current: RwLock::new(Arc::new(topology)),
        }
    }

    /// 현재 스냅샷
    pub fn snapshot(&self) -> Arc<Topology> {
        self.current.read().clone()
    }

    /// 교체 후 이전 스냅샷 반환
    pub fn replace(&self, topology: Topology) -> Arc<Topology> {
        std::mem::replace(&mut *self.current.write(), Arc::new(topology))
    }

    /// 다시 구성 후 교체
    pub async fn rebuild<P>(&self, mesh: &MeshConfig, probe: Arc<P>) -> Result<Arc<Topology>>
    where
        P: LatencyProbe + 'static,
    {
        let topology = Topology::build(mesh, probe).await?;
        self.replace(topology);
        Ok(self.snapshot())
    }
}
