//! 효율 토폴로지 분석 (Kruskal)
//!
//! 무방향 용량 그래프에서 가중치 1/대역폭의 최소 신장 트리를 구하고,
//! 원본 대비 신장 트리 대역폭 합 비율을 효율로 보고. 실제 라우팅에는 사용하지 않음.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::topology::{NodeId, Topology};
use crate::{Error, Result};

/// 무방향 용량 간선 (a < b)
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityEdge {
    pub a: NodeId,
    pub b: NodeId,
    pub bandwidth_mbps: f64,
}

impl CapacityEdge {
    /// MST 비용 (1 / 대역폭)
    pub fn weight(&self) -> f64 {
        1.0 / self.bandwidth_mbps
    }
}

/// 무방향 용량 그래프
///
/// 양방향이 모두 설정된 쌍은 작은 쪽 대역폭을 사용.
#[derive(Debug, Clone, Default)]
pub struct CapacityGraph {
    nodes: BTreeSet<NodeId>,
    edges: BTreeMap<(NodeId, NodeId), f64>,
}

impl CapacityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) {
        self.nodes.insert(id.to_string());
    }

    /// 링크 추가 (방향 무시)
    pub fn add_link(&mut self, u: &str, v: &str, bandwidth_mbps: f64) -> Result<()> {
        if u == v {
            return Err(Error::SelfLoop(u.to_string()));
        }

        self.add_node(u);
        self.add_node(v);

        let key = if u < v {
            (u.to_string(), v.to_string())
        } else {
            (v.to_string(), u.to_string())
        };
        self.edges
            .entry(key)
            .and_modify(|bw| *bw = bw.min(bandwidth_mbps))
            .or_insert(bandwidth_mbps);
        Ok(())
    }

    /// 토폴로지에서 대역폭이 있는 간선으로 생성
    pub fn from_topology(topology: &Topology) -> Self {
        let mut graph = Self::new();
        for id in topology.nodes() {
            graph.add_node(id);
        }
        for (from, to, metrics) in topology.edges() {
            if let Some(bw) = metrics.bandwidth_mbps {
                // 토폴로지는 자기 간선을 허용하지 않음
                let _ = graph.add_link(from, to, bw);
            }
        }
        graph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> Vec<CapacityEdge> {
        self.edges
            .iter()
            .map(|((a, b), &bw)| CapacityEdge {
                a: a.clone(),
                b: b.clone(),
                bandwidth_mbps: bw,
            })
            .collect()
    }

    /// 전체 대역폭 합 (Mbps)
    pub fn total_bandwidth(&self) -> f64 {
        self.edges.values().sum()
    }
}

/// 서로소 집합 (경로 압축 + 랭크 합치기)
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        // 경로 압축
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// 합치기, 이미 같은 집합이면 false
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }

        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// 효율 분석 결과
#[derive(Debug, Clone, PartialEq)]
pub struct SpanningReport {
    /// 신장 트리(연결되지 않았으면 신장 포레스트) 간선
    pub edges: Vec<CapacityEdge>,

    /// 노드 수
    pub node_count: usize,

    /// 원본 토폴로지 대역폭 합 (Mbps)
    pub total_original_mbps: f64,

    /// 신장 트리 대역폭 합 (Mbps)
    pub total_spanning_mbps: f64,
}

impl SpanningReport {
    /// 효율 (%) = 신장 트리 합 / 원본 합 * 100
    pub fn efficiency_percent(&self) -> f64 {
        if self.total_original_mbps > 0.0 {
            self.total_spanning_mbps / self.total_original_mbps * 100.0
        } else {
            0.0
        }
    }

    /// 모든 노드가 하나의 트리로 연결되었는지
    pub fn is_connected(&self) -> bool {
        self.node_count <= 1 || self.edges.len() == self.node_count - 1
    }
}

impl fmt::Display for SpanningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Original topology: {:.2} Mbps total", self.total_original_mbps)?;
        writeln!(
            f,
            "Efficient topology (Kruskal): {:.2} Mbps total",
            self.total_spanning_mbps
        )?;
        for edge in &self.edges {
            writeln!(f, "  {} - {}: {} Mbps", edge.a, edge.b, edge.bandwidth_mbps)?;
        }
        write!(f, "Efficiency: {:.1}%", self.efficiency_percent())
    }
}

/// Kruskal 최소 신장 트리 (가중치 1/대역폭 오름차순)
pub fn efficient_topology(graph: &CapacityGraph) -> SpanningReport {
    let index: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut candidates = graph.edges();
    // 동일 가중치는 (a, b) 사전순
    candidates.sort_by(|x, y| {
        x.weight()
            .total_cmp(&y.weight())
            .then_with(|| (&x.a, &x.b).cmp(&(&y.a, &y.b)))
    });

    let mut sets = DisjointSet::new(graph.nodes.len());
    let mut edges = Vec::new();
    for edge in candidates {
        if edges.len() + 1 >= graph.nodes.len().max(1) {
            break;
        }
        if sets.union(index[edge.a.as_str()], index[edge.b.as_str()]) {
            edges.push(edge);
        }
    }

    let total_spanning_mbps = edges.iter().map(|e| e.bandwidth_mbps).sum();

    SpanningReport {
        edges,
        node_count: graph.node_count(),
        total_original_mbps: graph.total_bandwidth(),
        total_spanning_mbps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn three_nodes() -> CapacityGraph {
        let mut graph = CapacityGraph::new();
        graph.add_link("KRPM", "IVAN", 15.9).unwrap();
        graph.add_link("IVAN", "KRPM", 15.7).unwrap();
        graph.add_link("KRPM", "DAVID", 6.18).unwrap();
        graph.add_link("DAVID", "KRPM", 5.95).unwrap();
        graph.add_link("DAVID", "IVAN", 8.81).unwrap();
        graph.add_link("IVAN", "DAVID", 8.58).unwrap();
        graph
    }

    #[test]
    fn test_bidirectional_pairs_use_min() {
        let graph = three_nodes();
        assert_eq!(graph.edge_count(), 3);

        let edges = graph.edges();
        let krpm_ivan = edges.iter().find(|e| e.a == "IVAN" && e.b == "KRPM").unwrap();
        assert_eq!(krpm_ivan.bandwidth_mbps, 15.7);
    }

    #[test]
    fn test_efficient_topology() {
        let report = efficient_topology(&three_nodes());

        // 최대 대역폭 두 간선 선택: IVAN-KRPM 15.7, DAVID-IVAN 8.58
        assert_eq!(report.edges.len(), 2);
        assert!(report.is_connected());
        assert!((report.total_original_mbps - (15.7 + 5.95 + 8.58)).abs() < 1e-9);
        assert!((report.total_spanning_mbps - (15.7 + 8.58)).abs() < 1e-9);

        let expected = (15.7 + 8.58) / (15.7 + 5.95 + 8.58) * 100.0;
        assert!((report.efficiency_percent() - expected).abs() < 1e-9);
        assert!(report.to_string().contains("Efficiency:"));
    }

    #[test]
    fn test_self_link_rejected() {
        let mut graph = CapacityGraph::new();
        assert!(matches!(graph.add_link("A", "A", 1.0), Err(Error::SelfLoop(_))));
    }

    #[test]
    fn test_disconnected_graph_yields_forest() {
        let mut graph = CapacityGraph::new();
        graph.add_link("A", "B", 10.0).unwrap();
        graph.add_link("C", "D", 5.0).unwrap();
        graph.add_node("E");

        let report = efficient_topology(&graph);
        assert_eq!(report.edges.len(), 2);
        assert!(!report.is_connected());
        assert_eq!(report.efficiency_percent(), 100.0);
    }

    #[test]
    fn test_empty_graph() {
        let report = efficient_topology(&CapacityGraph::new());
        assert!(report.edges.is_empty());
        assert_eq!(report.efficiency_percent(), 0.0);
    }

    #[test]
    fn test_disjoint_set() {
        let mut sets = DisjointSet::new(4);
        assert!(sets.union(0, 1));
        assert!(sets.union(2, 3));
        assert!(!sets.union(1, 0));
        assert_ne!(sets.find(0), sets.find(2));
        assert!(sets.union(1, 3));
        assert_eq!(sets.find(0), sets.find(2));
    }

    #[test]
    fn test_random_connected_graphs_span() {
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..50 {
            let n = rng.gen_range(2..12);
            let ids: Vec<String> = (0..n).map(|i| format!("n{}", i)).collect();
            let mut graph = CapacityGraph::new();

            // 연결 보장용 체인 + 임의 간선
            for i in 1..n {
                let j = rng.gen_range(0..i);
                graph.add_link(&ids[i], &ids[j], rng.gen_range(1..100) as f64).unwrap();
            }
            for _ in 0..n {
                let (i, j) = (rng.gen_range(0..n), rng.gen_range(0..n));
                if i != j {
                    graph.add_link(&ids[i], &ids[j], rng.gen_range(1..100) as f64).unwrap();
                }
            }

            let report = efficient_topology(&graph);
            assert_eq!(report.edges.len(), n - 1);
            assert!(report.is_connected());

            // 신장 트리 간선으로 모든 노드 도달 가능
            let index: HashMap<&str, usize> =
                ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
            let mut sets = DisjointSet::new(n);
            for edge in &report.edges {
                sets.union(index[edge.a.as_str()], index[edge.b.as_str()]);
            }
            let root = sets.find(0);
            assert!((0..n).all(|i| sets.find(i) == root));
        }
    }
}
