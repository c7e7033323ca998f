//! 경로 최적화
//!
//! - 최소 지연: 간선 가중치 = 지연 (ms)
//! - 최대 대역폭: 간선 가중치 = 1 / 대역폭 (합 최소화 근사)
//! - 병목 최대화 (`widest_route`): 경로 최소 대역폭을 최대화하는 정확한 해
//!
//! 동일 비용 경로는 노드 ID 사전순으로 결정됨.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::debug;

use crate::topology::{EdgeMetrics, NodeId, Topology};
use crate::{Error, Result};

/// 경로 최적화 기준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// 누적 지연 최소화
    Latency,
    /// 대역폭 최대화 (역수 합 최소화)
    Bandwidth,
}

impl Criterion {
    /// 간선 가중치, None이면 이 기준에서 사용할 수 없는 간선
    pub fn weight(&self, metrics: &EdgeMetrics) -> Option<f64> {
        let weight = match self {
            Criterion::Latency => metrics.latency_ms?,
            Criterion::Bandwidth => 1.0 / metrics.bandwidth_mbps?,
        };
        weight.is_finite().then_some(weight)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Criterion::Latency => "minimum latency",
            Criterion::Bandwidth => "maximum bandwidth",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Latency => f.write_str("latency"),
            Criterion::Bandwidth => f.write_str("bandwidth"),
        }
    }
}

impl FromStr for Criterion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latency" | "lat" => Ok(Criterion::Latency),
            "bandwidth" | "bw" => Ok(Criterion::Bandwidth),
            other => Err(Error::InvalidConfig(format!(
                "알 수 없는 기준: {} (latency | bandwidth)",
                other
            ))),
        }
    }
}

/// 경로의 한 구간
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub from: NodeId,
    pub to: NodeId,
    pub metrics: EdgeMetrics,
}

/// 계산된 경로
///
/// 계산 시점의 간선 지표를 함께 보관하므로 이후 추정은 토폴로지 없이 가능.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub criterion: Criterion,
    pub nodes: Vec<NodeId>,
    pub hops: Vec<Hop>,

    /// 기준 가중치 합
    pub cost: f64,
}

impl Route {
    fn from_path(topology: &Topology, criterion: Criterion, nodes: Vec<NodeId>) -> Self {
        let hops: Vec<Hop> = nodes
            .windows(2)
            .map(|pair| Hop {
                from: pair[0].clone(),
                to: pair[1].clone(),
                metrics: topology.get_edge(&pair[0], &pair[1]).unwrap_or_default(),
            })
            .collect();

        let cost = hops
            .iter()
            .map(|hop| criterion.weight(&hop.metrics).unwrap_or(f64::INFINITY))
            .sum();

        Self {
            criterion,
            nodes,
            hops,
            cost,
        }
    }

    pub fn origin(&self) -> &str {
        &self.nodes[0]
    }

    pub fn destination(&self) -> &str {
        &self.nodes[self.nodes.len() - 1]
    }

    /// 병목 대역폭 (Mbps), 대역폭 없는 구간이 있으면 None
    pub fn bottleneck_mbps(&self) -> Option<f64> {
        self.hops
            .iter()
            .map(|hop| hop.metrics.bandwidth_mbps)
            .try_fold(f64::INFINITY, |min, bw| bw.map(|bw| min.min(bw)))
    }

    /// 누적 지연 (ms), 지연 없는 구간이 있으면 None
    pub fn total_latency_ms(&self) -> Option<f64> {
        self.hops
            .iter()
            .map(|hop| hop.metrics.latency_ms)
            .sum::<Option<f64>>()
    }

    /// "A -> B -> C"
    pub fn path(&self) -> String {
        self.nodes.join(" -> ")
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Dijkstra 힙 항목 (비용 오름차순, 동률이면 노드 ID 사전순)
#[derive(Debug)]
struct Candidate<'a> {
    cost: f64,
    node: &'a str,
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap는 최대 힙이므로 역순 비교
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(self.node))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

/// 병목 탐색 힙 항목 (병목 내림차순, 동률이면 노드 ID 사전순)
#[derive(Debug)]
struct Widest<'a> {
    width: f64,
    node: &'a str,
}

impl Ord for Widest<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.width
            .total_cmp(&other.width)
            .then_with(|| other.node.cmp(self.node))
    }
}

impl PartialOrd for Widest<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Widest<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Widest<'_> {}

fn validate_endpoints<'a>(
    topology: &'a Topology,
    origin: &str,
    destination: &str,
) -> Result<(&'a str, &'a str)> {
    let from = topology
        .node(origin)
        .ok_or_else(|| Error::UnknownEndpoint(origin.to_string()))?;
    let to = topology
        .node(destination)
        .ok_or_else(|| Error::UnknownEndpoint(destination.to_string()))?;

    if from.id == to.id {
        return Err(Error::SelfRoute(from.id.clone()));
    }
    Ok((from.id.as_str(), to.id.as_str()))
}

fn trace_back(prev: &HashMap<&str, &str>, origin: &str, destination: &str) -> Vec<NodeId> {
    let mut path = vec![destination.to_string()];
    let mut current = destination;
    while current != origin {
        match prev.get(current) {
            Some(&p) => {
                path.push(p.to_string());
                current = p;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

fn dijkstra(
    topology: &Topology,
    origin: &str,
    destination: &str,
    criterion: Criterion,
) -> Option<Vec<NodeId>> {
    let mut dist: HashMap<&str, f64> = HashMap::new();
    let mut prev: HashMap<&str, &str> = HashMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert(origin, 0.0);
    heap.push(Candidate {
        cost: 0.0,
        node: origin,
    });

    while let Some(Candidate { cost, node }) = heap.pop() {
        if node == destination {
            return Some(trace_back(&prev, origin, destination));
        }
        if cost > dist.get(node).copied().unwrap_or(f64::INFINITY) {
            continue;
        }

        for (next, metrics) in topology.neighbors(node) {
            let Some(weight) = criterion.weight(metrics) else {
                continue;
            };

            let next_cost = cost + weight;
            if next_cost < dist.get(next.as_str()).copied().unwrap_or(f64::INFINITY) {
                dist.insert(next, next_cost);
                prev.insert(next, node);
                heap.push(Candidate {
                    cost: next_cost,
                    node: next,
                });
            }
        }
    }

    None
}

/// 단일 기준 최단 경로
pub fn shortest_route(
    topology: &Topology,
    origin: &str,
    destination: &str,
    criterion: Criterion,
) -> Result<Route> {
    let (origin, destination) = validate_endpoints(topology, origin, destination)?;

    let path = dijkstra(topology, origin, destination, criterion).ok_or_else(|| {
        Error::RouteNotFound {
            from: origin.to_string(),
            to: destination.to_string(),
            criterion,
        }
    })?;

    let route = Route::from_path(topology, criterion, path);
    debug!(
        "경로 계산 ({}): {} (cost {:.4})",
        criterion, route, route.cost
    );
    Ok(route)
}

/// 병목 대역폭 최대화 경로 (max-min Dijkstra)
///
/// 반환 경로의 `cost`는 `Bandwidth` 기준 역수 합이므로 `shortest_route` 결과와
/// 직접 비교 가능.
pub fn widest_route(topology: &Topology, origin: &str, destination: &str) -> Result<Route> {
    let (origin, destination) = validate_endpoints(topology, origin, destination)?;

    let mut best: HashMap<&str, f64> = HashMap::new();
    let mut prev: HashMap<&str, &str> = HashMap::new();
    let mut heap = BinaryHeap::new();

    best.insert(origin, f64::INFINITY);
    heap.push(Widest {
        width: f64::INFINITY,
        node: origin,
    });

    while let Some(Widest { width, node }) = heap.pop() {
        if node == destination {
            let path = trace_back(&prev, origin, destination);
            return Ok(Route::from_path(topology, Criterion::Bandwidth, path));
        }
        if best.get(node).is_some_and(|&w| width < w) {
            continue;
        }

        for (next, metrics) in topology.neighbors(node) {
            let Some(bandwidth) = metrics.bandwidth_mbps.filter(|&bw| bw > 0.0) else {
                continue;
            };

            let candidate = width.min(bandwidth);
            if best.get(next.as_str()).map_or(true, |&w| candidate > w) {
                best.insert(next, candidate);
                prev.insert(next, node);
                heap.push(Widest {
                    width: candidate,
                    node: next,
                });
            }
        }
    }

    Err(Error::RouteNotFound {
        from: origin.to_string(),
        to: destination.to_string(),
        criterion: Criterion::Bandwidth,
    })
}

/// 경로 표의 한 항목
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTableEntry {
    pub from: NodeId,
    pub to: NodeId,
    pub route: Option<Route>,
}

/// 모든 (출발, 도착) 쌍의 최단 경로 (병렬 계산)
pub fn route_table(topology: &Topology, criterion: Criterion) -> Vec<RouteTableEntry> {
    let pairs: Vec<(&NodeId, &NodeId)> = topology
        .nodes()
        .flat_map(|from| topology.nodes().map(move |to| (from, to)))
        .filter(|(from, to)| from != to)
        .collect();

    pairs
        .into_par_iter()
        .map(|(from, to)| RouteTableEntry {
            from: from.clone(),
            to: to.clone(),
            route: shortest_route(topology, from, to, criterion).ok(),
        })
        .collect()
}
