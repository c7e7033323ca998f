//! 설정
//!
//! - `Config`: 프로토콜/런타임 파라미터
//! - `MeshConfig`: 노드 주소, 정적 대역폭, 정적 지연 (TOML)

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::spanning::CapacityGraph;
use crate::topology::NodeId;
use crate::{
    Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_PORT, DEFAULT_PROBE_COUNT, MAX_NAME_LEN,
};

/// MRT 프로토콜 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 파일 전송 TCP 포트
    pub port: u16,

    /// 본문 전송 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 지연 측정 시 에코 요청 수
    pub probe_count: u32,

    /// 지연 측정 타임아웃 (밀리초)
    pub probe_timeout_ms: u64,

    /// TCP 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 측정 실패 시 대체 지연값 (밀리초)
    /// None이면 해당 간선을 토폴로지에서 제외
    pub unreachable_latency_ms: Option<f64>,

    /// 전송 실패 시 부분 파일 유지 여부
    pub keep_partial_files: bool,

    /// 수신 파일 저장 디렉터리
    pub output_dir: PathBuf,

    /// 파일 이름 최대 길이 (바이트)
    pub max_name_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            probe_count: DEFAULT_PROBE_COUNT,
            probe_timeout_ms: 5000,      // 5초
            connect_timeout_ms: 5000,    // 5초
            unreachable_latency_ms: None, // 간선 제외
            keep_partial_files: false,
            output_dir: PathBuf::from("."),
            max_name_len: MAX_NAME_LEN,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            probe_timeout_ms: 15000,
            connect_timeout_ms: 15000,
            unreachable_latency_ms: Some(1000.0), // 높은 대체값으로 유지
            ..Self::default()
        }
    }
}

/// 노드 설정
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: NodeId,
    pub address: String,
}

/// 방향성 링크 설정 (from -> to)
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub from: NodeId,
    pub to: NodeId,

    /// 정적 대역폭 (Mbps)
    pub bandwidth_mbps: Option<f64>,

    /// 정적 지연 (ms), 있으면 측정 생략
    pub latency_ms: Option<f64>,
}

/// 메시 설정 (설정 파일 전체)
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// 이 프로세스가 대표하는 노드
    pub local_node: NodeId,

    #[serde(default)]
    pub protocol: Config,

    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl MeshConfig {
    /// 파일에서 로드 (검증 포함)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// TOML 문자열에서 로드 (검증 포함)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(Error::InvalidConfig("빈 노드 ID".into()));
            }
            if node.address.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("노드 {}의 주소가 비어 있음", node.id)));
            }
            if !ids.insert(node.id.as_str()) {
                return Err(Error::DuplicateNode(node.id.clone()));
            }
        }

        if !ids.contains(self.local_node.as_str()) {
            return Err(Error::UnknownNode(self.local_node.clone()));
        }

        let mut pairs = HashSet::new();
        for link in &self.links {
            for id in [&link.from, &link.to] {
                if !ids.contains(id.as_str()) {
                    return Err(Error::UnknownNode(id.clone()));
                }
            }
            if link.from == link.to {
                return Err(Error::SelfLoop(link.from.clone()));
            }
            if !pairs.insert((link.from.as_str(), link.to.as_str())) {
                return Err(Error::DuplicateLink {
                    from: link.from.clone(),
                    to: link.to.clone(),
                });
            }
            check_metric("bandwidth_mbps", &link.from, &link.to, link.bandwidth_mbps)?;
            check_metric("latency_ms", &link.from, &link.to, link.latency_ms)?;
        }

        if self.protocol.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size는 0보다 커야 함".into()));
        }

        Ok(())
    }

    /// 노드 주소 조회
    pub fn address_of(&self, id: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.address.as_str())
    }

    /// 로컬 노드 주소
    pub fn local_address(&self) -> Result<&str> {
        self.address_of(&self.local_node)
            .ok_or_else(|| Error::UnknownNode(self.local_node.clone()))
    }

    fn link(&self, from: &str, to: &str) -> Option<&LinkConfig> {
        self.links.iter().find(|l| l.from == from && l.to == to)
    }

    /// 정적 대역폭 조회
    pub fn bandwidth(&self, from: &str, to: &str) -> Option<f64> {
        self.link(from, to).and_then(|l| l.bandwidth_mbps)
    }

    /// 정적 지연 조회
    pub fn latency_override(&self, from: &str, to: &str) -> Option<f64> {
        self.link(from, to).and_then(|l| l.latency_ms)
    }

    /// 정적 대역폭 설정으로 무방향 용량 그래프 생성
    pub fn capacity_graph(&self) -> Result<CapacityGraph> {
        let mut graph = CapacityGraph::new();
        for node in &self.nodes {
            graph.add_node(&node.id);
        }
        for link in &self.links {
            if let Some(bw) = link.bandwidth_mbps {
                graph.add_link(&link.from, &link.to, bw)?;
            }
        }
        Ok(graph)
    }
}

/// 간선 지표는 음이 아닌 유한값이어야 함
pub(crate) fn check_metric(name: &str, from: &str, to: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(Error::InvalidConfig(format!(
            "{} -> {}: {} 값이 유효하지 않음 ({})",
            from, to, name, v
        ))),
        _ => Ok(()),
    }
}
