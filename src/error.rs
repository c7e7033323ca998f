//! 에러 타입 정의

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::route::Criterion;
use crate::topology::NodeId;

/// 전송 프로토콜 단계 (어느 단계에서 실패했는지 보고용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 클라이언트: TCP 연결
    Connect,
    /// 클라이언트: 파일 이름 + 구분자 전송
    SendName,
    /// 클라이언트: 파일 본문 전송
    SendBody,
    /// 서버: 연결 수락
    Accept,
    /// 서버: 파일 이름 수신
    ReadName,
    /// 서버: 파일 본문 수신
    ReceiveBody,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::SendName => "send-name",
            Stage::SendBody => "send-body",
            Stage::Accept => "accept",
            Stage::ReadName => "read-name",
            Stage::ReceiveBody => "receive-body",
        };
        f.write_str(name)
    }
}

/// 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Probe,
    Route,
    Connection,
    Storage,
    Configuration,
    Io,
}

impl ErrorKind {
    /// 시작 단계에서 즉시 중단해야 하는 에러인지
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Configuration)
    }
}

/// MRT 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("설정 파싱 에러: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("중복 노드 ID: {0}")]
    DuplicateNode(NodeId),

    #[error("알 수 없는 노드: {0}")]
    UnknownNode(NodeId),

    #[error("자기 자신으로의 간선은 허용되지 않음: {0}")]
    SelfLoop(NodeId),

    #[error("중복 링크 설정: {from} -> {to}")]
    DuplicateLink { from: NodeId, to: NodeId },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("지연 측정 실패 ({address}): {reason}")]
    ProbeFailure { address: String, reason: String },

    #[error("경로 없음: {from} -> {to} (기준: {criterion})")]
    RouteNotFound {
        from: NodeId,
        to: NodeId,
        criterion: Criterion,
    },

    #[error("출발지와 목적지가 같음: {0}")]
    SelfRoute(NodeId),

    /// 요청 시점에 지정된 출발지/목적지가 토폴로지에 없음
    #[error("알 수 없는 경로 끝점: {0}")]
    UnknownEndpoint(NodeId),

    #[error("연결 에러 [{stage}]: {source}")]
    Connection {
        stage: Stage,
        source: std::io::Error,
    },

    #[error("저장 에러 ({path:?}): {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("유효하지 않은 파일 이름: {0:?}")]
    InvalidFileName(String),
}

impl Error {
    pub(crate) fn connection(stage: Stage, source: std::io::Error) -> Self {
        Error::Connection { stage, source }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    /// 에러 종류
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::ConfigParse(_)
            | Error::DuplicateNode(_)
            | Error::UnknownNode(_)
            | Error::SelfLoop(_)
            | Error::DuplicateLink { .. }
            | Error::InvalidConfig(_) => ErrorKind::Configuration,
            Error::ProbeFailure { .. } => ErrorKind::Probe,
            Error::RouteNotFound { .. } | Error::SelfRoute(_) | Error::UnknownEndpoint(_) => {
                ErrorKind::Route
            }
            Error::Connection { .. } | Error::InvalidFileName(_) => ErrorKind::Connection,
            Error::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// 실패한 프로토콜 단계 (연결 에러인 경우만)
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Connection { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::DuplicateNode("A".into());
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.kind().is_fatal());

        let err = Error::connection(
            Stage::SendBody,
            std::io::Error::from(std::io::ErrorKind::ConnectionReset),
        );
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.stage(), Some(Stage::SendBody));
        assert!(!err.kind().is_fatal());
        assert!(err.to_string().contains("send-body"));

        let err = Error::RouteNotFound {
            from: "X".into(),
            to: "Z".into(),
            criterion: Criterion::Latency,
        };
        assert_eq!(err.kind(), ErrorKind::Route);
        assert_eq!(err.stage(), None);

        // 설정의 알 수 없는 노드는 치명적, 요청의 알 수 없는 끝점은 요청만 실패
        assert!(Error::UnknownNode("Q".into()).kind().is_fatal());
        let err = Error::UnknownEndpoint("Q".into());
        assert_eq!(err.kind(), ErrorKind::Route);
        assert!(!err.kind().is_fatal());
    }
}
