//! 전송 상태 이벤트
//!
//! 전송 태스크(다수 생산자) -> 소비자(CLI, 로그, 테스트) 단방향 채널.
//! 무제한 큐이므로 생산자는 절대 대기하지 않음.

use std::net::SocketAddr;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::error::Stage;
use crate::estimate::Estimate;

/// 이벤트 송신측
pub type EventSender = Sender<TransferEvent>;

/// 이벤트 수신측
pub type EventReceiver = Receiver<TransferEvent>;

/// 전송 상태 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// 경로/추정 계산 완료 (파일 이름, 경로 문자열, 추정)
    Planned {
        file: String,
        route: String,
        estimate: Estimate,
    },
    /// 전송 시작 (파일 이름, 목적지 주소)
    Started { file: String, destination: String },
    /// 진행률 (파일 이름, 0~100)
    Progress { file: String, percent: u8 },
    /// 전송 완료
    Completed {
        file: String,
        bytes: u64,
        elapsed: Duration,
    },
    /// 전송 실패 (실패 단계 포함)
    Failed {
        file: String,
        stage: Option<Stage>,
        message: String,
    },
    /// 서버측 수신 완료
    Received {
        file: String,
        bytes: u64,
        peer: SocketAddr,
    },
}

impl TransferEvent {
    /// 종료 이벤트 여부
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Completed { .. }
                | TransferEvent::Failed { .. }
                | TransferEvent::Received { .. }
        )
    }
}

/// 새 이벤트 채널
pub fn channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}

/// 대기 중인 이벤트를 모두 꺼냄 (비차단)
pub fn drain(rx: &EventReceiver) -> Vec<TransferEvent> {
    rx.try_iter().collect()
}

/// 수신측이 없어도 실패하지 않는 전송
pub(crate) fn emit(tx: Option<&EventSender>, event: TransferEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}
