use super::statebag::StateBag;
use crate::error::MultistepError;
use std::fmt;
use std::sync::Arc;

/// 실행이 끝난 뒤 StateBag에서 읽어낸 최종 결과이다.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// 모든 Step이 Continue로 끝났다.
    Completed,
    /// Step이 오류를 남겼다.
    Failed(Arc<anyhow::Error>),
    /// 취소 토큰이 발동했다.
    Cancelled,
    /// 오류 없이 Halt가 요청되었다.
    Halted,
}

impl RunOutcome {
    /// StateBag을 검사해 결과를 결정한다. 오류, 취소, Halt 순으로 우선한다.
    pub fn from_state(state: &StateBag) -> Self {
        if let Some(err) = state.error() {
            RunOutcome::Failed(err)
        } else if state.is_cancelled() {
            RunOutcome::Cancelled
        } else if state.is_halted() {
            RunOutcome::Halted
        } else {
            RunOutcome::Completed
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    /// 결과를 `Result`로 변환한다.
    pub fn into_result(self) -> Result<(), MultistepError> {
        match self {
            RunOutcome::Completed => Ok(()),
            RunOutcome::Failed(err) => Err(MultistepError::Failed(err)),
            RunOutcome::Cancelled => Err(MultistepError::Cancelled),
            RunOutcome::Halted => Err(MultistepError::Halted),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Failed(err) => write!(f, "failed: {err:#}"),
            RunOutcome::Cancelled => f.write_str("cancelled"),
            RunOutcome::Halted => f.write_str("halted"),
        }
    }
}
