use std::sync::Arc;
use thiserror::Error;

/// 파이프라인 실행 결과를 호출자에게 전달하기 위한 오류 타입이다.
#[derive(Debug, Clone, Error)]
pub enum MultistepError {
    /// Step이 오류를 기록하고 중단되었다.
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),
    /// 실행이 취소되었다.
    #[error("Build was cancelled.")]
    Cancelled,
    /// 오류 없이 Halt가 요청되었다.
    #[error("Build was halted.")]
    Halted,
}
