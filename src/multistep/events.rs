use super::outcome::RunOutcome;
use super::step::StepAction;

/// Runner에서 구독자에게 전달되는 진행 이벤트이다.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// Step 실행 시작 알림.
    StepStarted { step: String },
    /// Step 실행 종료와 반환된 동작.
    StepFinished { step: String, action: StepAction },
    /// Step 정리 시작 알림.
    CleanupStarted { step: String },
    /// 전체 실행 종료.
    RunFinished { outcome: RunOutcome },
}
