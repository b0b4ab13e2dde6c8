use super::statebag::{STATE_ERROR, STATE_UI, StateBag};
use crate::ui::Ui;
use async_trait::async_trait;
use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Step 실행 후 Runner가 취할 다음 동작이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// 다음 Step으로 진행한다.
    Continue,
    /// 진행을 멈추고 정리 단계로 넘어간다.
    Halt,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Continue => f.write_str("continue"),
            StepAction::Halt => f.write_str("halt"),
        }
    }
}

/// 파이프라인을 구성하는 최소 실행 단위이다.
///
/// `run`이 한 번이라도 호출된 Step은 결과와 무관하게 `cleanup`이 호출된다.
/// 정리에 필요한 값은 Step 자신의 필드나 StateBag에 보관한다.
#[async_trait]
pub trait Step: Send {
    /// Step 본 작업을 수행한다.
    async fn run(&mut self, cancel: &CancellationToken, state: &StateBag) -> StepAction;

    /// `run`이 만든 자원을 정리한다. 기본 구현은 아무것도 하지 않는다.
    async fn cleanup(&mut self, _state: &StateBag) {}

    /// 로그와 디버그 프롬프트에 표시할 이름이다.
    fn name(&self) -> &str {
        short_type_name(type_name::<Self>())
    }
}

/// `a::b::StepFoo<x::Y>` 형태의 타입 이름에서 `StepFoo`만 남긴다.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// 아무 일도 하지 않는 Step이다.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStep;

#[async_trait]
impl Step for NullStep {
    async fn run(&mut self, _cancel: &CancellationToken, _state: &StateBag) -> StepAction {
        StepAction::Continue
    }
}

/// 조건이 거짓이라 실행하지 않는 Step의 자리를 채운다. 이름은 원래 Step의 것을 쓴다.
struct SkippedStep {
    name: String,
}

#[async_trait]
impl Step for SkippedStep {
    async fn run(&mut self, _cancel: &CancellationToken, _state: &StateBag) -> StepAction {
        tracing::debug!(step = %self.name, "조건이 거짓이라 Step을 건너뜁니다.");
        StepAction::Continue
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 조건이 참이면 Step을 그대로, 거짓이면 아무 일도 하지 않는 Step을 반환한다.
///
/// # 반환값
/// 건너뛴 Step도 원래 이름을 유지하므로 디버그 프롬프트와 진행 이벤트에
/// 설정한 이름이 그대로 표시된다.
pub fn when(condition: bool, step: Box<dyn Step>) -> Box<dyn Step> {
    if condition {
        step
    } else {
        Box::new(SkippedStep {
            name: step.name().to_string(),
        })
    }
}

/// 오류를 StateBag과 Ui에 기록하고 `Halt`를 반환한다.
///
/// # 매개변수
/// - `state`: 오류를 남길 StateBag. `ui` 키가 있으면 오류를 함께 출력한다
/// - `err`: Step 실패 원인
pub fn halt_with_error(state: &StateBag, err: impl Into<anyhow::Error>) -> StepAction {
    let err = err.into();
    let message = format!("{err:#}");
    tracing::error!(error = %message, "Step 실패");
    if let Some(ui) = state.get::<Arc<dyn Ui>>(STATE_UI) {
        ui.error(&message);
    }
    state.put(STATE_ERROR, err);
    StepAction::Halt
}
