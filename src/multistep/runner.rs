use super::events::RunnerEvent;
use super::outcome::RunOutcome;
use super::statebag::{STATE_CANCELLED, STATE_HALTED, StateBag};
use super::step::{Step, StepAction};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Step 목록을 끝까지 실행하거나 중단 후 정리하는 실행기이다.
#[async_trait]
pub trait Runner: Send {
    /// 모든 Step을 실행하고 최종 결과를 반환한다.
    async fn run(&mut self, cancel: &CancellationToken, state: &StateBag) -> RunOutcome;
}

/// Step을 순서대로 실행하고, 실행된 Step을 역순으로 정리하는 기본 Runner이다.
#[derive(Default)]
pub struct BasicRunner {
    /// 실행할 Step 목록.
    steps: Vec<Box<dyn Step>>,
    /// 진행 이벤트 구독 채널.
    events: Option<UnboundedSender<RunnerEvent>>,
}

impl BasicRunner {
    /// 주어진 순서대로 실행할 Runner를 생성한다.
    ///
    /// # 매개변수
    /// - `steps`: 실행 순서대로 나열한 Step 목록
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            steps,
            events: None,
        }
    }

    /// 진행 이벤트를 받을 채널을 등록한다.
    pub fn with_events(mut self, sender: UnboundedSender<RunnerEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// 등록된 Step 목록을 실행 순서대로 반환한다.
    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }
}

#[async_trait]
impl Runner for BasicRunner {
    async fn run(&mut self, cancel: &CancellationToken, state: &StateBag) -> RunOutcome {
        let steps = self
            .steps
            .iter_mut()
            .map(|step| Scheduled::reported(step.as_mut()))
            .collect();
        drive(steps, cancel, state, self.events.as_ref()).await
    }
}

/// `drive`에 넘기는 Step과 이벤트 발행 여부이다.
pub(super) struct Scheduled<'a> {
    step: &'a mut (dyn Step + 'a),
    /// false면 진행 이벤트를 보내지 않는 내부 Step이다.
    reported: bool,
}

impl<'a> Scheduled<'a> {
    pub(super) fn reported(step: &'a mut (dyn Step + 'a)) -> Self {
        Self {
            step,
            reported: true,
        }
    }

    pub(super) fn hidden(step: &'a mut (dyn Step + 'a)) -> Self {
        Self {
            step,
            reported: false,
        }
    }

    fn emit(&self, events: Option<&UnboundedSender<RunnerEvent>>, event: RunnerEvent) {
        if self.reported {
            emit(events, event);
        }
    }
}

/// Runner들이 공유하는 실행 루프이다.
///
/// # 매개변수
/// - `steps`: 실행 순서대로 나열한 Step과 이벤트 발행 여부
/// - `events`: 진행 이벤트 채널. 수신자가 닫혀도 실행은 계속된다
///
/// # 반환값
/// 정리까지 끝난 뒤 StateBag에서 읽어낸 [`RunOutcome`].
///
/// 실행된 Step은 Halt나 취소 여부와 무관하게 역순으로 정리된다.
/// 실행되지 않은 Step의 `cleanup`은 호출되지 않는다.
pub(super) async fn drive<'a>(
    steps: Vec<Scheduled<'a>>,
    cancel: &CancellationToken,
    state: &StateBag,
    events: Option<&UnboundedSender<RunnerEvent>>,
) -> RunOutcome {
    let mut ran: Vec<Scheduled<'a>> = Vec::with_capacity(steps.len());
    for mut entry in steps {
        if cancel.is_cancelled() {
            tracing::info!("Step '{}' 실행 전에 취소가 감지되었습니다.", entry.step.name());
            state.put(STATE_CANCELLED, true);
            break;
        }
        let name = entry.step.name().to_string();
        tracing::debug!(step = %name, "Step 실행 시작");
        entry.emit(events, RunnerEvent::StepStarted { step: name.clone() });
        let action = run_watching_cancel(&mut *entry.step, cancel, state).await;
        entry.emit(
            events,
            RunnerEvent::StepFinished {
                step: name.clone(),
                action,
            },
        );
        ran.push(entry);
        if state.is_cancelled() {
            tracing::info!(step = %name, "취소가 감지되어 진행을 멈춥니다.");
            break;
        }
        if action == StepAction::Halt {
            tracing::info!(step = %name, "현재 Step이 Halt를 요청했습니다.");
            state.put(STATE_HALTED, true);
            break;
        }
    }
    for mut entry in ran.into_iter().rev() {
        let name = entry.step.name().to_string();
        tracing::debug!(step = %name, "Step 정리 시작");
        entry.emit(events, RunnerEvent::CleanupStarted { step: name });
        entry.step.cleanup(state).await;
    }
    let outcome = RunOutcome::from_state(state);
    emit(
        events,
        RunnerEvent::RunFinished {
            outcome: outcome.clone(),
        },
    );
    outcome
}

/// Step 실행 중 취소 토큰이 발동하면 즉시 StateBag에 취소 플래그를 기록한다.
async fn run_watching_cancel(
    step: &mut (dyn Step + '_),
    cancel: &CancellationToken,
    state: &StateBag,
) -> StepAction {
    let mut run = step.run(cancel, state);
    let mut flagged = false;
    let action = loop {
        tokio::select! {
            action = &mut run => break action,
            _ = cancel.cancelled(), if !flagged => {
                state.put(STATE_CANCELLED, true);
                flagged = true;
            }
        }
    };
    // select!는 두 분기가 동시에 준비되면 임의로 고르므로 한 번 더 확인한다.
    if !flagged && cancel.is_cancelled() {
        state.put(STATE_CANCELLED, true);
    }
    action
}

fn emit(events: Option<&UnboundedSender<RunnerEvent>>, event: RunnerEvent) {
    if let Some(sender) = events {
        let _ = sender.send(event);
    }
}
