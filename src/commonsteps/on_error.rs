use crate::multistep::{STATE_ABORTED, STATE_ERROR, StateBag, Step, StepAction};
use crate::ui::Ui;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const ASK_PROMPT: &str = "[c] Clean up and exit, [a] abort without cleanup, or [r] retry step (build may fail even if retry succeeds)?";

/// Step 실패 후 이미 실행된 Step을 어떻게 처리할지 정하는 정책이다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// 실행된 Step을 모두 정리한다.
    #[default]
    Cleanup,
    /// 정리를 생략하고 자원을 남겨 둔다.
    Abort,
    /// 실패할 때마다 사용자에게 정리/중단/재시도를 묻는다.
    Ask,
}

/// 알 수 없는 on-error 정책 문자열이다.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("알 수 없는 on-error 정책: {0} (cleanup, abort, ask 중 하나)")]
pub struct ParseOnErrorError(String);

impl FromStr for OnError {
    type Err = ParseOnErrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "cleanup" => Ok(OnError::Cleanup),
            "abort" => Ok(OnError::Abort),
            "ask" => Ok(OnError::Ask),
            other => Err(ParseOnErrorError(other.to_string())),
        }
    }
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnError::Cleanup => f.write_str("cleanup"),
            OnError::Abort => f.write_str("abort"),
            OnError::Ask => f.write_str("ask"),
        }
    }
}

/// 실패나 취소 후에는 내부 Step의 정리를 건너뛰는 래퍼이다.
pub(crate) struct AbortStep {
    inner: Box<dyn Step>,
    ui: Arc<dyn Ui>,
}

impl AbortStep {
    pub(crate) fn new(inner: Box<dyn Step>, ui: Arc<dyn Ui>) -> Self {
        Self { inner, ui }
    }
}

#[async_trait]
impl Step for AbortStep {
    async fn run(&mut self, cancel: &CancellationToken, state: &StateBag) -> StepAction {
        self.inner.run(cancel, state).await
    }

    async fn cleanup(&mut self, state: &StateBag) {
        if state.contains(STATE_ABORTED) {
            tracing::debug!(step = %self.inner.name(), "중단 정책으로 정리를 생략합니다.");
            return;
        }
        if state.is_cancelled() {
            self.ui.error("Interrupted, aborting...");
            state.put(STATE_ABORTED, true);
            return;
        }
        if state.is_halted() {
            self.ui
                .error(&format!("Step {:?} failed, aborting...", self.inner.name()));
            state.put(STATE_ABORTED, true);
            return;
        }
        self.inner.cleanup(state).await;
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// ask 정책에서 사용자가 고른 동작이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AskResponse {
    Cleanup,
    Abort,
    Retry,
}

/// 내부 Step이 Halt하면 사용자에게 다음 동작을 묻는 래퍼이다.
pub(crate) struct AskStep {
    inner: Box<dyn Step>,
    ui: Arc<dyn Ui>,
}

impl AskStep {
    pub(crate) fn new(inner: Box<dyn Step>, ui: Arc<dyn Ui>) -> Self {
        Self { inner, ui }
    }
}

async fn ask(ui: &dyn Ui, step_name: &str, cancel: &CancellationToken) -> AskResponse {
    ui.say(&format!("Step {step_name:?} failed"));
    tokio::select! {
        response = prompt(ui) => response,
        _ = cancel.cancelled() => AskResponse::Cleanup,
    }
}

async fn prompt(ui: &dyn Ui) -> AskResponse {
    loop {
        let line = match ui.ask(ASK_PROMPT).await {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!("입력 요청 실패: {err:#}");
                String::new()
            }
        };
        // 빈 입력은 c로 취급한다.
        let input = format!("{}c", line.to_lowercase());
        match input.chars().next() {
            Some('c') => return AskResponse::Cleanup,
            Some('a') => return AskResponse::Abort,
            Some('r') => return AskResponse::Retry,
            _ => ui.say(&format!("Incorrect input: {line:?}")),
        }
    }
}

#[async_trait]
impl Step for AskStep {
    async fn run(&mut self, cancel: &CancellationToken, state: &StateBag) -> StepAction {
        loop {
            let action = self.inner.run(cancel, state).await;
            if action != StepAction::Halt {
                return action;
            }
            if let Some(err) = state.error() {
                self.ui.error(&format!("{err:#}"));
            }
            let step_name = self.inner.name().to_string();
            match ask(self.ui.as_ref(), &step_name, cancel).await {
                AskResponse::Cleanup => return StepAction::Halt,
                AskResponse::Abort => {
                    state.put(STATE_ABORTED, true);
                    return StepAction::Halt;
                }
                AskResponse::Retry => {
                    tracing::info!(step = %step_name, "사용자 요청으로 Step을 재시도합니다.");
                    state.remove(STATE_ERROR);
                }
            }
        }
    }

    async fn cleanup(&mut self, state: &StateBag) {
        if state.contains(STATE_ABORTED) {
            tracing::debug!(step = %self.inner.name(), "중단 정책으로 정리를 생략합니다.");
            return;
        }
        self.inner.cleanup(state).await;
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multistep::runner::testing::{RecordingStep, entries};
    use crate::multistep::{BasicRunner, RunOutcome, Runner, halt_with_error};
    use crate::ui::testing::RecordingUi;
    use std::sync::Mutex;

    #[test]
    fn parses_policy_names() {
        assert_eq!("".parse::<OnError>(), Ok(OnError::Cleanup));
        assert_eq!("abort".parse::<OnError>(), Ok(OnError::Abort));
        assert_eq!("ask".parse::<OnError>(), Ok(OnError::Ask));
        assert!("run-cleanup-provisioner".parse::<OnError>().is_err());
        assert_eq!(OnError::Ask.to_string(), "ask");
    }

    fn wrap_abort(steps: Vec<Box<dyn Step>>, ui: &Arc<RecordingUi>) -> Vec<Box<dyn Step>> {
        steps
            .into_iter()
            .map(|s| Box::new(AbortStep::new(s, ui.clone())) as Box<dyn Step>)
            .collect()
    }

    #[tokio::test]
    async fn abort_skips_cleanup_after_halt() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ui = Arc::new(RecordingUi::default());
        let mut runner = BasicRunner::new(wrap_abort(
            vec![
                RecordingStep::boxed("a", StepAction::Continue, &log),
                RecordingStep::boxed("b", StepAction::Halt, &log),
            ],
            &ui,
        ));
        let state = StateBag::new();

        let outcome = runner.run(&CancellationToken::new(), &state).await;

        assert!(matches!(outcome, RunOutcome::Halted));
        assert_eq!(entries(&log), vec!["run a", "run b"]);
        assert_eq!(ui.errors(), vec!["Step \"b\" failed, aborting...".to_string()]);
        assert!(state.contains(STATE_ABORTED));
    }

    #[tokio::test]
    async fn abort_still_cleans_up_after_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ui = Arc::new(RecordingUi::default());
        let mut runner = BasicRunner::new(wrap_abort(
            vec![RecordingStep::boxed("a", StepAction::Continue, &log)],
            &ui,
        ));

        let outcome = runner.run(&CancellationToken::new(), &StateBag::new()).await;

        assert!(outcome.is_completed());
        assert_eq!(entries(&log), vec!["run a", "cleanup a"]);
        assert!(ui.errors().is_empty());
    }

    #[tokio::test]
    async fn abort_reports_interruption_on_cancel() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ui = Arc::new(RecordingUi::default());
        let cancel = CancellationToken::new();
        let mut cancelling = RecordingStep::new("a", StepAction::Continue, &log);
        cancelling.cancel_during_run = Some(cancel.clone());
        let mut runner = BasicRunner::new(wrap_abort(vec![Box::new(cancelling)], &ui));

        let outcome = runner.run(&cancel, &StateBag::new()).await;

        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert_eq!(entries(&log), vec!["run a"]);
        assert_eq!(ui.errors(), vec!["Interrupted, aborting...".to_string()]);
    }

    /// 지정한 횟수만큼 실패한 뒤 성공하는 Step이다.
    struct FlakyStep {
        failures_left: u32,
        runs: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl Step for FlakyStep {
        async fn run(&mut self, _cancel: &CancellationToken, state: &StateBag) -> StepAction {
            *self.runs.lock().unwrap() += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return halt_with_error(state, anyhow::anyhow!("image not ready"));
            }
            StepAction::Continue
        }
    }

    #[tokio::test]
    async fn ask_retry_reruns_step_and_clears_error() {
        let runs = Arc::new(Mutex::new(0));
        let ui = Arc::new(RecordingUi::with_answers(&["x", "R"]));
        let mut step = AskStep::new(
            Box::new(FlakyStep {
                failures_left: 1,
                runs: runs.clone(),
            }),
            ui.clone(),
        );
        let state = StateBag::new();

        let action = step.run(&CancellationToken::new(), &state).await;

        assert_eq!(action, StepAction::Continue);
        assert_eq!(*runs.lock().unwrap(), 2);
        assert!(state.error().is_none());
        assert_eq!(ui.errors(), vec!["image not ready".to_string()]);
        assert_eq!(
            ui.said(),
            vec![
                "Step \"FlakyStep\" failed".to_string(),
                "Incorrect input: \"x\"".to_string(),
            ]
        );
        assert_eq!(ui.asked().len(), 2);
    }

    #[tokio::test]
    async fn ask_abort_skips_every_cleanup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ui = Arc::new(RecordingUi::with_answers(&["a"]));
        let mut runner = BasicRunner::new(vec![
            Box::new(AskStep::new(
                RecordingStep::boxed("a", StepAction::Continue, &log),
                ui.clone(),
            )),
            Box::new(AskStep::new(
                RecordingStep::boxed("b", StepAction::Halt, &log),
                ui.clone(),
            )),
        ]);
        let state = StateBag::new();

        let outcome = runner.run(&CancellationToken::new(), &state).await;

        assert!(matches!(outcome, RunOutcome::Halted));
        assert_eq!(entries(&log), vec!["run a", "run b"]);
        assert!(state.contains(STATE_ABORTED));
    }

    #[tokio::test]
    async fn ask_empty_answer_cleans_up() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ui = Arc::new(RecordingUi::with_answers(&[""]));
        let mut runner = BasicRunner::new(vec![Box::new(AskStep::new(
            RecordingStep::boxed("a", StepAction::Halt, &log),
            ui.clone(),
        ))]);

        let outcome = runner.run(&CancellationToken::new(), &StateBag::new()).await;

        assert!(matches!(outcome, RunOutcome::Halted));
        assert_eq!(entries(&log), vec!["run a", "cleanup a"]);
    }

    #[tokio::test]
    async fn ask_returns_cleanup_when_cancelled_while_waiting() {
        let ui = Arc::new(RecordingUi::blocking());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut step = AskStep::new(RecordingStep::boxed("a", StepAction::Halt, &log), ui);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let action = step.run(&cancel, &StateBag::new()).await;

        assert_eq!(action, StepAction::Halt);
    }
}
