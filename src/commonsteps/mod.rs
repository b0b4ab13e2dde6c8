//! 빌더들이 공통으로 쓰는 Runner 구성 도구.

mod on_error;
mod pause;

pub use on_error::{OnError, ParseOnErrorError};
pub use pause::UiPause;

use crate::multistep::{BasicRunner, DebugRunner, Runner, Step};
use crate::ui::Ui;
use on_error::{AbortStep, AskStep};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Runner 생성 시 적용할 실행 옵션이다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// 각 Step 전후로 일시정지할지 여부.
    #[serde(default)]
    pub debug: bool,
    /// 실패 시 정리 정책.
    #[serde(default)]
    pub on_error: OnError,
}

/// on-error 정책을 적용하고 디버그 여부에 맞는 Runner를 생성한다.
///
/// # 매개변수
/// - `steps`: 실행 순서대로 나열한 Step 목록
/// - `config`: 디버그 여부와 on-error 정책
/// - `ui`: abort/ask 정책과 디버그 일시정지가 사용할 Ui
///
/// # 반환값
/// `debug`가 참이면 [`DebugRunner`], 아니면 [`BasicRunner`].
pub fn new_runner(
    steps: Vec<Box<dyn Step>>,
    config: RunnerConfig,
    ui: Arc<dyn Ui>,
) -> Box<dyn Runner> {
    let steps: Vec<Box<dyn Step>> = match config.on_error {
        OnError::Cleanup => steps,
        OnError::Abort => steps
            .into_iter()
            .map(|step| Box::new(AbortStep::new(step, ui.clone())) as Box<dyn Step>)
            .collect(),
        OnError::Ask => steps
            .into_iter()
            .map(|step| Box::new(AskStep::new(step, ui.clone())) as Box<dyn Step>)
            .collect(),
    };
    if config.debug {
        Box::new(DebugRunner::with_pause(steps, Arc::new(UiPause::new(ui))))
    } else {
        Box::new(BasicRunner::new(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multistep::runner::testing::{RecordingStep, entries};
    use crate::multistep::{StateBag, StepAction};
    use crate::ui::testing::RecordingUi;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn debug_config_pauses_through_ui() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ui = Arc::new(RecordingUi::with_answers(&["", ""]));
        let mut runner = new_runner(
            vec![RecordingStep::boxed("a", StepAction::Continue, &log)],
            RunnerConfig {
                debug: true,
                on_error: OnError::Cleanup,
            },
            ui.clone(),
        );

        let outcome = runner.run(&CancellationToken::new(), &StateBag::new()).await;

        assert!(outcome.is_completed());
        assert_eq!(entries(&log), vec!["run a", "cleanup a"]);
        assert_eq!(
            ui.asked(),
            vec![
                "Pausing after run of step 'a'. Press enter to continue.",
                "Pausing before cleanup of step 'a'. Press enter to continue.",
            ]
        );
    }

    #[tokio::test]
    async fn abort_config_wraps_every_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ui = Arc::new(RecordingUi::default());
        let mut runner = new_runner(
            vec![
                RecordingStep::boxed("a", StepAction::Continue, &log),
                RecordingStep::boxed("b", StepAction::Halt, &log),
            ],
            RunnerConfig {
                debug: false,
                on_error: OnError::Abort,
            },
            ui.clone(),
        );

        runner.run(&CancellationToken::new(), &StateBag::new()).await;

        assert_eq!(entries(&log), vec!["run a", "run b"]);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RunnerConfig = serde_yaml::from_str("on_error: ask").unwrap();
        assert_eq!(
            config,
            RunnerConfig {
                debug: false,
                on_error: OnError::Ask,
            }
        );
    }
}
