use super::events::RunnerEvent;
use super::outcome::RunOutcome;
use super::runner::{Runner, Scheduled, drive};
use super::statebag::StateBag;
use super::step::{Step, StepAction};
use async_trait::async_trait;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// 디버그 일시정지가 발생한 위치이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugLocation {
    /// Step 실행 직후.
    AfterRun,
    /// Step 정리 직전.
    BeforeCleanup,
}

impl fmt::Display for DebugLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugLocation::AfterRun => f.write_str("after run of"),
            DebugLocation::BeforeCleanup => f.write_str("before cleanup of"),
        }
    }
}

/// 디버그 Runner가 각 지점에서 호출하는 일시정지 동작이다.
#[async_trait]
pub trait DebugPause: Send + Sync {
    async fn pause(&self, location: DebugLocation, step_name: &str, state: &StateBag);
}

/// 표준 입력에서 한 줄을 읽을 때까지 대기하는 기본 일시정지이다.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPause;

#[async_trait]
impl DebugPause for StdinPause {
    async fn pause(&self, location: DebugLocation, step_name: &str, _state: &StateBag) {
        {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(
                stdout,
                "Pausing {location} step '{step_name}'. Press any key to continue."
            );
            let _ = stdout.flush();
        }
        let mut line = String::new();
        let _ = BufReader::new(tokio::io::stdin()).read_line(&mut line).await;
    }
}

/// 실제 Step 뒤에 끼워 넣어 일시정지를 호출하는 Step이다.
struct DebugStepPause {
    /// 직전 실제 Step의 이름.
    step_name: String,
    pause: Arc<dyn DebugPause>,
}

#[async_trait]
impl Step for DebugStepPause {
    async fn run(&mut self, _cancel: &CancellationToken, state: &StateBag) -> StepAction {
        self.pause
            .pause(DebugLocation::AfterRun, &self.step_name, state)
            .await;
        StepAction::Continue
    }

    async fn cleanup(&mut self, state: &StateBag) {
        self.pause
            .pause(DebugLocation::BeforeCleanup, &self.step_name, state)
            .await;
    }
}

/// 각 Step 실행 후와 정리 전에 일시정지하는 Runner이다.
pub struct DebugRunner {
    steps: Vec<Box<dyn Step>>,
    pause: Arc<dyn DebugPause>,
    events: Option<UnboundedSender<RunnerEvent>>,
}

impl DebugRunner {
    /// 표준 입력 기반 일시정지를 사용하는 Runner를 생성한다.
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self::with_pause(steps, Arc::new(StdinPause))
    }

    /// 일시정지 동작을 직접 지정해 Runner를 생성한다.
    ///
    /// # 매개변수
    /// - `steps`: 실행 순서대로 나열한 Step 목록
    /// - `pause`: 각 Step 실행 후와 정리 전에 호출할 일시정지
    pub fn with_pause(steps: Vec<Box<dyn Step>>, pause: Arc<dyn DebugPause>) -> Self {
        Self {
            steps,
            pause,
            events: None,
        }
    }

    /// 진행 이벤트를 받을 채널을 등록한다.
    pub fn with_events(mut self, sender: UnboundedSender<RunnerEvent>) -> Self {
        self.events = Some(sender);
        self
    }
}

#[async_trait]
impl Runner for DebugRunner {
    async fn run(&mut self, cancel: &CancellationToken, state: &StateBag) -> RunOutcome {
        let mut pauses: Vec<DebugStepPause> = self
            .steps
            .iter()
            .map(|step| DebugStepPause {
                step_name: step.name().to_string(),
                pause: self.pause.clone(),
            })
            .collect();
        let mut sequence = Vec::with_capacity(self.steps.len() * 2);
        for (step, pause) in self.steps.iter_mut().zip(pauses.iter_mut()) {
            sequence.push(Scheduled::reported(step.as_mut()));
            sequence.push(Scheduled::hidden(pause));
        }
        drive(sequence, cancel, state, self.events.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multistep::runner::testing::{RecordingStep, entries};
    use std::sync::Mutex;

    struct LoggingPause {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DebugPause for LoggingPause {
        async fn pause(&self, location: DebugLocation, step_name: &str, _state: &StateBag) {
            self.log
                .lock()
                .unwrap()
                .push(format!("pause {location} {step_name}"));
        }
    }

    #[tokio::test]
    async fn pauses_after_each_run_and_before_each_cleanup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = DebugRunner::with_pause(
            vec![
                RecordingStep::boxed("a", StepAction::Continue, &log),
                RecordingStep::boxed("b", StepAction::Continue, &log),
            ],
            Arc::new(LoggingPause { log: log.clone() }),
        );

        let outcome = runner.run(&CancellationToken::new(), &StateBag::new()).await;

        assert!(outcome.is_completed());
        assert_eq!(
            entries(&log),
            vec![
                "run a",
                "pause after run of a",
                "run b",
                "pause after run of b",
                "pause before cleanup of b",
                "cleanup b",
                "pause before cleanup of a",
                "cleanup a",
            ]
        );
    }

    #[tokio::test]
    async fn halting_step_skips_its_after_run_pause() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = DebugRunner::with_pause(
            vec![
                RecordingStep::boxed("a", StepAction::Continue, &log),
                RecordingStep::boxed("b", StepAction::Halt, &log),
                RecordingStep::boxed("c", StepAction::Continue, &log),
            ],
            Arc::new(LoggingPause { log: log.clone() }),
        );
        let state = StateBag::new();

        let outcome = runner.run(&CancellationToken::new(), &state).await;

        assert!(matches!(outcome, RunOutcome::Halted));
        assert_eq!(
            entries(&log),
            vec![
                "run a",
                "pause after run of a",
                "run b",
                "cleanup b",
                "pause before cleanup of a",
                "cleanup a",
            ]
        );
    }

    #[tokio::test]
    async fn pause_steps_are_not_published_as_events() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut runner = DebugRunner::with_pause(
            vec![RecordingStep::boxed("a", StepAction::Continue, &log)],
            Arc::new(LoggingPause { log: log.clone() }),
        )
        .with_events(tx);

        runner.run(&CancellationToken::new(), &StateBag::new()).await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(match event {
                RunnerEvent::StepStarted { step } => format!("start {step}"),
                RunnerEvent::StepFinished { step, .. } => format!("finish {step}"),
                RunnerEvent::CleanupStarted { step } => format!("cleanup {step}"),
                RunnerEvent::RunFinished { .. } => "done".to_string(),
            });
        }
        assert_eq!(seen, vec!["start a", "finish a", "cleanup a", "done"]);
        assert_eq!(
            entries(&log),
            vec!["run a", "pause after run of a", "pause before cleanup of a", "cleanup a"]
        );
    }
}
