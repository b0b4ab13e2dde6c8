use super::context::{SharedExecutionContext, context_from_state};
use super::utils::pipe_forwarder;
use super::{ShellStepConfig, StepRetryConfig};
use crate::multistep::{STATE_UI, StateBag, Step, StepAction, halt_with_error};
use crate::retry::{self, RetryDelay};
use crate::ui::Ui;
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// 치환이 끝난 실행 직전의 명령이다.
#[derive(Debug)]
struct PreparedCommand {
    script: String,
    env: HashMap<String, String>,
    working_dir: Option<String>,
}

enum Waited {
    /// 프로세스가 끝나고 파이프도 모두 닫혔다.
    Exited(std::io::Result<ExitStatus>, Vec<String>),
    TimedOut,
    Cancelled,
}

/// 로컬 셸 명령을 실행하고, 정리 단계에서 cleanup 명령을 실행하는 Step이다.
pub struct ShellStep {
    config: ShellStepConfig,
}

impl ShellStep {
    /// 설정으로 Step을 생성한다. 설정 검증은 [`super::Pipeline::validate`]가 맡는다.
    pub fn new(config: ShellStepConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ShellStepConfig {
        &self.config
    }

    fn program(&self) -> String {
        self.config.shell_program.clone().unwrap_or_else(|| {
            if cfg!(target_os = "windows") {
                "cmd"
            } else {
                "sh"
            }
            .to_string()
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_sec.max(1))
    }

    /// 스크립트와 환경 변수, 작업 디렉터리의 플레이스홀더를 치환한다.
    async fn prepare(
        &self,
        ctx: &SharedExecutionContext,
        script: &str,
        field: &str,
    ) -> anyhow::Result<PreparedCommand> {
        let guard = ctx.read().await;
        let script = guard.expand_required(script, field)?;
        let mut env = HashMap::new();
        for (key, value) in &self.config.env {
            env.insert(key.clone(), guard.expand_required(value, "env")?);
        }
        let working_dir = match &self.config.working_dir {
            Some(dir) => Some(guard.expand_required(&dir.to_string_lossy(), "working_dir")?),
            None => None,
        };
        Ok(PreparedCommand {
            script,
            env,
            working_dir,
        })
    }

    /// 명령을 한 번 실행하고 표준 출력을 반환한다.
    ///
    /// # 매개변수
    /// - `command`: 치환이 끝난 스크립트와 환경 변수
    /// - `cancel`: 발동하면 프로세스를 종료하고 실패로 처리한다
    /// - `ui`: 출력 줄을 중계할 Ui
    ///
    /// # 반환값
    /// 종료 코드가 0이면 표준 출력 줄을 `\n`으로 이어 반환한다.
    /// 제한 시간은 파이프가 닫힐 때까지 포함한다. 파이프를 물려받은
    /// 백그라운드 자식 프로세스가 있어도 제한 시간과 취소가 적용된다.
    async fn execute(
        &self,
        command: &PreparedCommand,
        cancel: &CancellationToken,
        ui: Option<&Arc<dyn Ui>>,
    ) -> anyhow::Result<String> {
        let mut process = Command::new(self.program());
        if cfg!(target_os = "windows") {
            process.arg("/C");
        } else {
            process.arg("-c");
        }
        process.arg(&command.script);
        if let Some(dir) = &command.working_dir {
            process.current_dir(dir);
        }
        if !command.env.is_empty() {
            process.envs(&command.env);
        }
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = process
            .spawn()
            .with_context(|| format!("셸 명령 실행 실패: {}", command.script))?;
        let mut stdout = child.stdout.take().map(|out| {
            tokio::spawn(pipe_forwarder(
                out,
                self.config.name.clone(),
                "STDOUT",
                ui.cloned(),
            ))
        });
        let mut stderr = child.stderr.take().map(|err| {
            tokio::spawn(pipe_forwarder(
                err,
                self.config.name.clone(),
                "STDERR",
                ui.cloned(),
            ))
        });
        let finished = async {
            let status = child.wait().await;
            let lines = match stdout.as_mut() {
                Some(handle) => handle.await.unwrap_or_default(),
                None => Vec::new(),
            };
            if let Some(handle) = stderr.as_mut() {
                let _ = handle.await;
            }
            (status, lines)
        };
        let waited = tokio::select! {
            result = tokio::time::timeout(self.timeout(), finished) => match result {
                Ok((status, lines)) => Waited::Exited(status, lines),
                Err(_) => Waited::TimedOut,
            },
            _ = cancel.cancelled() => Waited::Cancelled,
        };
        if !matches!(waited, Waited::Exited(..)) {
            let _ = child.kill().await;
            for handle in stdout.iter().chain(stderr.iter()) {
                handle.abort();
            }
        }
        let (status, stdout_lines) = match waited {
            Waited::Exited(status, lines) => (status.context("셸 명령 종료 대기 실패")?, lines),
            Waited::TimedOut => {
                anyhow::bail!("{}초 제한 시간을 초과했습니다.", self.timeout().as_secs());
            }
            Waited::Cancelled => anyhow::bail!("실행이 취소되었습니다."),
        };
        if !status.success() {
            anyhow::bail!("셸 명령 종료 코드: {status}");
        }
        Ok(stdout_lines.join("\n"))
    }

    async fn run_command(
        &self,
        cancel: &CancellationToken,
        state: &StateBag,
        ui: Option<&Arc<dyn Ui>>,
    ) -> anyhow::Result<()> {
        let ctx = context_from_state(state)?;
        let command = self.prepare(&ctx, &self.config.run, "run").await?;
        let output = match &self.config.retry {
            Some(policy) => {
                let this = self;
                let command = &command;
                retry_config(policy)
                    .run(cancel, move || this.execute(command, cancel, ui))
                    .await?
            }
            None => self.execute(&command, cancel, ui).await?,
        };
        if let Some(var) = &self.config.capture_as {
            let value = output.trim().to_string();
            tracing::debug!(step = %self.config.name, var = %var, "출력을 변수에 저장합니다.");
            ctx.write().await.set_var(var.clone(), value);
        }
        Ok(())
    }

    async fn run_cleanup(&self, script: &str, state: &StateBag, ui: Option<&Arc<dyn Ui>>) {
        let result = async {
            let ctx = context_from_state(state)?;
            let command = self.prepare(&ctx, script, "cleanup").await?;
            // 취소 후에도 정리는 끝까지 수행한다.
            self.execute(&command, &CancellationToken::new(), ui).await
        }
        .await;
        if let Err(err) = result {
            let message = format!("Step '{}' 정리 실패: {err:#}", self.config.name);
            tracing::warn!("{message}");
            if let Some(ui) = ui {
                ui.error(&message);
            }
        }
    }
}

fn retry_config(policy: &StepRetryConfig) -> retry::Config {
    retry::Config::default()
        .with_tries(policy.tries)
        .with_delay(RetryDelay::Fixed(Duration::from_secs(policy.delay_secs)))
}

#[async_trait]
impl Step for ShellStep {
    async fn run(&mut self, cancel: &CancellationToken, state: &StateBag) -> StepAction {
        let ui = state.get_cloned::<Arc<dyn Ui>>(STATE_UI);
        if let Some(ui) = &ui {
            ui.say(&format!("==> {}: {}", self.config.name, self.config.run));
        }
        match self.run_command(cancel, state, ui.as_ref()).await {
            Ok(()) => StepAction::Continue,
            Err(err) => halt_with_error(
                state,
                err.context(format!("Step '{}' 실패", self.config.name)),
            ),
        }
    }

    async fn cleanup(&mut self, state: &StateBag) {
        let Some(script) = self.config.cleanup.clone() else {
            return;
        };
        let ui = state.get_cloned::<Arc<dyn Ui>>(STATE_UI);
        if let Some(ui) = &ui {
            ui.say(&format!("==> {} 정리: {script}", self.config.name));
        }
        self.run_cleanup(&script, state, ui.as_ref()).await;
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
