//! YAML로 정의한 셸 Step 목록을 multistep Runner로 실행한다.

mod context;
mod shell;
mod utils;

pub use context::{ExecutionContext, STATE_CONTEXT, SharedExecutionContext, context_from_state};
pub use shell::ShellStep;

use crate::commonsteps::{OnError, RunnerConfig, new_runner};
use crate::multistep::{RunOutcome, STATE_UI, StateBag, Step, when};
use crate::ui::Ui;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 파이프라인 전체 정의이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// 파이프라인 표시 이름.
    pub name: String,
    /// Step 실패 시 정리 정책.
    #[serde(default)]
    pub on_error: OnError,
    /// 실행 시작 시 컨텍스트에 넣을 변수.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// 순서대로 실행할 Step 목록.
    pub steps: Vec<ShellStepConfig>,
}

/// 셸 Step 하나의 설정이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellStepConfig {
    /// 고유 Step 이름.
    pub name: String,
    /// 실행할 스크립트.
    #[serde(alias = "command")]
    pub run: String,
    /// 정리 단계에서 실행할 스크립트.
    #[serde(default)]
    pub cleanup: Option<String>,
    /// false면 Step을 건너뛴다.
    #[serde(default = "default_when")]
    pub when: bool,
    /// 사용할 셸 프로그램 경로.
    #[serde(default)]
    pub shell_program: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// 실행 제한 시간(초 단위).
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
    /// 표준 출력을 저장할 컨텍스트 변수 이름.
    #[serde(default)]
    pub capture_as: Option<String>,
    #[serde(default)]
    pub retry: Option<StepRetryConfig>,
}

/// 실패한 명령을 다시 실행하는 설정이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRetryConfig {
    /// 최대 시도 횟수. 0이면 무제한이다.
    #[serde(default = "default_tries")]
    pub tries: usize,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_when() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

fn default_tries() -> usize {
    3
}

fn default_delay_secs() -> u64 {
    5
}

impl Pipeline {
    /// 실행 전에 잡아낼 수 있는 정의 오류를 검사한다.
    ///
    /// # 반환값
    /// Step이 없거나, 이름이 비었거나 중복되었거나, `run`이 비었거나,
    /// `capture_as`가 변수 이름 형식이 아니면 오류를 반환한다.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.steps.is_empty() {
            anyhow::bail!("파이프라인 '{}'에 Step이 없습니다.", self.name);
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                anyhow::bail!("이름이 비어 있는 Step이 있습니다.");
            }
            if !seen.insert(step.name.as_str()) {
                anyhow::bail!("Step 이름이 중복되었습니다: {}", step.name);
            }
            if step.run.trim().is_empty() {
                anyhow::bail!("Step '{}'의 run이 비어 있습니다.", step.name);
            }
            if let Some(var) = &step.capture_as {
                let valid = !var.is_empty()
                    && var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if !valid {
                    anyhow::bail!(
                        "Step '{}'의 capture_as 이름이 올바르지 않습니다: {var}",
                        step.name
                    );
                }
            }
        }
        Ok(())
    }

    /// `when`을 반영해 Runner에 넘길 Step 목록을 만든다.
    pub fn build_steps(&self) -> Vec<Box<dyn Step>> {
        self.steps
            .iter()
            .map(|config| when(config.when, Box::new(ShellStep::new(config.clone()))))
            .collect()
    }
}

/// YAML 파일을 읽어 Pipeline으로 역직렬화한다.
pub fn load_pipeline_from_file(path: &Path) -> anyhow::Result<Pipeline> {
    let mut file = File::open(path)?;
    load_pipeline_from_reader(&mut file)
}

/// Reader에서 YAML을 읽어 Pipeline 구조체로 파싱한다.
pub fn load_pipeline_from_reader<R: Read>(reader: &mut R) -> anyhow::Result<Pipeline> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    let pipeline: Pipeline = serde_yaml::from_str(&buf)?;
    Ok(pipeline)
}

/// 실행 시점에 덮어쓸 옵션이다.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub debug: bool,
    /// 지정하면 파이프라인의 on_error 대신 사용한다.
    pub on_error: Option<OnError>,
    /// 파이프라인 변수보다 우선한다.
    pub vars: HashMap<String, String>,
}

/// 파이프라인 실행 결과이다.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub outcome: RunOutcome,
    /// 실행이 끝난 시점의 컨텍스트 변수.
    pub vars: HashMap<String, String>,
}

/// 파이프라인을 검증하고 끝까지 실행한다.
///
/// # 매개변수
/// - `pipeline`: 실행할 파이프라인 정의
/// - `options`: 디버그 여부, on-error 덮어쓰기, 추가 변수
/// - `ui`: StateBag의 `ui` 키로 등록되어 모든 Step이 공유한다
/// - `cancel`: 발동하면 현재 Step 이후 진행을 멈추고 정리한다
///
/// # 반환값
/// 검증에 실패하면 오류를, 실행했다면 결과와 마지막 컨텍스트 변수를 반환한다.
pub async fn run_pipeline(
    pipeline: &Pipeline,
    options: RunOptions,
    ui: Arc<dyn Ui>,
    cancel: &CancellationToken,
) -> anyhow::Result<PipelineRun> {
    pipeline.validate()?;

    let mut vars = pipeline.vars.clone();
    vars.extend(options.vars);
    let ctx: SharedExecutionContext =
        Arc::new(tokio::sync::RwLock::new(ExecutionContext::with_vars(vars)));

    let state = StateBag::new();
    state.put(STATE_CONTEXT, ctx.clone());
    state.put(STATE_UI, ui.clone());

    let config = RunnerConfig {
        debug: options.debug,
        on_error: options.on_error.unwrap_or(pipeline.on_error),
    };
    tracing::info!(
        pipeline = %pipeline.name,
        steps = pipeline.steps.len(),
        on_error = %config.on_error,
        debug = config.debug,
        "파이프라인 실행 시작"
    );
    let mut runner = new_runner(pipeline.build_steps(), config, ui);
    let outcome = runner.run(cancel, &state).await;
    tracing::info!(pipeline = %pipeline.name, %outcome, "파이프라인 실행 종료");

    let vars = ctx.read().await.vars().clone();
    Ok(PipelineRun { outcome, vars })
}
