use crate::multistep::StateBag;
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// 실행 컨텍스트를 보관하는 StateBag 키이다.
pub const STATE_CONTEXT: &str = "context";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("정규식 컴파일 실패"));

/// 실행 중 Step 간 값을 공유하기 위한 변수 저장소이다.
#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    /// 문자열 기반 변수 저장소이다.
    vars: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 초기 변수 목록으로 컨텍스트를 생성한다.
    pub fn with_vars(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// 컨텍스트 변수 값을 설정한다.
    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// 컨텍스트, 환경 변수 순서로 값을 조회한다.
    pub fn get_or_env(&self, key: &str) -> Option<String> {
        if let Some(value) = self.get_var(key) {
            return Some(value.to_string());
        }
        std::env::var(key).ok()
    }

    /// `${VAR}` 패턴을 실제 값으로 치환한다.
    ///
    /// # 반환값
    /// 하나라도 값을 찾지 못하면 누락된 변수 이름을 모아 오류로 반환한다.
    /// 치환된 값 안에 다시 `${...}`가 있어도 재귀 치환하지 않는다.
    pub fn expand_placeholders(&self, template: &str) -> anyhow::Result<String> {
        let mut missing = BTreeSet::new();
        let result = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match self.get_or_env(key) {
                Some(value) => value,
                None => {
                    missing.insert(key.to_string());
                    caps[0].to_string()
                }
            }
        });
        if !missing.is_empty() {
            let names: Vec<String> = missing.into_iter().collect();
            anyhow::bail!("정의되지 않은 변수: {}", names.join(", "));
        }
        Ok(result.into_owned())
    }

    /// `template`을 치환하되 실패하면 어떤 필드였는지 오류에 덧붙인다.
    pub fn expand_required(&self, template: &str, field: &str) -> anyhow::Result<String> {
        self.expand_placeholders(template)
            .with_context(|| format!("{field} 필드의 플레이스홀더를 치환할 수 없습니다."))
    }
}

/// ExecutionContext를 비동기 환경에서 공유하기 위한 타입 별칭이다.
pub type SharedExecutionContext = Arc<tokio::sync::RwLock<ExecutionContext>>;

/// StateBag에 등록된 공유 컨텍스트를 가져온다.
pub fn context_from_state(state: &StateBag) -> anyhow::Result<SharedExecutionContext> {
    state
        .require::<SharedExecutionContext>(STATE_CONTEXT)
        .map(|ctx| ctx.as_ref().clone())
        .context("실행 컨텍스트가 준비되지 않았습니다.")
}
