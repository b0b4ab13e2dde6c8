use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// 실행 취소가 감지되면 Runner가 기록하는 키이다.
pub const STATE_CANCELLED: &str = "cancelled";
/// Step이 Halt를 요청하면 Runner가 기록하는 키이다.
pub const STATE_HALTED: &str = "halted";
/// 실패한 Step이 `anyhow::Error`를 기록하는 키이다.
pub const STATE_ERROR: &str = "error";
/// 공용 `Ui` 핸들(`Arc<dyn Ui>`)을 보관하는 키이다.
pub const STATE_UI: &str = "ui";
/// on-error 정책이 정리 생략을 결정했을 때 기록하는 키이다.
pub const STATE_ABORTED: &str = "aborted";

type Value = Arc<dyn Any + Send + Sync>;

/// StateBag 조회 실패 사유를 표현한다.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateBagError {
    /// 키가 존재하지 않는다.
    #[error("state bag에 '{0}' 키가 없습니다.")]
    Missing(String),
    /// 키는 있지만 요청한 타입과 다르다.
    #[error("state bag의 '{key}' 값이 {expected} 타입이 아닙니다.")]
    TypeMismatch {
        /// 조회한 키.
        key: String,
        /// 요청한 타입 이름.
        expected: &'static str,
    },
}

/// Step 사이에서 공유되는 문자열 키 기반 값 저장소이다.
///
/// 모든 메서드는 `&self`를 받는다. Step이 실행되는 동안에도 Runner가
/// 취소 플래그를 기록할 수 있어야 하기 때문이다. 내부 잠금은 `.await`
/// 지점을 넘어 유지되지 않는다.
#[derive(Default)]
pub struct StateBag {
    /// 키별 값 맵이다.
    data: RwLock<HashMap<String, Value>>,
}

impl StateBag {
    /// 비어 있는 StateBag을 생성한다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 값을 저장한다. 같은 키의 기존 값은 교체된다.
    pub fn put<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.write().insert(key.into(), Arc::new(value));
    }

    /// 키가 있고 타입이 `T`일 때만 값을 반환한다.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.read().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// 값을 복제해서 반환한다.
    pub fn get_cloned<T>(&self, key: &str) -> Option<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.get::<T>(key).map(|value| value.as_ref().clone())
    }

    /// 값을 조회하되 누락과 타입 불일치를 구분해서 알려준다.
    ///
    /// # 반환값
    /// 값이 없으면 [`StateBagError::Missing`], 타입이 다르면
    /// [`StateBagError::TypeMismatch`]를 반환한다.
    pub fn require<T>(&self, key: &str) -> Result<Arc<T>, StateBagError>
    where
        T: Any + Send + Sync,
    {
        let value = self
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StateBagError::Missing(key.to_string()))?;
        value
            .downcast::<T>()
            .map_err(|_| StateBagError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// 키 존재 여부를 확인한다. 값의 타입은 따지지 않는다.
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// 키를 제거하고, 제거된 값이 있었는지 반환한다.
    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// 현재 저장된 키 목록을 정렬해서 반환한다.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 저장된 키 개수를 반환한다.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 실패한 Step이 남긴 오류를 반환한다.
    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.get::<anyhow::Error>(STATE_ERROR)
    }

    /// 실행 취소 플래그가 기록되었는지 확인한다.
    pub fn is_cancelled(&self) -> bool {
        self.contains(STATE_CANCELLED)
    }

    /// Halt 플래그가 기록되었는지 확인한다.
    pub fn is_halted(&self) -> bool {
        self.contains(STATE_HALTED)
    }

    // 잠금 중 패닉이 나도 맵 자체는 일관된 상태이므로 그대로 사용한다.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Value>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StateBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateBag")
            .field("keys", &self.keys())
            .finish()
    }
}
