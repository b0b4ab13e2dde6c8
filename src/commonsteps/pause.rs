use crate::multistep::{DebugLocation, DebugPause, StateBag};
use crate::ui::Ui;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Ui를 통해 확인을 받는 디버그 일시정지이다.
///
/// 대기 중 실행이 취소되면 응답을 기다리지 않고 바로 돌아온다.
pub struct UiPause {
    ui: Arc<dyn Ui>,
}

impl UiPause {
    pub fn new(ui: Arc<dyn Ui>) -> Self {
        Self { ui }
    }
}

#[async_trait]
impl DebugPause for UiPause {
    async fn pause(&self, location: DebugLocation, step_name: &str, state: &StateBag) {
        let message = format!("Pausing {location} step '{step_name}'. Press enter to continue.");
        tokio::select! {
            result = self.ui.ask(&message) => {
                if let Err(err) = result {
                    tracing::warn!("입력 요청 실패: {err:#}");
                }
            }
            _ = wait_for_cancel_flag(state) => {
                tracing::debug!(step = %step_name, "취소로 일시정지를 해제합니다.");
            }
        }
    }
}

/// StateBag에 취소 플래그가 기록될 때까지 100ms 간격으로 확인한다.
pub(crate) async fn wait_for_cancel_flag(state: &StateBag) {
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        ticker.tick().await;
        if state.is_cancelled() {
            return;
        }
    }
}
