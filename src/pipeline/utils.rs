use crate::ui::Ui;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};

/// 프로세스 파이프를 줄 단위로 읽어 로그와 Ui로 중계하고, 읽은 줄을 반환한다.
///
/// # 매개변수
/// - `reader`: 자식 프로세스의 stdout 또는 stderr
/// - `step_name`: 로그에 붙일 Step 이름
/// - `tag`: `STDOUT`/`STDERR` 구분 문자열
/// - `ui`: 줄을 함께 출력할 Ui
///
/// # 반환값
/// 읽은 줄 목록. UTF-8이 아닌 바이트는 대체 문자로 바꾸고, 파이프가
/// 닫힐 때까지 계속 읽는다.
pub(super) async fn pipe_forwarder<R>(
    reader: R,
    step_name: String,
    tag: &'static str,
    ui: Option<Arc<dyn Ui>>,
) -> Vec<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut collected = Vec::new();
    let codec = AnyDelimiterCodec::new(b"\n".to_vec(), b"\n".to_vec());
    let mut lines = FramedRead::new(reader, codec);
    while let Some(chunk_result) = lines.next().await {
        match chunk_result {
            Ok(chunk) => {
                let decoded = String::from_utf8_lossy(&chunk);
                let line = decoded.trim_end_matches('\r').to_string();
                tracing::info!(step = %step_name, "{tag}: {line}");
                if let Some(ui) = &ui {
                    ui.message(&format!("    {step_name}: {line}"));
                }
                collected.push(line);
            }
            Err(err) => {
                // 읽기 오류 뒤에는 스트림이 None을 돌려주므로 그대로 이어 간다.
                tracing::warn!(step = %step_name, "{tag} 읽기 오류: {err}");
            }
        }
    }
    collected
}
