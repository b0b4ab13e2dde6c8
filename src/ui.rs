use async_trait::async_trait;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// 사용자와 상호작용하는 출력/입력 창구이다.
#[async_trait]
pub trait Ui: Send + Sync {
    /// 질문을 출력하고 한 줄 응답을 받는다. 줄바꿈 문자는 제거된다.
    async fn ask(&self, query: &str) -> anyhow::Result<String>;
    /// 진행 상황 메시지를 출력한다.
    fn say(&self, message: &str);
    /// 부가 정보 메시지를 출력한다.
    fn message(&self, message: &str);
    /// 오류 메시지를 출력한다.
    fn error(&self, message: &str);
}

/// 임의의 reader/writer 위에서 동작하는 기본 Ui 구현이다.
pub struct BasicUi {
    /// 응답을 읽을 입력.
    reader: tokio::sync::Mutex<Box<dyn AsyncBufRead + Unpin + Send>>,
    /// say/message 출력 대상.
    writer: Mutex<Box<dyn Write + Send>>,
    /// error 출력 대상.
    error_writer: Mutex<Box<dyn Write + Send>>,
}

impl BasicUi {
    pub fn new(
        reader: impl AsyncBufRead + Unpin + Send + 'static,
        writer: impl Write + Send + 'static,
        error_writer: impl Write + Send + 'static,
    ) -> Self {
        Self {
            reader: tokio::sync::Mutex::new(Box::new(reader)),
            writer: Mutex::new(Box::new(writer)),
            error_writer: Mutex::new(Box::new(error_writer)),
        }
    }

    /// 표준 입출력에 연결된 Ui를 생성한다.
    pub fn stdio() -> Self {
        Self::new(
            BufReader::new(tokio::io::stdin()),
            std::io::stdout(),
            std::io::stderr(),
        )
    }

    fn write_line(target: &Mutex<Box<dyn Write + Send>>, message: &str) {
        let mut guard = target.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(guard, "{message}");
        let _ = guard.flush();
    }
}

#[async_trait]
impl Ui for BasicUi {
    async fn ask(&self, query: &str) -> anyhow::Result<String> {
        if !query.is_empty() {
            let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            write!(guard, "{query} ")?;
            guard.flush()?;
        }
        let mut line = String::new();
        let read = self.reader.lock().await.read_line(&mut line).await?;
        if read == 0 {
            anyhow::bail!("입력이 종료되어 응답을 읽을 수 없습니다.");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn say(&self, message: &str) {
        Self::write_line(&self.writer, message);
    }

    fn message(&self, message: &str) {
        Self::write_line(&self.writer, message);
    }

    fn error(&self, message: &str) {
        Self::write_line(&self.error_writer, message);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// 출력을 기록하고 미리 정한 응답을 돌려주는 테스트용 Ui이다.
    #[derive(Default)]
    pub(crate) struct RecordingUi {
        answers: Mutex<VecDeque<String>>,
        asked: Mutex<Vec<String>>,
        said: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
        /// 응답이 떨어지면 오류 대신 영원히 대기한다.
        block_when_exhausted: bool,
    }

    impl RecordingUi {
        pub(crate) fn with_answers(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
                ..Self::default()
            }
        }

        pub(crate) fn blocking() -> Self {
            Self {
                block_when_exhausted: true,
                ..Self::default()
            }
        }

        pub(crate) fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }

        pub(crate) fn said(&self) -> Vec<String> {
            self.said.lock().unwrap().clone()
        }

        pub(crate) fn errors(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Ui for RecordingUi {
        async fn ask(&self, query: &str) -> anyhow::Result<String> {
            self.asked.lock().unwrap().push(query.to_string());
            let next = self.answers.lock().unwrap().pop_front();
            match next {
                Some(answer) => Ok(answer),
                None if self.block_when_exhausted => std::future::pending().await,
                None => anyhow::bail!("no scripted answer"),
            }
        }

        fn say(&self, message: &str) {
            self.said.lock().unwrap().push(message.to_string());
        }

        fn message(&self, message: &str) {
            self.said.lock().unwrap().push(message.to_string());
        }

        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }
}
