//! 순서가 있는 Step 목록을 실행하고, 실행된 Step을 역순으로 정리하는 실행기.
//!
//! `multistep`이 StateBag/Step/Runner를, `commonsteps`가 on-error 정책과
//! 디버그 일시정지를 제공한다. `pipeline`은 YAML로 정의한 셸 Step 묶음을
//! 같은 Runner 위에서 실행한다.

pub mod commonsteps;
pub mod error;
pub mod multistep;
pub mod pipeline;
pub mod retry;
pub mod ui;

pub use error::MultistepError;
