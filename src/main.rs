use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use multistep::commonsteps::OnError;
use multistep::pipeline::{RunOptions, load_pipeline_from_file, run_pipeline};
use multistep::ui::{BasicUi, Ui};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "multistep")]
#[command(about = "YAML로 정의한 Step을 순서대로 실행하고 역순으로 정리합니다")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Run(RunArgs),
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// 파이프라인 YAML 파일.
    file: PathBuf,
    /// 각 Step 전후로 일시정지한다.
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// cleanup, abort, ask 중 하나. 지정하지 않으면 파일의 설정을 따른다.
    #[arg(long)]
    on_error: Option<OnError>,
    /// KEY=VALUE 형식의 변수. 여러 번 지정할 수 있다.
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    file: PathBuf,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("KEY=VALUE 형식이 아닙니다: {raw}")),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Validate(args) => validate_command(&args),
    }
}

async fn run_command(args: RunArgs) -> Result<()> {
    let pipeline = load_pipeline_from_file(&args.file)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("인터럽트 신호를 받았습니다. 실행을 취소합니다.");
            trigger.cancel();
        }
    });

    let ui: Arc<dyn Ui> = Arc::new(BasicUi::stdio());
    let options = RunOptions {
        debug: args.debug,
        on_error: args.on_error,
        vars: args.vars.into_iter().collect::<HashMap<_, _>>(),
    };
    let run = run_pipeline(&pipeline, options, ui.clone(), &cancel).await?;
    match run.outcome.into_result() {
        Ok(()) => {
            ui.say(&format!("==> '{}' 완료", pipeline.name));
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn validate_command(args: &ValidateArgs) -> Result<()> {
    let pipeline = load_pipeline_from_file(&args.file)?;
    pipeline.validate()?;
    println!(
        "pipeline={} steps={} on_error={}",
        pipeline.name,
        pipeline.steps.len(),
        pipeline.on_error
    );
    Ok(())
}
