//! MRT 서버 (수신자) - Mesh Route Transfer
//!
//! 연결마다 `이름\n` + 본문을 받아 출력 디렉터리에 저장.
//!
//! 사용법:
//!   cargo run --release --bin mrt-server -- [OPTIONS]
//!
//! 예시:
//!   # 메시 설정의 로컬 노드 주소로 대기
//!   cargo run --release --bin mrt-server -- --config mesh.toml --output ./inbox
//!
//!   # 설정 없이 모든 인터페이스에서 대기
//!   cargo run --release --bin mrt-server -- --bind 0.0.0.0:5001

use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mrt::{FileServer, MeshConfig, DEFAULT_PORT};

/// 서버 실행 인자
#[derive(Default)]
struct ServerArgs {
    config_path: Option<PathBuf>,
    bind: Option<String>,
    output: Option<PathBuf>,
    once: bool,
}

fn parse_args() -> ServerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    parsed.output = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--once" => parsed.once = true,
            "--help" | "-h" => {
                println!(
                    r#"MRT Server - Mesh Route Transfer 수신 서버

연결 하나 = 파일 하나 (`이름\n` + 원시 바이트, 연결 종료로 끝)

사용법:
  cargo run --release --bin mrt-server -- [OPTIONS]

옵션:
  -c, --config <PATH>    메시 설정 파일 (TOML)
  -b, --bind <ADDR>      바인드 주소 (기본: 로컬 노드 주소:포트, 설정 없으면 0.0.0.0:5001)
  -o, --output <DIR>     수신 파일 저장 디렉터리 (기본: .)
  --once                 파일 하나만 받고 종료
  -h, --help             이 도움말 출력

환경 변수:
  RUST_LOG               로그 레벨 (기본: info)
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    info!("MRT Server starting...");

    let mut mesh = match &args.config_path {
        Some(path) => {
            info!("Loading mesh config: {:?}", path);
            Some(MeshConfig::load(path)?)
        }
        None => None,
    };

    let server = match (args.bind, mesh.as_mut()) {
        (None, Some(mesh)) => {
            if let Some(output) = args.output {
                mesh.protocol.output_dir = output;
            }
            std::fs::create_dir_all(&mesh.protocol.output_dir)?;
            FileServer::bind_local(mesh).await?
        }
        (bind, mesh) => {
            let mut config = mesh.map(|m| m.protocol.clone()).unwrap_or_default();
            if let Some(output) = args.output {
                config.output_dir = output;
            }
            std::fs::create_dir_all(&config.output_dir)?;
            let bind = bind.unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT));
            FileServer::bind(bind.as_str(), config).await?
        }
    };

    if args.once {
        let received = server.serve_once().await?;
        info!(
            "Saved {:?} ({} bytes, {:.2}s)",
            received.path,
            received.bytes,
            received.elapsed.as_secs_f64()
        );
        return Ok(());
    }

    info!("Press Ctrl-C to stop");
    let summary = server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!(
        "Done: {} accepted, {} received, {} failed",
        summary.accepted, summary.received, summary.failed
    );
    Ok(())
}
