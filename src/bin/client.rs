//! MRT 클라이언트 (송신자) - Mesh Route Transfer
//!
//! 메시 토폴로지를 측정하고 최적 경로/예상 시간을 보고한 뒤 파일을 목적지로 직접 전송.
//!
//! 사용법:
//!   cargo run --release --bin mrt-client -- [OPTIONS]
//!
//! 예시:
//!   # 지표 표 + 효율 토폴로지
//!   cargo run --release --bin mrt-client -- --config mesh.toml --mst
//!
//!   # 대역폭 기준으로 파일 두 개 전송
//!   cargo run --release --bin mrt-client -- -c mesh.toml --to IVAN --criterion bandwidth -f a.bin -f b.bin

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mrt::events::{self, TransferEvent};
use mrt::{
    efficient_topology, route_table, shortest_route, Criterion, Dispatcher, MeshConfig,
    PingProbe, SharedTopology, StaticProbe, Topology, TransferSession,
};

/// 클라이언트 실행 인자
struct ClientArgs {
    config_path: PathBuf,
    destination: Option<String>,
    criterion: Criterion,
    files: Vec<PathBuf>,
    offline: bool,
    mst: bool,
    routes: bool,
    dry_run: bool,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("mesh.toml"),
            destination: None,
            criterion: Criterion::Latency,
            files: Vec::new(),
            offline: false,
            mst: false,
            routes: false,
            dry_run: false,
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--to" | "-t" => {
                if i + 1 < args.len() {
                    parsed.destination = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--criterion" => {
                if i + 1 < args.len() {
                    parsed.criterion = args[i + 1]
                        .parse()
                        .expect("유효한 기준 필요 (latency | bandwidth)");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    parsed.files.push(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--offline" => parsed.offline = true,
            "--mst" => parsed.mst = true,
            "--routes" => parsed.routes = true,
            "--dry-run" => parsed.dry_run = true,
            "--help" | "-h" => {
                println!(
                    r#"MRT Client - Mesh Route Transfer 송신 클라이언트

ping으로 간선 지연을 측정하고, 설정된 대역폭과 함께 최적 경로와
예상 전송 시간을 계산한 뒤 파일을 목적지 노드로 직접 전송.

사용법:
  cargo run --release --bin mrt-client -- [OPTIONS]

옵션:
  -c, --config <PATH>     메시 설정 파일 (기본: mesh.toml)
  -t, --to <NODE>         목적지 노드 ID
  --criterion <C>         경로 기준: latency | bandwidth (기본: latency)
  -f, --file <PATH>       전송할 파일 (여러 번 지정 가능)
  --offline               측정 없이 설정의 정적 지연만 사용
  --mst                   효율 토폴로지 (Kruskal) 보고
  --routes                모든 노드 쌍의 경로 표 출력
  --dry-run               경로/예상 시간만 계산하고 전송하지 않음
  -h, --help              이 도움말 출력

환경 변수:
  RUST_LOG                로그 레벨 (기본: info)
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

fn print_event(event: &TransferEvent) {
    match event {
        TransferEvent::Planned {
            file,
            route,
            estimate,
        } => println!("[{}] planned via {} (estimate {})", file, route, estimate),
        TransferEvent::Started { file, destination } => {
            println!("[{}] sending to {}", file, destination)
        }
        TransferEvent::Progress { file, percent } => {
            if percent % 10 == 0 {
                println!("[{}] {}%", file, percent);
            }
        }
        TransferEvent::Completed {
            file,
            bytes,
            elapsed,
        } => println!(
            "[{}] completed: {} bytes in {:.2} s",
            file,
            bytes,
            elapsed.as_secs_f64()
        ),
        TransferEvent::Failed {
            file,
            stage,
            message,
        } => match stage {
            Some(stage) => println!("[{}] failed at {}: {}", file, stage, message),
            None => println!("[{}] failed: {}", file, message),
        },
        TransferEvent::Received { file, bytes, peer } => {
            println!("[{}] received {} bytes from {}", file, bytes, peer)
        }
    }
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

    info!("MRT Client starting...");
    info!("Loading mesh config: {:?}", args.config_path);
    let mesh = Arc::new(MeshConfig::load(&args.config_path)?);
    info!(
        "Local node: {} ({} nodes, {} links)",
        mesh.local_node,
        mesh.nodes.len(),
        mesh.links.len()
    );

    // 토폴로지 측정
    let topology = if args.offline {
        Topology::build(&mesh, Arc::new(StaticProbe::new())).await?
    } else {
        Topology::build(&mesh, Arc::new(PingProbe::from_config(&mesh.protocol))).await?
    };

    println!();
    println!("{}", topology.metrics_table());

    if args.mst {
        let report = efficient_topology(&mesh.capacity_graph()?);
        println!("{}", report);
        if !report.is_connected() {
            warn!("용량 그래프가 연결되어 있지 않음 (신장 포레스트)");
        }
        println!();
    }

    if args.routes {
        println!("Routes ({}):", args.criterion);
        for entry in route_table(&topology, args.criterion) {
            match entry.route {
                Some(route) => println!(
                    "  {} -> {}: {} (cost {:.4})",
                    entry.from, entry.to, route, route.cost
                ),
                None => println!("  {} -> {}: unreachable", entry.from, entry.to),
            }
        }
        println!();
    }

    let Some(destination) = args.destination else {
        return Ok(());
    };

    let topology = Arc::new(SharedTopology::new(topology));
    let (tx, rx) = events::channel();
    let dispatcher = Dispatcher::new(mesh.clone(), topology.clone()).with_events(tx);

    if args.files.is_empty() {
        let route = shortest_route(
            &topology.snapshot(),
            &mesh.local_node,
            &destination,
            args.criterion,
        )?;
        println!("{} ({}): {}", args.criterion.description(), args.criterion, route);
        return Ok(());
    }

    if args.dry_run {
        for file in &args.files {
            let session = TransferSession::new(
                mesh.local_node.clone(),
                destination.clone(),
                file.clone(),
                args.criterion,
            );
            match dispatcher.plan(&session).await {
                Ok(plan) => println!("{}\n", plan),
                Err(e) => println!("{}: {}\n", session.file_name(), e),
            }
        }
        return Ok(());
    }

    let runner = dispatcher.clone();
    let files = args.files.clone();
    let criterion = args.criterion;
    let mut transfers =
        tokio::spawn(async move { runner.dispatch(&destination, files, criterion).await });

    // 전송이 진행되는 동안 주기적으로 상태 이벤트 출력
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let results = loop {
        tokio::select! {
            joined = &mut transfers => break joined?,
            _ = ticker.tick() => {
                for event in events::drain(&rx) {
                    print_event(&event);
                }
            }
        }
    };
    for event in events::drain(&rx) {
        print_event(&event);
    }

    println!();
    let mut failed = 0;
    for result in &results {
        let outcome = &result.outcome;
        let status = if outcome.success { "OK" } else { "FAILED" };
        println!(
            "{:<24} {:<7} {:>12} bytes {:>8.2} s  {}",
            result.file,
            status,
            outcome.bytes,
            outcome.elapsed_secs(),
            result
                .estimate
                .map(|e| format!("(estimate {})", e))
                .unwrap_or_default()
        );
        if !outcome.success {
            failed += 1;
        }
    }
    info!("{} of {} transfers succeeded", results.len() - failed, results.len());

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
