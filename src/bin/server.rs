//! 스위처 시뮬레이터
//!
//! 실제 스위처 없이 클라이언트를 시험하기 위한 UDP 서버
//! - Hello 응답 후 초기 상태 덤프 전송
//! - 지정한 패킷을 드롭해 갭 채우기 경로 재현
//!
//! 사용법:
//!   cargo run --release --bin swlink-sim -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트에서 실행
//!   cargo run --release --bin swlink-sim -- --bind 0.0.0.0:9910
//!
//!   # 2, 4번 패킷을 드롭하고 Program 3으로 시작
//!   cargo run --release --bin swlink-sim -- --drop 2,4 --program 3

use std::net::SocketAddr;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use swlink::{SimulatorOptions, SimulatorServer, DEFAULT_PORT};

/// 시뮬레이터 설정
struct SimConfig {
    bind_addr: SocketAddr,
    options: SimulatorOptions,
    verbose: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            options: SimulatorOptions::default(),
            verbose: false,
        }
    }
}

fn parse_args() -> SimConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SimConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--program" => {
                if i + 1 < args.len() {
                    config.options.initial_state.program_input =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--preview" => {
                if i + 1 < args.len() {
                    config.options.initial_state.preview_input =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--drop" => {
                if i + 1 < args.len() {
                    config.options.drop_packet_ids = args[i + 1]
                        .split(',')
                        .map(|id| id.trim().parse().expect("유효한 패킷 ID 필요"))
                        .collect();
                    i += 1;
                }
            }
            "--loss" => {
                if i + 1 < args.len() {
                    config.options.drop_ratio = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--fillers" => {
                if i + 1 < args.len() {
                    config.options.filler_frames = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"swlink-sim - 스위처 시뮬레이터

Hello 핸드쉐이크, 초기 상태 덤프, RequestNextAfter 재전송,
Program / Preview / AUX / Cut / Auto 명령을 흉내 내는 UDP 서버

사용법:
  cargo run --release --bin swlink-sim -- [OPTIONS]

옵션:
  -b, --bind <ADDR>     바인드 주소 (기본: 0.0.0.0:9910)
  --program <INPUT>     시작 Program 입력 (기본: 0)
  --preview <INPUT>     시작 Preview 입력 (기본: 0)
  --drop <IDS>          첫 전송에서 드롭할 덤프 패킷 ID (예: 2,4)
  --loss <RATIO>        페이로드 프레임 무작위 드롭 비율 0.0~1.0 (기본: 0)
  --fillers <N>         덤프에 넣을 InPr 프레임 수 (기본: 4)
  -v, --verbose         디버그 로그 출력
  -h, --help            이 도움말 출력

예시:
  # 로컬에서 실행
  cargo run --release --bin swlink-sim -- --bind 127.0.0.1:9910

  # 손실이 많은 네트워크 흉내
  cargo run --release --bin swlink-sim -- --loss 0.3
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sim_config = parse_args();

    // 로깅 설정
    let level = if sim_config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Switcher simulator starting...");
    info!("Bind address: {}", sim_config.bind_addr);
    info!(
        "Initial state: program={}, preview={}",
        sim_config.options.initial_state.program_input,
        sim_config.options.initial_state.preview_input
    );
    if !sim_config.options.drop_packet_ids.is_empty() {
        info!("Dropping dump packets: {:?}", sim_config.options.drop_packet_ids);
    }

    let server = SimulatorServer::bind(sim_config.bind_addr, sim_config.options).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}
