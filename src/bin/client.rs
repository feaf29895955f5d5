//! 스위처 클라이언트
//!
//! 스위처에 연결해 초기 상태를 동기화하고 명령을 보낸다
//! - 누락된 초기 패킷은 RequestNextAfter로 하나씩 재요청
//! - --watch 로 이후 상태 변경을 계속 출력
//!
//! 사용법:
//!   cargo run --release --bin swlink-client -- [OPTIONS]
//!
//! 예시:
//!   # 상태만 조회
//!   cargo run --release --bin swlink-client -- --switcher 192.168.10.240:9910
//!
//!   # Preview 4 선택 후 Cut
//!   cargo run --release --bin swlink-client -- -s 127.0.0.1:9910 --preview 4 --cut

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use swlink::{Command, Config, Error, SwitcherClient, SwitcherEvent, DEFAULT_PORT};

/// 클라이언트 설정
struct ClientConfig {
    switcher_addr: SocketAddr,
    bind_addr: SocketAddr,
    commands: Vec<Command>,
    watch: bool,
    lan: bool,
    unstable: bool,
    verbose: bool,
    sync_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            switcher_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            commands: Vec::new(),
            watch: false,
            lan: false,
            unstable: false,
            verbose: false,
            sync_timeout: Duration::from_secs(10),
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--switcher" | "-s" => {
                if i + 1 < args.len() {
                    config.switcher_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--program" => {
                if i + 1 < args.len() {
                    let input = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.commands.push(Command::SetProgram(input));
                    i += 1;
                }
            }
            "--preview" => {
                if i + 1 < args.len() {
                    let input = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.commands.push(Command::SetPreview(input));
                    i += 1;
                }
            }
            "--aux" => {
                if i + 1 < args.len() {
                    let (bus, input) = args[i + 1]
                        .split_once(':')
                        .expect("BUS:INPUT 형식 필요");
                    config.commands.push(Command::SetAux {
                        bus: bus.parse().expect("유효한 버스 번호 필요"),
                        input: input.parse().expect("유효한 숫자 필요"),
                    });
                    i += 1;
                }
            }
            "--cut" => config.commands.push(Command::Cut),
            "--auto" => config.commands.push(Command::Auto),
            "--watch" | "-w" => config.watch = true,
            "--lan" => config.lan = true,
            "--unstable" => config.unstable = true,
            "--timeout" => {
                if i + 1 < args.len() {
                    let secs = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.sync_timeout = Duration::from_secs(secs);
                    i += 1;
                }
            }
            "--verbose" | "-v" => config.verbose = true,
            "--help" | "-h" => {
                println!(
                    r#"swlink-client - 스위처 클라이언트

Hello 핸드쉐이크 후 초기 상태를 동기화하고 버스 명령을 전송

사용법:
  cargo run --release --bin swlink-client -- [OPTIONS]

옵션:
  -s, --switcher <ADDR>  스위처 주소 (기본: 127.0.0.1:9910)
  -b, --bind <ADDR>      로컬 바인드 주소 (기본: 0.0.0.0:0 = 자동 할당)
  --program <INPUT>      Program 입력 변경
  --preview <INPUT>      Preview 입력 변경
  --aux <BUS:INPUT>      AUX 버스 입력 변경 (버스 0~7)
  --cut                  Cut 트랜지션
  --auto                 Auto 트랜지션
  -w, --watch            Ctrl+C 까지 상태 변경 출력
  --lan                  LAN 프리셋 (짧은 재시도 간격)
  --unstable             불안정 네트워크 프리셋 (긴 재시도 간격, 많은 재시도)
  --timeout <SECS>       초기 동기화 대기 시간 (기본: 10)
  -v, --verbose          디버그 로그 출력
  -h, --help             이 도움말 출력

예시:
  # Program 2, AUX 1번에 입력 5
  cargo run --release --bin swlink-client -- --program 2 --aux 1:5

  # 상태 변경 모니터링
  cargo run --release --bin swlink-client -- -s 192.168.10.240:9910 --watch
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
    let client_config = parse_args();

    // 로깅 설정
    let level = if client_config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = if client_config.lan {
        Config::lan(client_config.switcher_addr)
    } else if client_config.unstable {
        Config::unstable_network(client_config.switcher_addr)
    } else {
        Config::with_remote(client_config.switcher_addr)
    };
    config.bind_addr = client_config.bind_addr;

    info!("Switcher client starting...");
    info!("Switcher address: {}", config.remote_addr);

    let (client, mut events) = SwitcherClient::connect(config).await?;

    // === Phase 1: 초기 상태 동기화 ===
    let synced = tokio::time::timeout(client_config.sync_timeout, async {
        while let Some(event) = events.recv().await {
            match event {
                SwitcherEvent::ConnectionReady => return true,
                SwitcherEvent::Disconnected => return false,
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !synced {
        warn!("초기 상태 동기화 실패");
        let attempts = client.stats().handshake_attempts;
        client.disconnect().await;
        return Err(Error::HandshakeTimeout { attempts }.into());
    }

    let state = client.state();
    info!("Initial state synced:");
    info!("  Program: {}", state.program_input);
    info!("  Preview: {}", state.preview_input);
    for (bus, input) in state.aux_inputs.iter().enumerate() {
        info!("  AUX {}: {}", bus, input);
    }

    // === Phase 2: 명령 전송 ===
    for command in &client_config.commands {
        info!("Sending {:?}", command);
        if let Err(e) = client.command(*command).await {
            warn!("명령 실패: {:?}: {}", command, e);
        }
    }

    // === Phase 3: 모니터링 ===
    if client_config.watch {
        info!("Watching for changes (Ctrl+C to stop)...");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SwitcherEvent::Disconnected) | None => {
                        warn!("스위처 연결 종료");
                        break;
                    }
                    Some(event) => info!("{:?}", event),
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    } else {
        // 명령 에코를 받을 시간
        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(event) = events.try_recv() {
            info!("{:?}", event);
        }
    }

    let stats = client.stats();
    client.disconnect().await;

    info!("Session complete!");
    info!("  {}", stats.summary());

    Ok(())
}
