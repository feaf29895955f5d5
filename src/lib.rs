//! # Switcher Link
//!
//! UDP 위에서 동작하는 비디오 스위처 상태 동기화 프로토콜
//!
//! ## 핵심 특징
//! - **12바이트 헤더**: 플래그 + 길이 + 세션 ID + 패킷 ID
//! - **초기 상태 덤프**: 핸드쉐이크 직후 스위처 전체 상태를 일괄 수신
//! - **갭 채우기**: 누락된 초기 패킷을 한 번에 하나씩 재요청 (RequestNextAfter)
//! - **명령 블록**: 자기 길이를 가진 블록 스트림 (PrgI / PrvI / AuxS)
//! - **버스 제어**: Program / Preview / AUX 버스 변경, Cut / Auto 트랜지션
//! - **I/O 분리**: 상태 머신은 액션만 반환, 실제 송수신은 드라이버가 담당

pub mod builder;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod header;
pub mod parser;
pub mod simulator;
pub mod state;
pub mod stats;
pub mod tracker;
pub mod transport;

pub use builder::{BusChangeTag, Command, CommandBuilder, TriggerTag};
pub use client::{EventReceiver, SwitcherClient};
pub use config::Config;
pub use connection::{Connection, ConnectionAction, ConnectionState};
pub use error::{Error, Result};
pub use header::{Flags, LocalPacketCounter, PacketHeader, HEADER_SIZE};
pub use parser::parse;
pub use simulator::{SimulatedSwitcher, SimulatorOptions, SimulatorServer};
pub use state::{SwitcherEvent, SwitcherState};
pub use stats::LinkStats;
pub use tracker::MissingPacketTracker;
pub use transport::{Transport, UdpTransport};

/// 스위처 기본 UDP 포트
pub const DEFAULT_PORT: u16 = 9910;

/// 핸드쉐이크에 사용하는 초기 세션 ID
pub const DEFAULT_SESSION_ID: u16 = 0x53AB;

/// 초기 상태 전송을 추적하는 패킷 ID 윈도우 크기
pub const INIT_WINDOW: usize = 40;

/// AUX 버스 수
pub const AUX_BUS_COUNT: usize = 8;

/// 페이로드 하나당 최대 파싱 블록 수 (손상된 스트림 대비)
pub const MAX_PARSE_BLOCKS: usize = 99;
