//! 프로토콜 설정

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::{DEFAULT_PORT, DEFAULT_SESSION_ID, INIT_WINDOW, MAX_PARSE_BLOCKS};

/// Switcher Link 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 스위처 주소
    pub remote_addr: SocketAddr,

    /// 로컬 바인드 주소 (포트 0 = 자동 할당)
    pub bind_addr: SocketAddr,

    /// Hello에 사용하는 초기 세션 ID
    /// 이후 세션 ID는 스위처가 할당한 값을 따름
    pub initial_session_id: u16,

    /// 초기 상태 전송 추적 윈도우 (패킷 ID 수)
    pub init_window: usize,

    /// 페이로드당 최대 파싱 블록 수
    pub max_parse_blocks: usize,

    /// 수신 대기 타임아웃 (밀리초)
    /// 이 시간 동안 아무것도 받지 못하면 Hello / 갭 채우기 요청을 재전송
    pub retry_interval_ms: u64,

    /// Hello 재전송 최대 횟수
    pub handshake_retries: u32,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 이벤트 채널 용량
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            initial_session_id: DEFAULT_SESSION_ID,
            init_window: INIT_WINDOW,
            max_parse_blocks: MAX_PARSE_BLOCKS,
            retry_interval_ms: 500,       // 500ms
            handshake_retries: 20,
            recv_buffer_size: 2048,       // 프레임 최대 12 + 2047 bytes
            event_channel_capacity: 256,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 스위처 주소만 지정한 기본 설정
    pub fn with_remote(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            ..Self::default()
        }
    }

    /// 같은 LAN 안의 스위처용 설정
    pub fn lan(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            retry_interval_ms: 200,
            handshake_retries: 10,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            retry_interval_ms: 1000,
            handshake_retries: 60,
            event_channel_capacity: 1024,
            ..Self::default()
        }
    }

    /// 재전송 대기 시간
    pub fn retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_interval_ms)
    }
}
