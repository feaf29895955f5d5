//! 에러 타입 정의

use thiserror::Error;

/// Switcher Link 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("프레임이 너무 짧음: {len} bytes (헤더 12 bytes 필요)")]
    FrameTooShort { len: usize },

    #[error("길이 필드 불일치: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("페이로드 크기 초과: {len} bytes (최대 {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("세션이 아직 준비되지 않음")]
    NotReady,

    #[error("유효하지 않은 AUX 버스: {bus}")]
    InvalidAuxBus { bus: u8 },

    #[error("핸드쉐이크 타임아웃: {attempts}회 시도")]
    HandshakeTimeout { attempts: u32 },

    #[error("채널 에러")]
    ChannelError,

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
