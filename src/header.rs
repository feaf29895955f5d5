//! 패킷 헤더 코덱
//!
//! 모든 프레임의 앞 12바이트. 다중 바이트 필드는 Big Endian.
//!
//! ```text
//! ┌────────────────┬─────────┬────────────┬──────────┬──────────┬───────────┐
//! │ flags | len_hi │ len_lo  │ session id │ ack id   │ reserved │ packet id │
//! │ 5bit  | 3bit   │ 1 byte  │ 2 bytes    │ 2 bytes  │ 4 bytes  │ 2 bytes   │
//! └────────────────┴─────────┴────────────┴──────────┴──────────┴───────────┘
//! ```
//!
//! 헤더 비트 조작은 이 모듈 안에서만 일어난다. 상위 계층은 [`PacketHeader`]만 다룬다.

use std::ops::{BitOr, BitOrAssign};

/// 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 12;

/// 11비트 길이 필드로 표현 가능한 최대 페이로드 길이
pub const MAX_PAYLOAD_LEN: usize = 0x07FF;

/// 헤더 플래그 (5비트)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Flags(u8);

impl Flags {
    /// 수신측에 ACK 요청
    pub const ACK_REQUEST: Self = Self(0x01);

    /// 핸드쉐이크
    pub const HELLO: Self = Self(0x02);

    /// 재전송된 프레임
    pub const RESEND: Self = Self(0x04);

    /// 지정 ID 이후의 프레임 재전송 요청
    pub const REQUEST_NEXT_AFTER: Self = Self(0x08);

    /// ACK
    pub const ACK: Self = Self(0x10);

    const MASK: u8 = 0x1F;

    /// 로컬 패킷 ID를 받지 않는 플래그 조합
    const NO_PACKET_ID: u8 = Self::HELLO.0 | Self::ACK.0 | Self::REQUEST_NEXT_AFTER.0;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// 상위 비트는 버림
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// 이 플래그로 보내는 프레임이 새 로컬 패킷 ID를 받는지
    pub const fn assigns_packet_id(self) -> bool {
        self.0 & Self::NO_PACKET_ID == 0
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 송신 방향 패킷 ID 카운터
///
/// 0에서 시작하며, ID를 할당할 때마다 먼저 증가시킨다 (첫 ID = 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalPacketCounter {
    last: u16,
}

impl LocalPacketCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 마지막으로 할당한 ID
    pub fn current(&self) -> u16 {
        self.last
    }

    /// 무조건 새 ID 할당
    pub fn next_id(&mut self) -> u16 {
        self.last = self.last.wrapping_add(1);
        self.last
    }

    /// 플래그가 허용하면 새 ID, 아니면 0
    pub fn assign(&mut self, flags: Flags) -> u16 {
        if flags.assigns_packet_id() {
            self.next_id()
        } else {
            0
        }
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}

/// 디코딩된 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// 플래그
    pub flags: Flags,

    /// 헤더 뒤 페이로드 길이 (11비트)
    pub payload_length: u16,

    /// 세션 ID
    pub session_id: u16,

    /// 확인(ACK)하는 상대방 패킷 ID (byte 4-5)
    pub ack_packet_id: u16,

    /// 예약 / 마커 바이트 (byte 6-9)
    pub reserved: [u8; 4],

    /// 보낸 쪽의 패킷 ID (byte 10-11)
    pub packet_id: u16,
}

impl PacketHeader {
    pub fn new(flags: Flags, payload_length: u16, session_id: u16) -> Self {
        Self {
            flags,
            payload_length,
            session_id,
            ..Self::default()
        }
    }

    /// 헤더 + 페이로드 전체 길이
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }

    /// 12바이트로 인코딩
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// 기존 버퍼에 인코딩
    ///
    /// # Panics
    ///
    /// 버퍼가 `HEADER_SIZE`보다 작으면 패닉
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        let length = self.payload_length & MAX_PAYLOAD_LEN as u16;
        buf[0] = (self.flags.bits() << 3) | ((length >> 8) as u8 & 0x07);
        buf[1] = (length & 0xFF) as u8;
        buf[2..4].copy_from_slice(&self.session_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.ack_packet_id.to_be_bytes());
        buf[6..10].copy_from_slice(&self.reserved);
        buf[10..12].copy_from_slice(&self.packet_id.to_be_bytes());
    }

    /// 헤더 디코딩
    ///
    /// 12바이트 미만이면 None. 길이 필드의 정합성은 검사하지 않는다.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }

        Some(Self {
            flags: Flags::from_bits_truncate(buf[0] >> 3),
            payload_length: u16::from_be_bytes([buf[0] & 0x07, buf[1]]),
            session_id: u16::from_be_bytes([buf[2], buf[3]]),
            ack_packet_id: u16::from_be_bytes([buf[4], buf[5]]),
            reserved: [buf[6], buf[7], buf[8], buf[9]],
            packet_id: u16::from_be_bytes([buf[10], buf[11]]),
        })
    }
}

/// 송신 헤더 인코딩
///
/// `assign_local_id`가 true이고 플래그가 Hello / Ack / RequestNextAfter를 포함하지 않으면
/// 카운터를 먼저 증가시켜 byte 10-11에 기록한다. 그 외에는 0.
pub fn encode_header(
    flags: Flags,
    payload_length: u16,
    session_id: u16,
    remote_echo_id: u16,
    counter: &mut LocalPacketCounter,
    assign_local_id: bool,
) -> [u8; HEADER_SIZE] {
    let packet_id = if assign_local_id {
        counter.assign(flags)
    } else {
        0
    };

    PacketHeader {
        flags,
        payload_length,
        session_id,
        ack_packet_id: remote_echo_id,
        reserved: [0; 4],
        packet_id,
    }
    .encode()
}

/// 수신 헤더 디코딩
pub fn decode_header(buf: &[u8]) -> Option<PacketHeader> {
    PacketHeader::decode(buf)
}
