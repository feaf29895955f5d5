//! 송신 프레임 생성
//!
//! - 제어 프레임: Hello, Hello 응답, ACK, RequestNextAfter
//! - 명령 프레임: 버스 변경 (CPgI / CPvI / CAuS), 트랜지션 (DCut / DAut)
//!
//! 명령 블록 레이아웃은 파서와 같다: 길이(2) + 예약(2) + 태그(4) + 필드

use bytes::{BufMut, Bytes, BytesMut};

use crate::header::{
    encode_header, Flags, LocalPacketCounter, PacketHeader, HEADER_SIZE, MAX_PAYLOAD_LEN,
};
use crate::parser::BLOCK_HEADER_SIZE;
use crate::{Error, Result, AUX_BUS_COUNT};

/// 클라이언트 → 스위처 명령 태그
pub mod tags {
    /// Program 입력 변경
    pub const CHANGE_PROGRAM_INPUT: [u8; 4] = *b"CPgI";
    /// Preview 입력 변경
    pub const CHANGE_PREVIEW_INPUT: [u8; 4] = *b"CPvI";
    /// AUX 소스 변경
    pub const CHANGE_AUX_SOURCE: [u8; 4] = *b"CAuS";
    /// Cut
    pub const CUT: [u8; 4] = *b"DCut";
    /// Auto 트랜지션
    pub const AUTO: [u8; 4] = *b"DAut";
}

/// Hello / Hello 응답의 byte 9 마커
pub const HELLO_MARKER: u8 = 0x3A;
pub const HELLO_ANSWER_MARKER: u8 = 0x03;

/// Hello 페이로드 (byte 12 = 0x01, 나머지 0)
pub const HELLO_PAYLOAD_LEN: usize = 8;
pub const HELLO_PAYLOAD_MARKER: u8 = 0x01;

/// RequestNextAfter의 byte 8 마커
pub const REQUEST_NEXT_AFTER_MARKER: u8 = 0x01;

/// CAuS 첫 필드 (설정 마스크)
pub const AUX_SET_MASK: u8 = 0x01;

/// 명령 블록의 태그 필드 길이
const COMMAND_FIELDS_LEN: usize = 4;

/// 버스 변경 명령 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusChangeTag {
    Program,
    Preview,
    Aux,
}

impl BusChangeTag {
    pub fn tag(self) -> [u8; 4] {
        match self {
            BusChangeTag::Program => tags::CHANGE_PROGRAM_INPUT,
            BusChangeTag::Preview => tags::CHANGE_PREVIEW_INPUT,
            BusChangeTag::Aux => tags::CHANGE_AUX_SOURCE,
        }
    }
}

/// 트랜지션 명령 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTag {
    Cut,
    Auto,
}

impl TriggerTag {
    pub fn tag(self) -> [u8; 4] {
        match self {
            TriggerTag::Cut => tags::CUT,
            TriggerTag::Auto => tags::AUTO,
        }
    }
}

/// 애플리케이션 명령
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetProgram(u16),
    SetPreview(u16),
    SetAux { bus: u8, input: u16 },
    Cut,
    Auto,
}

/// 버스 변경 블록
///
/// CPgI / CPvI: `[예약 0, 예약 0, input(2)]`
/// CAuS: `[마스크, aux 번호, input(2)]`
pub fn bus_change_block(
    tag: BusChangeTag,
    bus_index: Option<u8>,
    input_id: u16,
) -> Result<BytesMut> {
    let mut block = BytesMut::with_capacity(BLOCK_HEADER_SIZE + COMMAND_FIELDS_LEN);
    put_block_header(&mut block, tag.tag());

    match tag {
        BusChangeTag::Program | BusChangeTag::Preview => {
            block.put_u8(0);
            block.put_u8(0);
        }
        BusChangeTag::Aux => {
            let bus = bus_index.ok_or(Error::InvalidAuxBus { bus: u8::MAX })?;
            if bus as usize >= AUX_BUS_COUNT {
                return Err(Error::InvalidAuxBus { bus });
            }
            block.put_u8(AUX_SET_MASK);
            block.put_u8(bus);
        }
    }
    block.put_u16(input_id);

    Ok(block)
}

/// 트랜지션 블록: `[ME 0, 예약 0, 0, 0]`
pub fn trigger_block(tag: TriggerTag) -> BytesMut {
    let mut block = BytesMut::with_capacity(BLOCK_HEADER_SIZE + COMMAND_FIELDS_LEN);
    put_block_header(&mut block, tag.tag());
    block.put_bytes(0, COMMAND_FIELDS_LEN);
    block
}

fn put_block_header(block: &mut BytesMut, tag: [u8; 4]) {
    block.put_u16((BLOCK_HEADER_SIZE + COMMAND_FIELDS_LEN) as u16);
    block.put_u16(0);
    block.put_slice(&tag);
}

/// 헤더 + 페이로드로 프레임 조립. 헤더의 길이 필드는 페이로드에 맞춰 덮어쓴다
pub fn encode_frame(mut header: PacketHeader, payload: &[u8]) -> Result<Bytes> {
    check_payload_len(payload.len())?;
    header.payload_length = payload.len() as u16;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn check_payload_len(len: usize) -> Result<()> {
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

fn control_frame(header: PacketHeader) -> Bytes {
    Bytes::copy_from_slice(&header.encode())
}

/// Hello 프레임 (20 bytes)
pub fn hello_frame(session_id: u16) -> Bytes {
    let mut header = PacketHeader::new(Flags::HELLO, HELLO_PAYLOAD_LEN as u16, session_id);
    header.reserved[3] = HELLO_MARKER;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + HELLO_PAYLOAD_LEN);
    buf.put_slice(&header.encode());
    buf.put_u8(HELLO_PAYLOAD_MARKER);
    buf.put_bytes(0, HELLO_PAYLOAD_LEN - 1);
    buf.freeze()
}

/// 원격 Hello에 대한 응답 ACK (12 bytes)
pub fn hello_answer_frame(session_id: u16) -> Bytes {
    let mut header = PacketHeader::new(Flags::ACK, 0, session_id);
    header.reserved[3] = HELLO_ANSWER_MARKER;
    control_frame(header)
}

/// `remote_packet_id`에 대한 ACK (12 bytes)
pub fn ack_frame(session_id: u16, remote_packet_id: u16) -> Bytes {
    let mut header = PacketHeader::new(Flags::ACK, 0, session_id);
    header.ack_packet_id = remote_packet_id;
    control_frame(header)
}

/// `missing_id`부터 다시 보내 달라는 요청 (12 bytes)
///
/// byte 6-7 = `missing_id - 1`, byte 8 = 마커
pub fn request_next_after_frame(session_id: u16, missing_id: u16) -> Bytes {
    let after = missing_id.wrapping_sub(1).to_be_bytes();
    let mut header = PacketHeader::new(Flags::REQUEST_NEXT_AFTER, 0, session_id);
    header.reserved = [after[0], after[1], REQUEST_NEXT_AFTER_MARKER, 0];
    control_frame(header)
}

/// RequestNextAfter 프레임에서 요청된 "이후" ID 추출
pub fn requested_after(header: &PacketHeader) -> u16 {
    u16::from_be_bytes([header.reserved[0], header.reserved[1]])
}

/// 명령 프레임 생성기
///
/// 세션 ID와 송신 카운터를 빌려 AckRequest 플래그 + 새 패킷 ID로 블록을 감싼다.
pub struct CommandBuilder<'a> {
    session_id: u16,
    counter: &'a mut LocalPacketCounter,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(session_id: u16, counter: &'a mut LocalPacketCounter) -> Self {
        Self {
            session_id,
            counter,
        }
    }

    /// 버스 변경 프레임
    pub fn build_bus_change(
        &mut self,
        tag: BusChangeTag,
        bus_index: Option<u8>,
        input_id: u16,
    ) -> Result<Bytes> {
        let block = bus_change_block(tag, bus_index, input_id)?;
        self.wrap(&block)
    }

    /// 트랜지션 프레임
    pub fn build_trigger(&mut self, tag: TriggerTag) -> Result<Bytes> {
        let block = trigger_block(tag);
        self.wrap(&block)
    }

    pub fn build(&mut self, command: &Command) -> Result<Bytes> {
        match *command {
            Command::SetProgram(input) => {
                self.build_bus_change(BusChangeTag::Program, None, input)
            }
            Command::SetPreview(input) => {
                self.build_bus_change(BusChangeTag::Preview, None, input)
            }
            Command::SetAux { bus, input } => {
                self.build_bus_change(BusChangeTag::Aux, Some(bus), input)
            }
            Command::Cut => self.build_trigger(TriggerTag::Cut),
            Command::Auto => self.build_trigger(TriggerTag::Auto),
        }
    }

    fn wrap(&mut self, block: &[u8]) -> Result<Bytes> {
        check_payload_len(block.len())?;
        let header = encode_header(
            Flags::ACK_REQUEST,
            block.len() as u16,
            self.session_id,
            0,
            &mut *self.counter,
            true,
        );

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + block.len());
        buf.put_slice(&header);
        buf.put_slice(block);
        Ok(buf.freeze())
    }
}
