//! 명령 블록 파서
//!
//! 페이로드는 자기 길이를 가진 블록의 연속이다.
//!
//! ```text
//! ┌──────────────┬──────────┬──────────┬──────────────┐
//! │ block length │ reserved │ tag      │ tag fields   │
//! │ 2 bytes BE   │ 2 bytes  │ 4 ASCII  │ ...          │
//! └──────────────┴──────────┴──────────┴──────────────┘
//! ```
//!
//! 파서는 상태를 갖지 않는다. 같은 페이로드는 항상 같은 이벤트 목록이 된다.

use tracing::debug;

use crate::state::SwitcherEvent;
use crate::{AUX_BUS_COUNT, MAX_PARSE_BLOCKS};

/// 블록 헤더 크기 (길이 + 예약 + 태그)
pub const BLOCK_HEADER_SIZE: usize = 8;

/// 스위처 → 클라이언트 블록 태그
pub mod tags {
    /// Program 입력
    pub const PROGRAM_INPUT: [u8; 4] = *b"PrgI";
    /// Preview 입력
    pub const PREVIEW_INPUT: [u8; 4] = *b"PrvI";
    /// AUX 소스
    pub const AUX_SOURCE: [u8; 4] = *b"AuxS";
    /// 입력 속성 (이름 등)
    pub const INPUT_PROPERTIES: [u8; 4] = *b"InPr";
}

/// 블록 필드 오프셋 (블록 시작 기준)
const BUS_INPUT_OFFSET: usize = 10;
const AUX_INPUT_OFFSET: usize = 11;

/// AUX 버스 번호는 페이로드 전체 기준 오프셋에서 읽는다
const AUX_BUS_PAYLOAD_OFFSET: usize = 9;

/// 페이로드 범위를 벗어난 읽기
#[derive(Debug)]
struct Truncated;

/// 기본 블록 제한으로 파싱
pub fn parse(payload: &[u8]) -> Vec<SwitcherEvent> {
    parse_with_limit(payload, MAX_PARSE_BLOCKS)
}

/// 최대 `max_blocks`개 블록까지 파싱
///
/// 길이 8 이하 블록을 만나면 멈추고, 범위를 벗어난 읽기가 생기면
/// 그때까지의 이벤트만 반환한다. 에러는 호출자에게 올라가지 않는다.
pub fn parse_with_limit(payload: &[u8], max_blocks: usize) -> Vec<SwitcherEvent> {
    let mut events = Vec::new();
    let mut cursor = 0usize;

    for _ in 0..max_blocks {
        let Ok(block_length) = read_u16(payload, cursor) else {
            break;
        };
        let block_length = block_length as usize;

        // 종료 마커 또는 손상된 블록
        if block_length <= BLOCK_HEADER_SIZE {
            break;
        }

        match parse_block(payload, cursor) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(Truncated) => {
                debug!(
                    "블록이 페이로드 밖으로 넘어감: offset={}, length={}, payload={} bytes",
                    cursor,
                    block_length,
                    payload.len()
                );
                break;
            }
        }

        cursor += block_length;
    }

    events
}

fn parse_block(payload: &[u8], start: usize) -> Result<Option<SwitcherEvent>, Truncated> {
    let tag: [u8; 4] = payload
        .get(start + 4..start + BLOCK_HEADER_SIZE)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Truncated)?;

    let event = match tag {
        tags::PROGRAM_INPUT => Some(SwitcherEvent::ProgramChanged(read_u16(
            payload,
            start + BUS_INPUT_OFFSET,
        )?)),
        tags::PREVIEW_INPUT => Some(SwitcherEvent::PreviewChanged(read_u16(
            payload,
            start + BUS_INPUT_OFFSET,
        )?)),
        tags::AUX_SOURCE => {
            // 블록이 아니라 페이로드 기준 바이트. 첫 블록일 때만 블록 필드와 일치한다
            let bus = *payload.get(AUX_BUS_PAYLOAD_OFFSET).ok_or(Truncated)?;
            let bus = bus.min(AUX_BUS_COUNT as u8 - 1);
            let input = read_u16(payload, start + AUX_INPUT_OFFSET)?;
            Some(SwitcherEvent::AuxChanged { bus, input })
        }
        tags::INPUT_PROPERTIES => None,
        other => {
            debug!("알 수 없는 블록 태그: {:?}", String::from_utf8_lossy(&other));
            None
        }
    };

    Ok(event)
}

fn read_u16(payload: &[u8], offset: usize) -> Result<u16, Truncated> {
    match payload.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(Truncated),
    }
}
