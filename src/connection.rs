//! 연결 상태 머신
//!
//! I/O 없이 수신 프레임 하나씩을 받아 상태를 바꾸고, 드라이버가 실행할
//! [`ConnectionAction`] 목록을 돌려준다.
//!
//! ```text
//! ┌──────┐ connect ┌───────────┐ Hello ┌─────────┐  갭 발견  ┌─────────────────┐
//! │ Idle │────────>│ HelloSent │──────>│ Syncing │─────────>│ AwaitingGapFill │
//! └──────┘         └───────────┘       └─────────┘<─────────└─────────────────┘
//!    ^                                      │       갭 채워짐
//!    │ teardown / disconnect                │ 갭 없음
//!    └──────────────────────────────── ┌───────┐
//!                                      │ Ready │
//!                                      └───────┘
//! ```
//!
//! 초기 상태 전송:
//! 1. Hello 이후 스위처는 전체 상태를 여러 프레임으로 보낸다
//! 2. 페이로드 없는 12바이트 프레임 (packet id > 1)이 전송 끝 경계
//! 3. 경계 아래 누락 ID를 가장 작은 것부터 하나씩 RequestNextAfter로 재요청
//! 4. 누락이 없으면 모아 둔 페이로드를 한 번에 파싱하고 Ready

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::builder::{self, Command, CommandBuilder};
use crate::header::{decode_header, Flags, LocalPacketCounter, PacketHeader, HEADER_SIZE};
use crate::parser;
use crate::state::{SwitcherEvent, SwitcherState};
use crate::stats::LinkStats;
use crate::tracker::MissingPacketTracker;
use crate::{Config, Error, Result};

/// 원격 Hello 페이로드 byte 0: 세션 종료
pub const HELLO_TEARDOWN: u8 = 0x04;

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 세션 없음
    Idle,
    /// Hello 전송, 응답 대기
    HelloSent,
    /// 초기 상태 수신 중
    Syncing,
    /// 누락 패킷 하나를 재요청하고 대기 중
    AwaitingGapFill { missing_id: u16 },
    /// 초기 상태 반영 완료, 정상 운영
    Ready,
}

/// 드라이버가 실행할 동작
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// 프레임 송신
    SendFrame(Bytes),

    /// 소비자에게 이벤트 전달
    Emit(SwitcherEvent),

    /// 전송 계층 종료
    Teardown,
}

/// 단일 세션 상태 머신
pub struct Connection {
    initial_session_id: u16,
    max_parse_blocks: usize,
    handshake_retries: u32,

    state: ConnectionState,
    session_id: u16,
    counter: LocalPacketCounter,
    last_remote_packet_id: u16,

    /// 초기 전송 누락 비트맵 (Ready 이후에는 사용하지 않음)
    tracker: MissingPacketTracker,

    /// 초기 상태 페이로드 (packet id 순)
    init_buffer: BTreeMap<u16, Bytes>,

    init_payload_sent: bool,
    init_payload_sent_at_packet_id: u16,

    remote_up: bool,
    hello_retries: u32,

    switcher: SwitcherState,
    stats: LinkStats,
}

impl Connection {
    pub fn new(config: &Config) -> Self {
        Self {
            initial_session_id: config.initial_session_id,
            max_parse_blocks: config.max_parse_blocks,
            handshake_retries: config.handshake_retries,
            state: ConnectionState::Idle,
            session_id: config.initial_session_id,
            counter: LocalPacketCounter::new(),
            last_remote_packet_id: 0,
            tracker: MissingPacketTracker::new(config.init_window),
            init_buffer: BTreeMap::new(),
            init_payload_sent: false,
            init_payload_sent_at_packet_id: 0,
            remote_up: false,
            hello_retries: 0,
            switcher: SwitcherState::new(),
            stats: LinkStats::new(),
        }
    }

    /// 세션 초기화 후 Hello 전송
    pub fn connect(&mut self) -> Vec<ConnectionAction> {
        self.reset();
        self.stats = LinkStats::new();
        self.state = ConnectionState::HelloSent;

        info!("Hello 전송: session_id={:04X}", self.session_id);

        let mut actions = Vec::new();
        self.send_hello(&mut actions);
        actions
    }

    /// 세션 종료. 이미 Idle이면 아무것도 하지 않음
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Idle {
            return Vec::new();
        }

        info!("세션 종료: session_id={:04X}", self.session_id);
        self.reset();
        vec![ConnectionAction::Emit(SwitcherEvent::Disconnected)]
    }

    /// 수신 데이터그램 처리
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        self.stats.record_received(datagram.len());

        let header = match validate(datagram) {
            Ok(header) => header,
            Err(e) => {
                warn!("잘못된 프레임 무시: {}", e);
                self.stats.malformed_frames += 1;
                return actions;
            }
        };

        if self.state == ConnectionState::Idle {
            debug!("세션 없음, 프레임 무시: packet_id={}", header.packet_id);
            return actions;
        }

        let was_ready = self.state == ConnectionState::Ready;
        let flags = header.flags;
        let packet_id = header.packet_id;
        let resend = flags.contains(Flags::RESEND);
        let payload = &datagram[HEADER_SIZE..];

        self.session_id = header.session_id;
        self.last_remote_packet_id = packet_id;

        if !was_ready {
            self.tracker.observe(packet_id);
        }
        if resend {
            self.stats.resent_frames += 1;
            debug!("재전송 프레임 수신: packet_id={}", packet_id);
        }

        if flags.contains(Flags::HELLO) && !self.handle_hello(payload, &mut actions) {
            return actions;
        }

        if !self.init_payload_sent && datagram.len() == HEADER_SIZE && packet_id > 1 {
            self.init_payload_sent = true;
            self.init_payload_sent_at_packet_id = packet_id;
            info!("초기 상태 전송 경계 감지: packet_id={}", packet_id);
        }

        if !flags.contains(Flags::HELLO) && !payload.is_empty() {
            if was_ready {
                if !resend {
                    self.dispatch(payload, &mut actions);
                }
            } else if self.init_payload_sent || !resend {
                // 경계 이후에는 재전송 프레임으로만 갭이 채워진다
                self.init_buffer
                    .entry(packet_id)
                    .or_insert_with(|| Bytes::copy_from_slice(payload));
            }
        }

        if self.init_payload_sent
            && flags.contains(Flags::ACK_REQUEST)
            && (was_ready || !resend)
        {
            let ack = builder::ack_frame(self.session_id, packet_id);
            self.send(ack, &mut actions);
            self.stats.acks_sent += 1;
        }

        if self.init_payload_sent && !was_ready {
            self.advance_sync(&mut actions);
        }

        actions
    }

    /// 수신 대기 타임아웃 처리
    ///
    /// HelloSent: Hello 재전송 (제한 초과 시 종료)
    /// AwaitingGapFill: 같은 RequestNextAfter 재전송
    pub fn poll_timeout(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        match self.state {
            ConnectionState::HelloSent => {
                if self.hello_retries >= self.handshake_retries {
                    warn!(
                        "핸드쉐이크 실패: {}회 Hello 전송 후 응답 없음",
                        self.stats.handshake_attempts
                    );
                    self.reset();
                    actions.push(ConnectionAction::Emit(SwitcherEvent::Disconnected));
                    actions.push(ConnectionAction::Teardown);
                } else {
                    self.hello_retries += 1;
                    debug!("Hello 재전송 #{}", self.hello_retries);
                    self.send_hello(&mut actions);
                }
            }
            ConnectionState::AwaitingGapFill { missing_id } => {
                debug!("갭 채우기 재요청: packet_id={}", missing_id);
                self.request_gap_fill(missing_id, &mut actions);
            }
            _ => {}
        }

        actions
    }

    /// 명령 프레임 생성 (Ready 상태에서만)
    pub fn command(&mut self, command: &Command) -> Result<Bytes> {
        if self.state != ConnectionState::Ready {
            return Err(Error::NotReady);
        }

        let frame = CommandBuilder::new(self.session_id, &mut self.counter).build(command)?;
        self.stats.record_sent(frame.len());
        debug!(
            "명령 전송: {:?}, packet_id={}",
            command,
            self.counter.current()
        );
        Ok(frame)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Hello 응답을 받았는지
    pub fn is_remote_up(&self) -> bool {
        self.remote_up
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// 마지막으로 할당한 로컬 패킷 ID
    pub fn local_packet_id(&self) -> u16 {
        self.counter.current()
    }

    pub fn last_remote_packet_id(&self) -> u16 {
        self.last_remote_packet_id
    }

    pub fn init_payload_sent(&self) -> bool {
        self.init_payload_sent
    }

    pub fn init_payload_sent_at_packet_id(&self) -> u16 {
        self.init_payload_sent_at_packet_id
    }

    pub fn tracker(&self) -> &MissingPacketTracker {
        &self.tracker
    }

    pub fn switcher_state(&self) -> &SwitcherState {
        &self.switcher
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Idle;
        self.session_id = self.initial_session_id;
        self.counter.reset();
        self.last_remote_packet_id = 0;
        self.tracker.reset();
        self.init_buffer.clear();
        self.init_payload_sent = false;
        self.init_payload_sent_at_packet_id = 0;
        self.remote_up = false;
        self.hello_retries = 0;
        self.switcher.reset();
    }

    /// 원격 Hello 처리. 세션이 종료되면 false
    fn handle_hello(&mut self, payload: &[u8], actions: &mut Vec<ConnectionAction>) -> bool {
        if payload.first() == Some(&HELLO_TEARDOWN) {
            warn!("스위처가 세션 종료 요청: session_id={:04X}", self.session_id);
            self.reset();
            actions.push(ConnectionAction::Emit(SwitcherEvent::Disconnected));
            actions.push(ConnectionAction::Teardown);
            return false;
        }

        self.remote_up = true;
        let answer = builder::hello_answer_frame(self.session_id);
        self.send(answer, actions);

        if self.state == ConnectionState::HelloSent {
            info!("핸드쉐이크 완료, 초기 상태 수신 시작");
            self.state = ConnectionState::Syncing;
        }
        true
    }

    /// 갭 채우기 진행. 요청은 한 번에 하나만 나간다
    fn advance_sync(&mut self, actions: &mut Vec<ConnectionAction>) {
        if let ConnectionState::AwaitingGapFill { missing_id } = self.state {
            if self.tracker.is_missing(missing_id) {
                return;
            }
            debug!("갭 채워짐: packet_id={}", missing_id);
            self.state = ConnectionState::Syncing;
        }

        match self
            .tracker
            .first_missing_below(self.init_payload_sent_at_packet_id)
        {
            Some(missing_id) => {
                info!("누락 패킷 재요청: packet_id={}", missing_id);
                self.request_gap_fill(missing_id, actions);
                self.state = ConnectionState::AwaitingGapFill { missing_id };
            }
            None => self.finish_sync(actions),
        }
    }

    fn request_gap_fill(&mut self, missing_id: u16, actions: &mut Vec<ConnectionAction>) {
        let request = builder::request_next_after_frame(self.session_id, missing_id);
        self.send(request, actions);
        self.stats.gap_fill_requests += 1;
    }

    /// 초기 상태 버퍼를 하나의 페이로드로 파싱하고 Ready로 전환
    fn finish_sync(&mut self, actions: &mut Vec<ConnectionAction>) {
        let total: usize = self.init_buffer.values().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(total);
        for chunk in self.init_buffer.values() {
            payload.extend_from_slice(chunk);
        }

        info!(
            "초기 상태 동기화 완료: {} frames, {} bytes",
            self.init_buffer.len(),
            payload.len()
        );

        self.dispatch(&payload, actions);
        self.state = ConnectionState::Ready;
        self.stats.mark_ready();
        self.init_buffer.clear();

        actions.push(ConnectionAction::Emit(SwitcherEvent::ConnectionReady));
        self.stats.events_emitted += 1;
    }

    fn dispatch(&mut self, payload: &[u8], actions: &mut Vec<ConnectionAction>) {
        for event in parser::parse_with_limit(payload, self.max_parse_blocks) {
            self.switcher.apply(&event);
            actions.push(ConnectionAction::Emit(event));
            self.stats.events_emitted += 1;
        }
    }

    fn send_hello(&mut self, actions: &mut Vec<ConnectionAction>) {
        let hello = builder::hello_frame(self.session_id);
        self.send(hello, actions);
        self.stats.handshake_attempts += 1;
    }

    fn send(&mut self, frame: Bytes, actions: &mut Vec<ConnectionAction>) {
        self.stats.record_sent(frame.len());
        actions.push(ConnectionAction::SendFrame(frame));
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

/// 헤더 길이와 길이 필드 정합성 검사
fn validate(datagram: &[u8]) -> Result<PacketHeader> {
    let header = decode_header(datagram).ok_or(Error::FrameTooShort {
        len: datagram.len(),
    })?;

    let actual = datagram.len() - HEADER_SIZE;
    if header.payload_length as usize != actual {
        return Err(Error::LengthMismatch {
            declared: header.payload_length as usize,
            actual,
        });
    }

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::encode_frame;
    use crate::parser::tags;

    const SESSION: u16 = 0x8001;

    fn remote_frame(flags: Flags, packet_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut header = PacketHeader::new(flags, 0, SESSION);
        header.packet_id = packet_id;
        encode_frame(header, payload).unwrap().to_vec()
    }

    fn remote_hello(marker: u8) -> Vec<u8> {
        let mut payload = [0u8; 8];
        payload[0] = marker;
        remote_frame(Flags::HELLO, 0, &payload)
    }

    fn bus_block(tag: [u8; 4], input: u16) -> Vec<u8> {
        let mut block = vec![0, 12, 0, 0];
        block.extend_from_slice(&tag);
        block.extend_from_slice(&[0, 0]);
        block.extend_from_slice(&input.to_be_bytes());
        block
    }

    fn sent_frames(actions: &[ConnectionAction]) -> Vec<PacketHeader> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::SendFrame(f) => PacketHeader::decode(f),
                _ => None,
            })
            .collect()
    }

    fn emitted(actions: &[ConnectionAction]) -> Vec<SwitcherEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::Emit(e) => Some(*e),
                _ => None,
            })
            .collect()
    }

    fn ready_count(actions: &[ConnectionAction]) -> usize {
        emitted(actions)
            .iter()
            .filter(|e| **e == SwitcherEvent::ConnectionReady)
            .count()
    }

    #[test]
    fn test_connect_sends_hello() {
        let mut conn = Connection::default();
        let actions = conn.connect();

        assert_eq!(conn.state(), ConnectionState::HelloSent);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ConnectionAction::SendFrame(frame) => {
                assert_eq!(frame.len(), 20);
                let header = PacketHeader::decode(frame).unwrap();
                assert_eq!(header.flags, Flags::HELLO);
                assert_eq!(header.session_id, 0x53AB);
                assert_eq!(header.packet_id, 0);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_handshake_and_sync_scenario() {
        let mut conn = Connection::default();
        conn.connect();

        // Hello → 12바이트 ACK, 아직 Ready 아님
        let actions = conn.handle_datagram(&remote_hello(0x01));
        let sent = sent_frames(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].flags, Flags::ACK);
        assert_eq!(sent[0].reserved[3], builder::HELLO_ANSWER_MARKER);
        assert!(conn.is_remote_up());
        assert!(!conn.is_ready());

        // 경계 프레임
        conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 5, &[]));
        assert!(conn.init_payload_sent());
        assert_eq!(conn.init_payload_sent_at_packet_id(), 5);

        let mut total_ready = 0;
        for id in 0..5u16 {
            let block = bus_block(tags::PROGRAM_INPUT, 10 + id);
            let actions = conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, id, &block));
            total_ready += ready_count(&actions);
            if id < 4 {
                assert!(!conn.is_ready());
            }
        }

        assert!(conn.is_ready());
        assert_eq!(total_ready, 1);
        assert_eq!(conn.switcher_state().program_input, 14);
    }

    #[test]
    fn test_bulk_sync_fills_single_gap() {
        let mut conn = Connection::default();
        conn.connect();
        conn.handle_datagram(&remote_hello(0x02));

        let payloads: Vec<Vec<u8>> = vec![
            bus_block(tags::PROGRAM_INPUT, 1),
            bus_block(tags::PREVIEW_INPUT, 2),
            bus_block(tags::PROGRAM_INPUT, 3),
            bus_block(tags::PREVIEW_INPUT, 4),
            bus_block(tags::PROGRAM_INPUT, 5),
        ];

        for id in [0u16, 1, 3, 4] {
            let actions =
                conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, id, &payloads[id as usize]));
            // 경계 전에는 ACK도 갭 요청도 없다
            assert!(sent_frames(&actions).is_empty());
        }

        let actions = conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 5, &[]));
        let sent = sent_frames(&actions);
        let request = sent
            .iter()
            .find(|h| h.flags == Flags::REQUEST_NEXT_AFTER)
            .unwrap();
        assert_eq!(builder::requested_after(request), 1);
        assert_eq!(
            conn.state(),
            ConnectionState::AwaitingGapFill { missing_id: 2 }
        );

        let actions = conn.handle_datagram(&remote_frame(
            Flags::ACK_REQUEST | Flags::RESEND,
            2,
            &payloads[2],
        ));
        assert_eq!(ready_count(&actions), 1);
        assert!(conn.is_ready());

        let mut expected = SwitcherState::new();
        for event in parser::parse(&payloads.concat()) {
            expected.apply(&event);
        }
        assert_eq!(*conn.switcher_state(), expected);
        assert_eq!(conn.switcher_state().program_input, 5);
        assert_eq!(conn.switcher_state().preview_input, 4);

        // 이후 프레임은 다시 Ready 이벤트를 만들지 않는다
        let actions = conn.handle_datagram(&remote_frame(
            Flags::ACK_REQUEST,
            6,
            &bus_block(tags::PROGRAM_INPUT, 9),
        ));
        assert_eq!(ready_count(&actions), 0);
        assert_eq!(emitted(&actions), vec![SwitcherEvent::ProgramChanged(9)]);
    }

    #[test]
    fn test_single_outstanding_gap_request() {
        let mut conn = Connection::default();
        conn.connect();
        conn.handle_datagram(&remote_hello(0x02));
        conn.handle_datagram(&remote_frame(
            Flags::ACK_REQUEST,
            1,
            &bus_block(tags::PROGRAM_INPUT, 1),
        ));

        // 2, 3 누락
        let actions = conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 4, &[]));
        let requests = sent_frames(&actions)
            .into_iter()
            .filter(|h| h.flags == Flags::REQUEST_NEXT_AFTER)
            .count();
        assert_eq!(requests, 1);

        // 관련 없는 프레임은 추가 요청을 만들지 않는다
        let actions = conn.handle_datagram(&remote_frame(Flags::empty(), 60, &[]));
        assert!(sent_frames(&actions)
            .iter()
            .all(|h| h.flags != Flags::REQUEST_NEXT_AFTER));

        // 타임아웃이면 같은 ID를 다시 요청
        let actions = conn.poll_timeout();
        let sent = sent_frames(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(builder::requested_after(&sent[0]), 1);

        // 2가 오면 다음 갭 3 요청
        let actions = conn.handle_datagram(&remote_frame(
            Flags::RESEND,
            2,
            &bus_block(tags::PROGRAM_INPUT, 2),
        ));
        let sent = sent_frames(&actions);
        assert_eq!(builder::requested_after(&sent[0]), 2);
        assert_eq!(conn.state(), ConnectionState::AwaitingGapFill { missing_id: 3 });

        let actions = conn.handle_datagram(&remote_frame(
            Flags::RESEND,
            3,
            &bus_block(tags::PROGRAM_INPUT, 3),
        ));
        assert_eq!(ready_count(&actions), 1);
        assert_eq!(conn.switcher_state().program_input, 3);
        assert_eq!(conn.stats().gap_fill_requests, 3);
    }

    #[test]
    fn test_remote_teardown() {
        let mut conn = Connection::default();
        conn.connect();

        let actions = conn.handle_datagram(&remote_hello(HELLO_TEARDOWN));
        assert_eq!(conn.state(), ConnectionState::Idle);
        assert!(actions.contains(&ConnectionAction::Teardown));
        assert_eq!(emitted(&actions), vec![SwitcherEvent::Disconnected]);
        assert!(sent_frames(&actions).is_empty());

        // Idle에서는 프레임을 무시한다
        let actions = conn.handle_datagram(&remote_hello(0x02));
        assert!(actions.is_empty());
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let mut conn = Connection::default();
        conn.connect();

        assert!(conn.handle_datagram(&[0x08, 0x0C, 0x53]).is_empty());

        let mut frame = remote_frame(Flags::ACK_REQUEST, 3, &bus_block(tags::PROGRAM_INPUT, 1));
        frame.truncate(frame.len() - 2);
        assert!(conn.handle_datagram(&frame).is_empty());

        assert_eq!(conn.state(), ConnectionState::HelloSent);
        assert_eq!(conn.stats().malformed_frames, 2);
        assert_eq!(conn.tracker().missing_count(), 40);
    }

    #[test]
    fn test_ack_request_rules() {
        let mut conn = Connection::default();
        conn.connect();
        conn.handle_datagram(&remote_hello(0x02));

        // 경계 전: ACK 없음
        let actions = conn.handle_datagram(&remote_frame(
            Flags::ACK_REQUEST,
            1,
            &bus_block(tags::PROGRAM_INPUT, 1),
        ));
        assert!(sent_frames(&actions).is_empty());

        // 경계 프레임 자체는 ACK
        let actions = conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 2, &[]));
        let acks: Vec<_> = sent_frames(&actions)
            .into_iter()
            .filter(|h| h.flags == Flags::ACK)
            .collect();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].ack_packet_id, 2);
        assert_eq!(acks[0].session_id, SESSION);

        // 0은 Hello가 이미 채웠으므로 바로 Ready
        assert!(conn.is_ready());

        // Ready 이후에는 재전송 프레임도 ACK
        let actions =
            conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST | Flags::RESEND, 7, &[]));
        assert_eq!(sent_frames(&actions)[0].ack_packet_id, 7);
    }

    #[test]
    fn test_resend_not_acked_while_syncing() {
        let mut conn = Connection::default();
        conn.connect();
        conn.handle_datagram(&remote_hello(0x02));
        conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 4, &[]));

        let actions = conn.handle_datagram(&remote_frame(
            Flags::ACK_REQUEST | Flags::RESEND,
            1,
            &bus_block(tags::PROGRAM_INPUT, 1),
        ));
        assert!(sent_frames(&actions).iter().all(|h| h.flags != Flags::ACK));
    }

    #[test]
    fn test_steady_state_parse_idempotent() {
        let mut conn = Connection::default();
        conn.connect();
        conn.handle_datagram(&remote_hello(0x02));
        conn.handle_datagram(&remote_frame(
            Flags::ACK_REQUEST,
            1,
            &bus_block(tags::PREVIEW_INPUT, 1),
        ));
        conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 2, &[]));
        assert!(conn.is_ready());

        let mut payload = bus_block(tags::PROGRAM_INPUT, 3);
        payload.extend(bus_block(tags::PREVIEW_INPUT, 8));

        conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 3, &payload));
        let first = *conn.switcher_state();
        conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 4, &payload));

        assert_eq!(*conn.switcher_state(), first);
        assert_eq!(first.program_input, 3);
        assert_eq!(first.preview_input, 8);

        // 트래커는 Ready 이후 갱신되지 않는다
        let missing = conn.tracker().missing_count();
        conn.handle_datagram(&remote_frame(Flags::empty(), 30, &payload));
        assert_eq!(conn.tracker().missing_count(), missing);
    }

    #[test]
    fn test_handshake_retries_then_teardown() {
        let config = Config {
            handshake_retries: 2,
            ..Config::default()
        };
        let mut conn = Connection::new(&config);
        conn.connect();

        assert_eq!(sent_frames(&conn.poll_timeout())[0].flags, Flags::HELLO);
        assert_eq!(sent_frames(&conn.poll_timeout())[0].flags, Flags::HELLO);

        let actions = conn.poll_timeout();
        assert!(actions.contains(&ConnectionAction::Teardown));
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_commands_require_ready() {
        let mut conn = Connection::default();
        conn.connect();
        assert!(matches!(
            conn.command(&Command::SetProgram(1)),
            Err(Error::NotReady)
        ));

        conn.handle_datagram(&remote_hello(0x02));
        conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 2, &[]));
        assert!(conn.is_ready());

        let first = conn.command(&Command::SetProgram(1)).unwrap();
        let second = conn.command(&Command::Cut).unwrap();
        let first = PacketHeader::decode(&first).unwrap();
        let second = PacketHeader::decode(&second).unwrap();

        assert_eq!(first.session_id, SESSION);
        assert_eq!(first.packet_id, 1);
        assert_eq!(second.packet_id, 2);
        assert_eq!(conn.local_packet_id(), 2);
    }

    #[test]
    fn test_reconnect_resets_session() {
        let mut conn = Connection::default();
        conn.connect();
        conn.handle_datagram(&remote_hello(0x02));
        conn.handle_datagram(&remote_frame(
            Flags::ACK_REQUEST,
            1,
            &bus_block(tags::PROGRAM_INPUT, 4),
        ));
        conn.handle_datagram(&remote_frame(Flags::ACK_REQUEST, 2, &[]));
        conn.command(&Command::Auto).unwrap();

        assert_eq!(emitted(&conn.disconnect()), vec![SwitcherEvent::Disconnected]);
        assert!(conn.disconnect().is_empty());

        conn.connect();
        assert_eq!(conn.session_id(), 0x53AB);
        assert_eq!(conn.local_packet_id(), 0);
        assert!(!conn.init_payload_sent());
        assert_eq!(conn.switcher_state().program_input, 0);
    }
}
