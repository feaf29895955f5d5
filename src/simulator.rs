//! 스위처 시뮬레이터 (서버측)
//!
//! - Hello 응답 후 초기 상태 덤프 전송
//! - 지정한 패킷 ID / 비율로 첫 전송 드롭
//! - RequestNextAfter에 대한 재전송
//! - 명령 블록 반영 후 상태 블록 에코

use std::future::Future;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::builder::tags as command_tags;
use crate::builder::{self, encode_frame, HELLO_ANSWER_MARKER, HELLO_PAYLOAD_LEN};
use crate::connection::HELLO_TEARDOWN;
use crate::header::{Flags, LocalPacketCounter, PacketHeader, HEADER_SIZE};
use crate::parser::{self, BLOCK_HEADER_SIZE};
use crate::state::SwitcherState;
use crate::{Result, AUX_BUS_COUNT};

/// 원격 Hello 응답 페이로드 byte 0
const HELLO_REPLY: u8 = 0x02;

/// InPr 블록의 입력 이름 길이
const INPUT_NAME_LEN: usize = 20;

/// AuxS 블록 길이
const AUX_BLOCK_LEN: usize = 16;

/// 시뮬레이터 옵션
#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// 시작 상태
    pub initial_state: SwitcherState,

    /// 첫 전송에서 드롭할 덤프 패킷 ID
    pub drop_packet_ids: Vec<u16>,

    /// 페이로드 프레임 무작위 드롭 비율 (0.0 ~ 1.0)
    pub drop_ratio: f64,

    /// 덤프에 끼워 넣는 InPr 프레임 수
    pub filler_frames: usize,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            initial_state: SwitcherState::new(),
            drop_packet_ids: Vec::new(),
            drop_ratio: 0.0,
            filler_frames: 4,
        }
    }
}

/// 덤프 프레임 (재전송용으로 보관)
#[derive(Debug, Clone)]
struct DumpFrame {
    header: PacketHeader,
    payload: Bytes,
}

/// 한 클라이언트를 상대하는 스위처 상태 머신
pub struct SimulatedSwitcher {
    options: SimulatorOptions,
    state: SwitcherState,
    session_id: u16,
    counter: LocalPacketCounter,
    dump: Vec<DumpFrame>,
    dumped: bool,
    rng: StdRng,
}

impl SimulatedSwitcher {
    pub fn new(options: SimulatorOptions) -> Self {
        Self {
            state: options.initial_state,
            options,
            session_id: 0,
            counter: LocalPacketCounter::new(),
            dump: Vec::new(),
            dumped: false,
            rng: StdRng::from_entropy(),
        }
    }

    /// 현재 스위처 상태
    pub fn state(&self) -> &SwitcherState {
        &self.state
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// 클라이언트 프레임 하나 처리, 보낼 프레임 반환
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Result<Vec<Bytes>> {
        let Some(header) = PacketHeader::decode(datagram) else {
            debug!("짧은 프레임 무시: {} bytes", datagram.len());
            return Ok(Vec::new());
        };
        let payload = &datagram[HEADER_SIZE..];

        if header.flags.contains(Flags::HELLO) {
            return self.handle_hello(&header);
        }

        if header.flags.contains(Flags::ACK) && header.reserved[3] == HELLO_ANSWER_MARKER {
            if self.dumped {
                return Ok(Vec::new());
            }
            return self.send_dump();
        }

        if header.flags.contains(Flags::REQUEST_NEXT_AFTER) {
            let after = builder::requested_after(&header);
            return Ok(self.resend_after(after));
        }

        if header.flags.contains(Flags::ACK_REQUEST) && !payload.is_empty() {
            let mut frames = vec![builder::ack_frame(self.session_id, header.packet_id)];
            frames.extend(self.apply_commands(payload)?);
            return Ok(frames);
        }

        Ok(Vec::new())
    }

    /// 세션 종료 프레임
    pub fn teardown_frame(&self) -> Result<Bytes> {
        let mut payload = [0u8; HELLO_PAYLOAD_LEN];
        payload[0] = HELLO_TEARDOWN;
        encode_frame(
            PacketHeader::new(Flags::HELLO, 0, self.session_id),
            &payload,
        )
    }

    /// Hello 응답. 새 세션을 시작한다
    fn handle_hello(&mut self, header: &PacketHeader) -> Result<Vec<Bytes>> {
        let mut payload = [0u8; HELLO_PAYLOAD_LEN];
        payload[0] = HELLO_REPLY;
        let reply = encode_frame(
            PacketHeader::new(Flags::HELLO, 0, header.session_id),
            &payload,
        )?;

        self.session_id = self.rng.gen_range(0x8000..=0xFFFF);
        self.counter.reset();
        self.dump.clear();
        self.dumped = false;

        info!(
            "Hello 수신: client session={:04X}, new session={:04X}",
            header.session_id, self.session_id
        );

        Ok(vec![reply])
    }

    /// 초기 상태 덤프. 마지막은 페이로드 없는 경계 프레임
    fn send_dump(&mut self) -> Result<Vec<Bytes>> {
        let mut payloads = vec![
            // AuxS는 첫 프레임이어야 버스 번호가 페이로드 byte 9와 일치한다
            aux_block(0, self.state.aux_inputs[0]),
            bus_block(parser::tags::PROGRAM_INPUT, self.state.program_input),
            bus_block(parser::tags::PREVIEW_INPUT, self.state.preview_input),
        ];
        for i in 0..self.options.filler_frames {
            payloads.push(input_properties_block(i as u16 + 1));
        }

        let mut frames = Vec::with_capacity(payloads.len() + 1);
        for payload in payloads {
            let frame = self.dump_frame(payload.freeze());
            let packet_id = frame.header.packet_id;

            if self.options.drop_packet_ids.contains(&packet_id) || self.random_drop() {
                debug!("덤프 프레임 드롭: packet_id={}", packet_id);
            } else {
                frames.push(encode_frame(frame.header, &frame.payload)?);
            }
        }

        // 경계 프레임은 드롭하지 않는다
        let boundary = self.dump_frame(Bytes::new());
        frames.push(encode_frame(boundary.header, &boundary.payload)?);
        self.dumped = true;

        info!(
            "초기 상태 덤프: {} frames, boundary packet_id={}",
            self.dump.len(),
            boundary.header.packet_id
        );

        Ok(frames)
    }

    fn dump_frame(&mut self, payload: Bytes) -> DumpFrame {
        let mut header = PacketHeader::new(Flags::ACK_REQUEST, 0, self.session_id);
        header.packet_id = self.counter.assign(Flags::ACK_REQUEST);
        header.payload_length = payload.len() as u16;

        let frame = DumpFrame { header, payload };
        self.dump.push(frame.clone());
        frame
    }

    /// `after`보다 큰 ID의 덤프 프레임을 Resend 플래그로 다시 보냄
    fn resend_after(&mut self, after: u16) -> Vec<Bytes> {
        debug!("재전송 요청: after={}", after);

        let mut frames = Vec::new();
        for index in 0..self.dump.len() {
            let frame = &self.dump[index];
            if frame.header.packet_id <= after {
                continue;
            }

            let mut header = frame.header;
            header.flags |= Flags::RESEND;
            let payload = frame.payload.clone();

            if !payload.is_empty() && self.random_drop() {
                debug!("재전송 프레임 드롭: packet_id={}", header.packet_id);
                continue;
            }

            match encode_frame(header, &payload) {
                Ok(bytes) => frames.push(bytes),
                Err(e) => warn!("재전송 프레임 생성 실패: {}", e),
            }
        }
        frames
    }

    /// 명령 블록을 상태에 반영하고 변경된 버스를 에코
    fn apply_commands(&mut self, payload: &[u8]) -> Result<Vec<Bytes>> {
        let mut echoes = Vec::new();
        let mut cursor = 0usize;

        while let Some(len) = payload.get(cursor..cursor + 2) {
            let block_length = u16::from_be_bytes([len[0], len[1]]) as usize;
            if block_length <= BLOCK_HEADER_SIZE {
                break;
            }
            let Some(block) = payload.get(cursor..cursor + block_length) else {
                warn!("잘린 명령 블록: offset={}", cursor);
                break;
            };
            echoes.extend(self.apply_block(block));
            cursor += block_length;
        }

        let mut frames = Vec::with_capacity(echoes.len());
        for echo in echoes {
            let mut header = PacketHeader::new(Flags::ACK_REQUEST, 0, self.session_id);
            header.packet_id = self.counter.assign(Flags::ACK_REQUEST);
            frames.push(encode_frame(header, &echo)?);
        }
        Ok(frames)
    }

    /// 블록 하나 반영. 에코 블록은 각자 별도 프레임으로 나간다
    fn apply_block(&mut self, block: &[u8]) -> Vec<BytesMut> {
        let field = |offset: usize| -> Option<u16> {
            block
                .get(offset..offset + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
        };

        let mut tag = [0u8; 4];
        tag.copy_from_slice(&block[4..BLOCK_HEADER_SIZE]);

        match tag {
            command_tags::CHANGE_PROGRAM_INPUT => {
                let Some(input) = field(10) else {
                    return Vec::new();
                };
                self.state.program_input = input;
                vec![bus_block(parser::tags::PROGRAM_INPUT, input)]
            }
            command_tags::CHANGE_PREVIEW_INPUT => {
                let Some(input) = field(10) else {
                    return Vec::new();
                };
                self.state.preview_input = input;
                vec![bus_block(parser::tags::PREVIEW_INPUT, input)]
            }
            command_tags::CHANGE_AUX_SOURCE => {
                let (Some(&bus), Some(input)) = (block.get(9), field(10)) else {
                    return Vec::new();
                };
                if bus as usize >= AUX_BUS_COUNT {
                    warn!("잘못된 AUX 버스: {}", bus);
                    return Vec::new();
                }
                self.state.aux_inputs[bus as usize] = input;
                vec![aux_block(bus, input)]
            }
            command_tags::CUT | command_tags::AUTO => {
                std::mem::swap(&mut self.state.program_input, &mut self.state.preview_input);
                vec![
                    bus_block(parser::tags::PROGRAM_INPUT, self.state.program_input),
                    bus_block(parser::tags::PREVIEW_INPUT, self.state.preview_input),
                ]
            }
            other => {
                debug!("알 수 없는 명령: {:?}", String::from_utf8_lossy(&other));
                Vec::new()
            }
        }
    }

    fn random_drop(&mut self) -> bool {
        let ratio = self.options.drop_ratio.clamp(0.0, 1.0);
        ratio > 0.0 && self.rng.gen_bool(ratio)
    }
}

/// `[len, 0, tag, 0, 0, input]`
fn bus_block(tag: [u8; 4], input: u16) -> BytesMut {
    let mut block = BytesMut::with_capacity(12);
    block.put_u16(12);
    block.put_u16(0);
    block.put_slice(&tag);
    block.put_u16(0);
    block.put_u16(input);
    block
}

/// `[len, 0, "AuxS", 0, bus, 0, input, 0, 0, 0]`
fn aux_block(bus: u8, input: u16) -> BytesMut {
    let mut block = BytesMut::with_capacity(AUX_BLOCK_LEN);
    block.put_u16(AUX_BLOCK_LEN as u16);
    block.put_u16(0);
    block.put_slice(&parser::tags::AUX_SOURCE);
    block.put_u8(0);
    block.put_u8(bus);
    block.put_u8(0);
    block.put_u16(input);
    block.put_bytes(0, 3);
    block
}

/// `[len, 0, "InPr", input, name(20)]`
fn input_properties_block(input: u16) -> BytesMut {
    let len = BLOCK_HEADER_SIZE + 2 + INPUT_NAME_LEN;
    let mut name = format!("Camera {}", input).into_bytes();
    name.resize(INPUT_NAME_LEN, 0);

    let mut block = BytesMut::with_capacity(len);
    block.put_u16(len as u16);
    block.put_u16(0);
    block.put_slice(&parser::tags::INPUT_PROPERTIES);
    block.put_u16(input);
    block.put_slice(&name);
    block
}

/// UDP 위에서 동작하는 시뮬레이터 서버
pub struct SimulatorServer {
    socket: UdpSocket,
    switcher: SimulatedSwitcher,
    peer: Option<SocketAddr>,
}

impl SimulatorServer {
    pub async fn bind(addr: SocketAddr, options: SimulatorOptions) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Switcher simulator started on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            switcher: SimulatedSwitcher::new(options),
            peer: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 종료 없이 실행
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// `shutdown`이 끝날 때까지 실행. 종료 시 마지막 클라이언트에 세션 종료 전송
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            if let Err(e) = self.handle_datagram(&buf[..len], addr).await {
                                warn!("메시지 처리 에러: {}", e);
                            }
                        }
                        Err(e) => {
                            warn!("수신 에러: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        if let Some(peer) = self.peer {
            let frame = self.switcher.teardown_frame()?;
            self.socket.send_to(&frame, peer).await?;
            info!("세션 종료 전송: {}", peer);
        }

        Ok(())
    }

    async fn handle_datagram(&mut self, datagram: &[u8], addr: SocketAddr) -> Result<()> {
        self.peer = Some(addr);

        for frame in self.switcher.handle_datagram(datagram)? {
            self.socket.send_to(&frame, addr).await?;
        }
        Ok(())
    }
}
