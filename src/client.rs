//! 스위처 클라이언트
//!
//! - 수신 태스크: 데이터그램을 명령 채널로 전달
//! - 메인 태스크: [`Connection`]을 단독 소유, 모든 상태 변경을 직렬화
//! - 애플리케이션 명령도 같은 채널을 거친다 (패킷 ID / 세션 ID 공유)
//! - 재시도 타이머는 메인 태스크가 소유. Hello / RequestNextAfter 송신 시점부터 잰다
//! - 이벤트 채널이 가득 차면 이벤트를 버린다 (`LinkStats::dropped_events`)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::builder::Command;
use crate::connection::{Connection, ConnectionAction};
use crate::header::{decode_header, Flags};
use crate::state::{SwitcherEvent, SwitcherState};
use crate::stats::LinkStats;
use crate::transport::{Transport, UdpTransport};
use crate::{Config, Error, Result};

/// 스위처 이벤트 수신기 타입
pub type EventReceiver = mpsc::Receiver<SwitcherEvent>;

/// 내부 명령
enum ClientCmd {
    Datagram(Bytes),
    Command(Command, oneshot::Sender<Result<()>>),
    Stop,
}

/// 메인 태스크 상태 (단일 태스크에서만 접근)
struct ClientInner<T: Transport> {
    connection: Connection,
    transport: Arc<T>,
    event_tx: mpsc::Sender<SwitcherEvent>,
    state: Arc<RwLock<SwitcherState>>,
    stats: Arc<RwLock<LinkStats>>,
    ready: Arc<AtomicBool>,
    dropped_events: u64,
    retry_interval: Duration,
    retry_deadline: Instant,
}

impl<T: Transport> ClientInner<T> {
    async fn handle(&mut self, cmd: ClientCmd) -> bool {
        match cmd {
            ClientCmd::Datagram(datagram) => {
                let actions = self.connection.handle_datagram(&datagram);
                self.step(actions).await
            }
            ClientCmd::Command(command, reply) => {
                let result = self.send_command(&command).await;
                self.publish();
                let _ = reply.send(result);
                true
            }
            ClientCmd::Stop => {
                let actions = self.connection.disconnect();
                self.step(actions).await;
                false
            }
        }
    }

    /// 재시도 시각 도달
    async fn on_retry_deadline(&mut self) -> bool {
        self.retry_deadline = Instant::now() + self.retry_interval;
        let actions = self.connection.poll_timeout();
        self.step(actions).await
    }

    /// 스냅샷을 먼저 갱신한 뒤 액션 실행
    ///
    /// 이벤트를 받은 소비자가 조회하는 상태는 항상 이벤트 이후 상태다.
    async fn step(&mut self, actions: Vec<ConnectionAction>) -> bool {
        self.publish();
        self.execute(actions).await
    }

    /// 액션 실행. 세션이 끝나면 false
    async fn execute(&mut self, actions: Vec<ConnectionAction>) -> bool {
        let mut keep_running = true;

        for action in actions {
            match action {
                ConnectionAction::SendFrame(frame) => {
                    if is_retried_frame(&frame) {
                        self.retry_deadline = Instant::now() + self.retry_interval;
                    }
                    if let Err(e) = self.transport.send(&frame).await {
                        warn!("송신 실패: {}", e);
                    }
                }
                ConnectionAction::Emit(event) => match self.event_tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => {
                        self.dropped_events += 1;
                        warn!(
                            "이벤트 채널 가득 참, 이벤트 버림: {:?} (누적 {})",
                            event, self.dropped_events
                        );
                    }
                    Err(TrySendError::Closed(event)) => {
                        debug!("이벤트 수신자 없음: {:?}", event);
                    }
                },
                ConnectionAction::Teardown => keep_running = false,
            }
        }

        keep_running
    }

    async fn send_command(&mut self, command: &Command) -> Result<()> {
        let frame = self.connection.command(command)?;
        self.transport.send(&frame).await
    }

    /// 외부 조회용 스냅샷 갱신
    fn publish(&self) {
        *self.state.write() = *self.connection.switcher_state();
        *self.stats.write() = self.link_stats();
        self.ready.store(self.connection.is_ready(), Ordering::SeqCst);
    }

    fn link_stats(&self) -> LinkStats {
        let mut stats = self.connection.stats().clone();
        stats.dropped_events = self.dropped_events;
        stats
    }
}

/// 응답이 없으면 재전송해야 하는 프레임인지
fn is_retried_frame(frame: &[u8]) -> bool {
    decode_header(frame)
        .map(|h| h.flags.intersects(Flags::HELLO | Flags::REQUEST_NEXT_AFTER))
        .unwrap_or(false)
}

/// 스위처 클라이언트 핸들
pub struct SwitcherClient {
    cmd_tx: mpsc::Sender<ClientCmd>,
    state: Arc<RwLock<SwitcherState>>,
    stats: Arc<RwLock<LinkStats>>,
    running: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl SwitcherClient {
    /// UDP로 스위처에 연결하고 핸드쉐이크 시작
    pub async fn connect(config: Config) -> Result<(Self, EventReceiver)> {
        let transport = UdpTransport::connect(config.bind_addr, config.remote_addr).await?;
        Self::start(config, Arc::new(transport)).await
    }

    /// 주어진 전송 계층으로 시작
    pub async fn start<T: Transport>(
        config: Config,
        transport: Arc<T>,
    ) -> Result<(Self, EventReceiver)> {
        // 채널 생성
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCmd>(1000);
        let (event_tx, event_rx) = mpsc::channel::<SwitcherEvent>(config.event_channel_capacity);

        // 공유 상태
        let state = Arc::new(RwLock::new(SwitcherState::new()));
        let stats = Arc::new(RwLock::new(LinkStats::new()));
        let running = Arc::new(AtomicBool::new(true));
        let ready = Arc::new(AtomicBool::new(false));

        // Hello 전송
        let mut connection = Connection::new(&config);
        for action in connection.connect() {
            if let ConnectionAction::SendFrame(frame) = action {
                transport.send(&frame).await?;
            }
        }

        info!("Switcher client started, switcher: {}", config.remote_addr);

        let retry_interval = config.retry_interval();
        let mut inner = ClientInner {
            connection,
            transport: transport.clone(),
            event_tx,
            state: state.clone(),
            stats: stats.clone(),
            ready: ready.clone(),
            dropped_events: 0,
            retry_interval,
            retry_deadline: Instant::now() + retry_interval,
        };
        inner.publish();

        // 수신 태스크 (메인 태스크가 끝나면 같이 종료)
        let cmd_tx_recv = cmd_tx.clone();
        let recv_buffer_size = config.recv_buffer_size;

        tokio::spawn(async move {
            let mut buf = vec![0u8; recv_buffer_size];

            loop {
                let cmd = tokio::select! {
                    result = transport.recv(&mut buf) => match result {
                        Ok(len) => ClientCmd::Datagram(Bytes::copy_from_slice(&buf[..len])),
                        Err(e) => {
                            warn!("수신 에러: {}", e);
                            continue;
                        }
                    },
                    _ = cmd_tx_recv.closed() => break,
                };

                if cmd_tx_recv.send(cmd).await.is_err() {
                    break;
                }
            }
        });

        // 메인 처리 태스크
        let running_main = running.clone();

        tokio::spawn(async move {
            loop {
                let keep_running = tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(cmd) => inner.handle(cmd).await,
                        None => false,
                    },
                    _ = tokio::time::sleep_until(inner.retry_deadline) => {
                        inner.on_retry_deadline().await
                    }
                };

                if !keep_running {
                    break;
                }
            }

            info!("Switcher client stopped: {}", inner.link_stats().summary());
            running_main.store(false, Ordering::SeqCst);
        });

        let client = Self {
            cmd_tx,
            state,
            stats,
            running,
            ready,
        };

        Ok((client, event_rx))
    }

    /// 세션 종료
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCmd::Stop).await;
        self.running.store(false, Ordering::SeqCst);
    }

    /// Program 버스 변경
    pub async fn set_program(&self, input_id: u16) -> Result<()> {
        self.command(Command::SetProgram(input_id)).await
    }

    /// Preview 버스 변경
    pub async fn set_preview(&self, input_id: u16) -> Result<()> {
        self.command(Command::SetPreview(input_id)).await
    }

    /// AUX 버스 변경
    pub async fn set_aux(&self, bus: u8, input_id: u16) -> Result<()> {
        self.command(Command::SetAux {
            bus,
            input: input_id,
        })
        .await
    }

    /// Cut 트랜지션
    pub async fn cut(&self) -> Result<()> {
        self.command(Command::Cut).await
    }

    /// Auto 트랜지션
    pub async fn auto(&self) -> Result<()> {
        self.command(Command::Auto).await
    }

    /// 명령 전송 (세션이 Ready여야 함)
    pub async fn command(&self, command: Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCmd::Command(command, reply_tx))
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        reply_rx.await.map_err(|_| Error::ChannelError)?
    }

    /// 현재 스위처 상태
    pub fn state(&self) -> SwitcherState {
        *self.state.read()
    }

    /// 통계 반환
    pub fn stats(&self) -> LinkStats {
        self.stats.read().clone()
    }

    /// 초기 상태 동기화 완료 여부
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    use crate::builder::{encode_frame, requested_after};
    use crate::header::{Flags, PacketHeader};
    use crate::parser::tags;

    const SESSION: u16 = 0x8001;

    fn switcher_frame(flags: Flags, packet_id: u16, payload: &[u8]) -> Bytes {
        let mut header = PacketHeader::new(flags, 0, SESSION);
        header.packet_id = packet_id;
        encode_frame(header, payload).unwrap()
    }

    fn program_block(input: u16) -> Vec<u8> {
        let mut block = vec![0, 12, 0, 0];
        block.extend_from_slice(&tags::PROGRAM_INPUT);
        block.extend_from_slice(&[0, 0]);
        block.extend_from_slice(&input.to_be_bytes());
        block
    }

    #[tokio::test]
    async fn test_commands_rejected_before_ready() {
        let switcher = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::with_remote(switcher.local_addr().unwrap());
        config.bind_addr = "127.0.0.1:0".parse().unwrap();

        let (client, mut events) = SwitcherClient::connect(config).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = switcher.recv_from(&mut buf).await.unwrap();
        let hello = PacketHeader::decode(&buf[..len]).unwrap();
        assert_eq!(len, 20);
        assert_eq!(hello.flags, Flags::HELLO);

        assert!(matches!(client.set_program(1).await, Err(Error::NotReady)));
        assert!(!client.is_ready());

        client.disconnect().await;
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(SwitcherEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_gap_fill_reissued_while_switcher_chatters() {
        let switcher = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::lan(switcher.local_addr().unwrap());
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        let retry_interval = config.retry_interval();

        let (client, mut events) = SwitcherClient::connect(config).await.unwrap();

        let mut buf = [0u8; 64];
        let (_, client_addr) = switcher.recv_from(&mut buf).await.unwrap();

        let mut hello = [0u8; 8];
        hello[0] = 0x02;
        let frames = [
            switcher_frame(Flags::HELLO, 0, &hello),
            switcher_frame(Flags::ACK_REQUEST, 1, &program_block(5)),
            switcher_frame(Flags::ACK_REQUEST, 3, &[]),
        ];
        for frame in &frames {
            switcher.send_to(frame, client_addr).await.unwrap();
        }

        // 재시도 간격보다 짧은 주기로 계속 프레임을 보내도 재요청은 이어져야 한다
        let until = tokio::time::Instant::now() + retry_interval * 5;
        let mut ping = tokio::time::interval(retry_interval / 4);
        let mut ping_id = 100u16;
        let mut requests = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(until) => break,
                _ = ping.tick() => {
                    let frame = switcher_frame(Flags::ACK_REQUEST, ping_id, &[]);
                    switcher.send_to(&frame, client_addr).await.unwrap();
                    ping_id += 1;
                }
                result = switcher.recv_from(&mut buf) => {
                    let (len, _) = result.unwrap();
                    let header = PacketHeader::decode(&buf[..len]).unwrap();
                    if header.flags.contains(Flags::REQUEST_NEXT_AFTER) {
                        assert_eq!(requested_after(&header), 1);
                        requests += 1;
                    }
                }
            }
        }

        assert!(requests >= 3, "gap fill requests: {}", requests);
        assert!(!client.is_ready());

        let fill = switcher_frame(Flags::ACK_REQUEST | Flags::RESEND, 2, &[]);
        switcher.send_to(&fill, client_addr).await.unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = events.recv().await {
                if event == SwitcherEvent::ConnectionReady {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(ready);
        assert_eq!(client.state().program_input, 5);
        assert!(client.stats().gap_fill_requests >= 3);

        client.disconnect().await;
    }
}
