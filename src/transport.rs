//! 전송 계층 어댑터
//!
//! 상태 머신은 데이터그램 송수신만 필요로 한다. 실제 구현은 tokio UDP 소켓.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::info;

use crate::Result;

/// 데이터그램 전송 계층
///
/// 순서와 전달을 보장하지 않는 한 상대와의 송수신.
pub trait Transport: Send + Sync + 'static {
    /// 데이터그램 하나 송신
    fn send(&self, datagram: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// 데이터그램 하나 수신, 받은 길이 반환
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;
}

/// 스위처 하나에 연결된 UDP 소켓
pub struct UdpTransport {
    socket: UdpSocket,
    remote_addr: SocketAddr,
}

impl UdpTransport {
    /// 바인드 후 스위처 주소로 connect
    pub async fn connect(bind_addr: SocketAddr, remote_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(remote_addr).await?;

        info!(
            "UDP transport bound to {}, switcher: {}",
            socket.local_addr()?,
            remote_addr
        );

        Ok(Self {
            socket,
            remote_addr,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl Transport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket.send(datagram).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.socket.recv(buf).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_transport_exchange() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let transport = UdpTransport::connect("127.0.0.1:0".parse().unwrap(), peer_addr)
            .await
            .unwrap();
        assert_eq!(transport.remote_addr(), peer_addr);

        transport.send(&[1, 2, 3]).await.unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
        assert_eq!(from, transport.local_addr().unwrap());

        peer.send_to(&[9, 8], from).await.unwrap();
        let len = transport.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[9, 8]);
    }
}
