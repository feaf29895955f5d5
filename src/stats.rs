//! 링크 통계

use std::time::{Duration, Instant};

/// 세션 단위 송수신 통계
#[derive(Debug, Clone)]
pub struct LinkStats {
    /// connect() 시각
    pub start_time: Instant,

    /// 수신 프레임 수 (잘못된 프레임 포함)
    pub frames_received: u64,

    /// 수신 바이트
    pub bytes_received: u64,

    /// 송신 프레임 수
    pub frames_sent: u64,

    /// 송신 바이트
    pub bytes_sent: u64,

    /// 버려진 잘못된 프레임 수
    pub malformed_frames: u64,

    /// Resend 플래그가 붙은 수신 프레임 수
    pub resent_frames: u64,

    /// 보낸 ACK 수
    pub acks_sent: u64,

    /// 보낸 RequestNextAfter 수 (재요청 포함)
    pub gap_fill_requests: u64,

    /// 소비자에게 전달한 이벤트 수
    pub events_emitted: u64,

    /// 이벤트 채널이 가득 차 버려진 이벤트 수
    pub dropped_events: u64,

    /// Hello 전송 횟수
    pub handshake_attempts: u32,

    /// 초기 상태 동기화 완료 시각
    pub ready_at: Option<Instant>,
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_received: 0,
            bytes_received: 0,
            frames_sent: 0,
            bytes_sent: 0,
            malformed_frames: 0,
            resent_frames: 0,
            acks_sent: 0,
            gap_fill_requests: 0,
            events_emitted: 0,
            dropped_events: 0,
            handshake_attempts: 0,
            ready_at: None,
        }
    }

    /// 프레임 수신 기록
    pub fn record_received(&mut self, len: usize) {
        self.frames_received += 1;
        self.bytes_received += len as u64;
    }

    /// 프레임 송신 기록
    pub fn record_sent(&mut self, len: usize) {
        self.frames_sent += 1;
        self.bytes_sent += len as u64;
    }

    /// 동기화 완료 기록
    pub fn mark_ready(&mut self) {
        self.ready_at = Some(Instant::now());
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// connect()부터 초기 상태 동기화 완료까지 걸린 시간
    pub fn sync_duration(&self) -> Option<Duration> {
        self.ready_at.map(|ready| ready.duration_since(self.start_time))
    }

    /// 잘못된 프레임 비율
    pub fn malformed_rate(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        self.malformed_frames as f64 / self.frames_received as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        let sync = match self.sync_duration() {
            Some(d) => format!("{:.1}ms", d.as_secs_f64() * 1000.0),
            None => "-".to_string(),
        };

        format!(
            "Elapsed: {:.2}s | Sync: {} | Rx: {} frames ({} bytes) | Tx: {} frames ({} bytes) | ACKs: {} | Gap requests: {} | Resent: {} | Dropped events: {} | Malformed: {:.2}%",
            self.elapsed().as_secs_f64(),
            sync,
            self.frames_received,
            self.bytes_received,
            self.frames_sent,
            self.bytes_sent,
            self.acks_sent,
            self.gap_fill_requests,
            self.resent_frames,
            self.dropped_events,
            self.malformed_rate() * 100.0,
        )
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = LinkStats::new();
        stats.record_received(20);
        stats.record_received(12);
        stats.malformed_frames += 1;
        stats.record_sent(12);

        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.bytes_received, 32);
        assert_eq!(stats.bytes_sent, 12);
        assert!((stats.malformed_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sync_duration() {
        let mut stats = LinkStats::new();
        assert!(stats.sync_duration().is_none());
        assert!(stats.summary().contains("Sync: -"));

        stats.mark_ready();
        assert!(stats.sync_duration().is_some());
    }
}
