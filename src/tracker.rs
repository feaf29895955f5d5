//! 누락 패킷 추적기
//!
//! 초기 상태 전송 동안만 사용하는 고정 크기 비트맵.
//! 비트 i = 1 이면 패킷 ID i를 아직 보지 못한 것.

/// 초기 전송 윈도우 `[0, window_size)`의 누락 비트맵
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPacketTracker {
    /// 8비트씩 묶은 비트맵
    bits: Vec<u8>,

    /// 추적하는 패킷 ID 수
    window_size: usize,
}

impl MissingPacketTracker {
    /// 모든 ID를 누락 상태로 초기화
    pub fn new(window_size: usize) -> Self {
        let mut bits = vec![0xFFu8; window_size.div_ceil(8)];

        // 윈도우 밖의 비트는 비워 둔다
        let tail = window_size % 8;
        if tail != 0 {
            if let Some(last) = bits.last_mut() {
                *last = (1u8 << tail) - 1;
            }
        }

        Self { bits, window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// 패킷 수신 기록. 윈도우 밖이면 무시
    pub fn observe(&mut self, id: u16) {
        let id = id as usize;
        if id < self.window_size {
            self.bits[id >> 3] &= !(1 << (id & 0x07));
        }
    }

    /// 아직 보지 못한 ID인지 (윈도우 밖은 false)
    pub fn is_missing(&self, id: u16) -> bool {
        let id = id as usize;
        id < self.window_size && self.bits[id >> 3] & (1 << (id & 0x07)) != 0
    }

    /// `[0, bound)`에서 가장 작은 누락 ID
    pub fn first_missing_below(&self, bound: u16) -> Option<u16> {
        let limit = (bound as usize).min(self.window_size);
        (0..limit)
            .find(|&id| self.bits[id >> 3] & (1 << (id & 0x07)) != 0)
            .map(|id| id as u16)
    }

    /// 윈도우 안의 누락 ID 수
    pub fn missing_count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// 처음 상태로 되돌림
    pub fn reset(&mut self) {
        *self = Self::new(self.window_size);
    }
}
