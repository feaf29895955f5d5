//! 스위처 상태와 이벤트

use crate::AUX_BUS_COUNT;

/// 외부로 전달되는 상태 변경 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherEvent {
    /// Program 버스 입력 변경
    ProgramChanged(u16),

    /// Preview 버스 입력 변경
    PreviewChanged(u16),

    /// AUX 버스 입력 변경
    AuxChanged { bus: u8, input: u16 },

    /// 초기 상태 동기화 완료
    ConnectionReady,

    /// 세션 종료 (원격 종료, 핸드쉐이크 실패, disconnect)
    Disconnected,
}

/// 스위처 버스 상태 (0 = 입력 없음)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitcherState {
    pub program_input: u16,
    pub preview_input: u16,
    pub aux_inputs: [u16; AUX_BUS_COUNT],
}

impl SwitcherState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이벤트 반영. 상태가 바뀌었으면 true
    pub fn apply(&mut self, event: &SwitcherEvent) -> bool {
        let slot = match *event {
            SwitcherEvent::ProgramChanged(input) => Some((&mut self.program_input, input)),
            SwitcherEvent::PreviewChanged(input) => Some((&mut self.preview_input, input)),
            SwitcherEvent::AuxChanged { bus, input } => self
                .aux_inputs
                .get_mut(bus as usize)
                .map(|slot| (slot, input)),
            SwitcherEvent::ConnectionReady | SwitcherEvent::Disconnected => None,
        };

        match slot {
            Some((slot, input)) if *slot != input => {
                *slot = input;
                true
            }
            _ => false,
        }
    }

    /// AUX 버스 입력
    pub fn aux(&self, bus: u8) -> Option<u16> {
        self.aux_inputs.get(bus as usize).copied()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_reports_change() {
        let mut state = SwitcherState::new();

        assert!(state.apply(&SwitcherEvent::ProgramChanged(3)));
        assert!(!state.apply(&SwitcherEvent::ProgramChanged(3)));
        assert!(state.apply(&SwitcherEvent::AuxChanged { bus: 7, input: 1001 }));
        assert!(!state.apply(&SwitcherEvent::ConnectionReady));

        assert_eq!(state.program_input, 3);
        assert_eq!(state.aux(7), Some(1001));
        assert_eq!(state.aux(8), None);
    }

    #[test]
    fn test_out_of_range_aux_ignored() {
        let mut state = SwitcherState::new();
        assert!(!state.apply(&SwitcherEvent::AuxChanged { bus: 12, input: 4 }));
        assert_eq!(state, SwitcherState::default());
    }
}
