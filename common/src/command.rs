use crate::topics::{PAYLOAD_OFF, PAYLOAD_ON};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    On,
    Off,
}

/// Logic level to drive on the indicator output pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

impl IndicatorState {
    /// Command policy: the first payload byte decides, `'1'` means on,
    /// anything else means off. Empty payloads carry no command.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload.first() {
            None => None,
            Some(b'1') => Some(Self::On),
            Some(_) => Some(Self::Off),
        }
    }

    /// The indicator is wired active-low: logic low lights it.
    pub fn pin_level(self) -> PinLevel {
        match self {
            Self::On => PinLevel::Low,
            Self::Off => PinLevel::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => PAYLOAD_ON,
            Self::Off => PAYLOAD_OFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_one_turns_indicator_on() {
        assert_eq!(IndicatorState::from_payload(b"1"), Some(IndicatorState::On));
        assert_eq!(
            IndicatorState::from_payload(b"10"),
            Some(IndicatorState::On)
        );
    }

    #[test]
    fn any_other_first_byte_turns_indicator_off() {
        for payload in [b"0".as_slice(), b"2", b"on", b"ON", b"\x00"] {
            assert_eq!(
                IndicatorState::from_payload(payload),
                Some(IndicatorState::Off),
                "payload {payload:?}"
            );
        }
    }

    #[test]
    fn empty_payload_is_ignored() {
        assert_eq!(IndicatorState::from_payload(b""), None);
    }

    #[test]
    fn indicator_output_is_active_low() {
        assert_eq!(IndicatorState::On.pin_level(), PinLevel::Low);
        assert_eq!(IndicatorState::Off.pin_level(), PinLevel::High);
    }

    #[test]
    fn command_sequence_toggles_indicator() {
        // "1" then "0" on any subscribed topic: on-level, then off-level.
        let on = IndicatorState::from_payload(b"1").unwrap();
        assert_eq!(on.pin_level(), PinLevel::Low);

        let off = IndicatorState::from_payload(b"0").unwrap();
        assert_eq!(off.pin_level(), PinLevel::High);
    }
}
