//! Per-tick player input as it travels on the wire.

/// Key bits carried in [`NetPlayerInput::keys`]. The simulation layer maps
/// these onto discrete action states.
pub const KEY_FORWARD: u32 = 1 << 0;
pub const KEY_BACKWARD: u32 = 1 << 1;
pub const KEY_LEFT: u32 = 1 << 2;
pub const KEY_RIGHT: u32 = 1 << 3;
pub const KEY_JUMP: u32 = 1 << 4;

/// One simulation tick's worth of captured input: a keymask and the frame
/// time it was sampled over. Fixed 8-byte wire size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetPlayerInput {
    pub keys: u32,
    pub delta_t: f32,
}

impl NetPlayerInput {
    pub const WIRE_SIZE: usize = 8;

    pub fn new(keys: u32, delta_t: f32) -> Self {
        Self { keys, delta_t }
    }

    /// A tick with no keys held, used when a peer has nothing buffered.
    pub fn idle(delta_t: f32) -> Self {
        Self { keys: 0, delta_t }
    }

    pub fn is_down(&self, key: u32) -> bool {
        self.keys & key != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_queries() {
        let input = NetPlayerInput::new(KEY_FORWARD | KEY_JUMP, 1.0 / 60.0);
        assert!(input.is_down(KEY_FORWARD));
        assert!(input.is_down(KEY_JUMP));
        assert!(!input.is_down(KEY_LEFT));
    }

    #[test]
    fn idle_input_holds_nothing() {
        let input = NetPlayerInput::idle(0.016);
        assert_eq!(input.keys, 0);
        assert!(!input.is_down(KEY_BACKWARD));
    }
}
