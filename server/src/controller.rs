//! Tracked hand controllers and their edge-triggered buttons

use shared::{Attachment, HandInput, Pose, CONTROLLER_RADIUS};

/// Peer id in the upper bits, hand index in the lowest bit.
pub type ControllerId = u32;

pub fn controller_id(peer_id: u32, hand: usize) -> ControllerId {
    (peer_id << 1) | (hand as u32 & 1)
}

/// Current and previous sample of one button.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState {
    pub current: bool,
    pub previous: bool,
}

impl ButtonState {
    pub fn update(&mut self, pressed: bool) {
        self.previous = self.current;
        self.current = pressed;
    }

    pub fn rising(&self) -> bool {
        self.current && !self.previous
    }

    pub fn falling(&self) -> bool {
        !self.current && self.previous
    }

    /// Swallows the edge so later stages of the same tick do not see it.
    pub fn consume(&mut self) {
        self.previous = self.current;
    }
}

#[derive(Debug, Clone)]
pub struct Controller {
    pub id: ControllerId,
    pub pose: Pose,
    pub grab: ButtonState,
    pub action: ButtonState,
    pub attachment: Attachment,
    /// Disconnected or stale; never participates in grabs.
    pub ignore: bool,
    pub radius: f32,
}

impl Controller {
    pub fn new(id: ControllerId) -> Self {
        Self {
            id,
            pose: Pose::IDENTITY,
            grab: ButtonState::default(),
            action: ButtonState::default(),
            attachment: Attachment::Grab,
            ignore: false,
            radius: CONTROLLER_RADIUS,
        }
    }

    /// Takes a fresh sample. Edges are computed against the previous sample.
    pub fn apply_input(&mut self, input: &HandInput) {
        self.pose = input.pose;
        self.grab.update(input.grab);
        self.action.update(input.action);
    }

    /// Re-samples the last buttons so edges from a stale sample do not repeat.
    pub fn hold(&mut self) {
        self.grab.update(self.grab.current);
        self.action.update(self.action.current);
    }

    /// Advances the attachment mode on an action-button press.
    pub fn cycle_attachment(&mut self) -> bool {
        if self.action.rising() {
            self.attachment = self.attachment.next();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(grab: bool, action: bool) -> HandInput {
        HandInput {
            pose: Pose::IDENTITY,
            grab,
            action,
        }
    }

    #[test]
    fn test_controller_ids_pack_hand() {
        assert_eq!(controller_id(3, 0), 6);
        assert_eq!(controller_id(3, 1), 7);
    }

    #[test]
    fn test_button_edges() {
        let mut c = Controller::new(0);
        c.apply_input(&press(true, false));
        assert!(c.grab.rising());
        c.apply_input(&press(true, false));
        assert!(!c.grab.rising());
        assert!(!c.grab.falling());
        c.apply_input(&press(false, false));
        assert!(c.grab.falling());
    }

    #[test]
    fn test_hold_clears_edges() {
        let mut c = Controller::new(0);
        c.apply_input(&press(true, false));
        c.hold();
        assert!(!c.grab.rising());
        assert!(c.grab.current);
    }

    #[test]
    fn test_action_cycles_attachment() {
        let mut c = Controller::new(0);
        assert_eq!(c.attachment, Attachment::Grab);

        c.apply_input(&press(false, true));
        assert!(c.cycle_attachment());
        assert_eq!(c.attachment, Attachment::Delete);

        // Held button does not cycle again.
        c.apply_input(&press(false, true));
        assert!(!c.cycle_attachment());

        c.apply_input(&press(false, false));
        c.apply_input(&press(false, true));
        c.cycle_attachment();
        assert_eq!(c.attachment, Attachment::Duplicate);

        c.apply_input(&press(false, false));
        c.apply_input(&press(false, true));
        c.cycle_attachment();
        assert_eq!(c.attachment, Attachment::Grab);
    }
}
