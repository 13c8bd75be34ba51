//! Inbound avatar-input record sent by every participant once per tick

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::math::Pose;

/// Encoded size: headset pose, then two hands of pose + two button bytes.
pub const AVATAR_INPUT_LEN: usize = 28 + 2 * (28 + 2);

/// Pose and button state of one tracked hand controller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HandInput {
    pub pose: Pose,
    pub grab: bool,
    pub action: bool,
}

/// Tracked-device state of one participant for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AvatarInput {
    pub headset: Pose,
    pub hands: [HandInput; 2],
}

impl AvatarInput {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; AVATAR_INPUT_LEN];
        // Sized from the same constant, so writing cannot overrun.
        if let Err(e) = self.write(&mut ByteWriter::new(&mut buf)) {
            log::error!("Encoding avatar input failed: {}", e);
        }
        buf
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> Result<(), CodecError> {
        w.write_vec3(self.headset.position)?;
        w.write_quat(self.headset.rotation)?;
        for hand in &self.hands {
            w.write_vec3(hand.pose.position)?;
            w.write_quat(hand.pose.rotation)?;
            w.write_bool(hand.grab)?;
            w.write_bool(hand.action)?;
        }
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<AvatarInput, CodecError> {
        if bytes.len() != AVATAR_INPUT_LEN {
            return Err(CodecError::RecordLength {
                expected: AVATAR_INPUT_LEN,
                actual: bytes.len(),
            });
        }

        let mut r = ByteReader::new(bytes);
        let headset = Pose::new(r.read_vec3()?, r.read_quat()?.normalize());
        let mut hands = [HandInput::default(); 2];
        for hand in hands.iter_mut() {
            hand.pose = Pose::new(r.read_vec3()?, r.read_quat()?.normalize());
            hand.grab = r.read_bool()?;
            hand.action = r.read_bool()?;
        }

        Ok(AvatarInput { headset, hands })
    }
}
