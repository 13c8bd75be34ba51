//! Code shared by the authoritative server and every participant: scene
//! math, the fixed-layout wire codec, datagram framing with sequence/ack
//! bookkeeping, and last-writer-wins reconciliation of replicated fields.

pub mod channel;
pub mod codec;
pub mod input;
pub mod math;
pub mod replica;

pub use channel::{
    decode_frame, encode_frame, sequence_greater_than, ChannelError, Frame, FrameHeader,
    ReliableChannel,
};
pub use codec::{
    decode, decode_all, encode, encode_into, Attachment, Body, CodecError, Color, GizmoFlags,
    Message, MessageType,
};
pub use input::{AvatarInput, HandInput, AVATAR_INPUT_LEN};
pub use math::{Pose, Quat, Vec3};
pub use replica::{Replica, ReplicatedEntity, Versioned};

/// Simulation and broadcast rate.
pub const TICK_RATE: u32 = 90;
/// Hands per participant.
pub const HANDS_PER_AVATAR: usize = 2;
/// Radius of a hand controller's interaction sphere.
pub const CONTROLLER_RADIUS: f32 = 0.075;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_carries_message_stream() {
        let mut channel = ReliableChannel::new();
        let mut payload = Vec::new();
        encode_into(
            &Message::new(channel.next_seq(), 3, Body::SimulationTime { time: 1.25 }),
            &mut payload,
        );
        let frame = channel.prepare_packet(payload);
        let bytes = encode_frame(&frame).unwrap();

        let received = decode_frame(&bytes).unwrap();
        let msgs: Vec<Message> = decode_all(&received.payload)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].seq, received.header.seq);
        assert_eq!(msgs[0].body, Body::SimulationTime { time: 1.25 });
    }
}
