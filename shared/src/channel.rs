//! Sequence-number / acknowledgment bookkeeping per peer
//!
//! There are no retry timers. Every outgoing frame is stamped with the next
//! local sequence number plus what we have seen from the peer; every incoming
//! frame prunes our outbox and updates the receive window. Redundancy comes
//! from the server resending full state every tick, and receivers merge it
//! idempotently (see [`crate::replica`]).

use bincode::{deserialize, serialize};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Width of the acknowledgment window in sequence numbers.
pub const ACK_WINDOW: i32 = 32;
/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM: usize = 1400;
/// Bytes bincode spends on a frame before the payload bytes.
pub const FRAME_OVERHEAD: usize = 4 + 4 + 4 + 8;

const OUTBOX_LIMIT: usize = 256;
const HISTORY_LIMIT: usize = 64;
const INBOX_LIMIT: usize = 256;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("frame of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Sequencing metadata carried by every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub seq: i32,
    /// Highest sequence number seen from the other side.
    pub ack: i32,
    /// Bit `n` set means `ack - 1 - n` was also seen.
    pub ack_bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ChannelError> {
    let bytes = serialize(frame)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(ChannelError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ChannelError> {
    if bytes.len() > MAX_DATAGRAM {
        return Err(ChannelError::TooLarge(bytes.len()));
    }
    Ok(deserialize(bytes)?)
}

/// Returns whether sequence number `a` was issued after `b`, across wraparound
/// sequence_greater_than(i32::MIN, i32::MAX) will return true
pub fn sequence_greater_than(a: i32, b: i32) -> bool {
    a.wrapping_sub(b) > 0
}

/// True if `seq` is covered by an `(ack, ack_bits)` pair.
pub fn is_acked(seq: i32, ack: i32, ack_bits: u32) -> bool {
    if seq == ack {
        return true;
    }
    let distance = ack.wrapping_sub(seq).wrapping_sub(1);
    (0..ACK_WINDOW).contains(&distance) && ack_bits & (1 << distance) != 0
}

/// Per-peer reliability state.
#[derive(Debug, Default)]
pub struct ReliableChannel {
    local_seq: i32,
    remote_seq: i32,
    inbox_bits: u32,
    outbox: VecDeque<FrameHeader>,
    historical_outbox: VecDeque<FrameHeader>,
    inbox: VecDeque<Frame>,
}

impl ReliableChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_seq(&self) -> i32 {
        self.local_seq
    }

    pub fn remote_seq(&self) -> i32 {
        self.remote_seq
    }

    pub fn inbox_bits(&self) -> u32 {
        self.inbox_bits
    }

    /// Sent frames not yet acknowledged, oldest first.
    pub fn outbox(&self) -> impl Iterator<Item = &FrameHeader> {
        self.outbox.iter()
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Recently acknowledged or expired frames, kept for diagnostics.
    pub fn historical_outbox(&self) -> impl Iterator<Item = &FrameHeader> {
        self.historical_outbox.iter()
    }

    /// Stamps `payload` with the next sequence number and the current
    /// receive window, and records it as unacknowledged.
    pub fn prepare_packet(&mut self, payload: Vec<u8>) -> Frame {
        let header = FrameHeader {
            seq: self.local_seq,
            ack: self.remote_seq,
            ack_bits: self.inbox_bits,
        };
        self.local_seq = self.local_seq.wrapping_add(1);

        self.outbox.push_back(header);
        if self.outbox.len() > OUTBOX_LIMIT {
            if let Some(expired) = self.outbox.pop_front() {
                self.remember(expired);
            }
        }

        Frame { header, payload }
    }

    /// Sequence number the next [`ReliableChannel::prepare_packet`] will use.
    pub fn next_seq(&self) -> i32 {
        self.local_seq
    }

    /// Records an incoming frame: prunes acknowledged frames from the outbox
    /// and folds its sequence number into the receive window.
    pub fn receive_packet(&mut self, frame: Frame) {
        let FrameHeader { seq, ack, ack_bits } = frame.header;

        let before = self.outbox.len();
        let mut kept = VecDeque::with_capacity(before);
        for sent in self.outbox.drain(..) {
            if is_acked(sent.seq, ack, ack_bits) {
                self.historical_outbox.push_back(sent);
            } else {
                kept.push_back(sent);
            }
        }
        self.outbox = kept;
        while self.historical_outbox.len() > HISTORY_LIMIT {
            self.historical_outbox.pop_front();
        }
        if self.outbox.len() != before {
            debug!("seq {} acked {} frames", seq, before - self.outbox.len());
        }

        let ahead = seq.wrapping_sub(self.remote_seq);
        if ahead > 0 {
            self.inbox_bits = if ahead >= ACK_WINDOW {
                0
            } else {
                self.inbox_bits << ahead
            };
            // The previous head now sits `ahead - 1` places behind the new one.
            if (1..=ACK_WINDOW).contains(&ahead) {
                self.inbox_bits |= 1 << (ahead - 1);
            }
            self.remote_seq = seq;
        } else if ahead < 0 {
            let distance = self.remote_seq.wrapping_sub(seq).wrapping_sub(1);
            if (0..ACK_WINDOW).contains(&distance) {
                self.inbox_bits |= 1 << distance;
            }
        }

        self.inbox.push_back(frame);
        if self.inbox.len() > INBOX_LIMIT {
            self.inbox.pop_front();
        }
    }

    /// True if `seq` is the newest frame seen or inside the receive window.
    pub fn is_received(&self, seq: i32) -> bool {
        is_acked(seq, self.remote_seq, self.inbox_bits)
    }

    /// Hands received frames to the caller in arrival order.
    pub fn drain_inbox(&mut self) -> impl Iterator<Item = Frame> + '_ {
        self.inbox.drain(..)
    }

    fn remember(&mut self, header: FrameHeader) {
        self.historical_outbox.push_back(header);
        while self.historical_outbox.len() > HISTORY_LIMIT {
            self.historical_outbox.pop_front();
        }
    }
}
