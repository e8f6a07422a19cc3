//! Small helpers shared by the codec, connection and context modules.
//!
//! # Overview
//!
//! - CSPRNG generation of message ids and re-rolled VMACs (§9 Randomness:
//!   the original uses `rand()`, which this port deliberately does not).
//! - A compact hex-dump used by the `debug!`/`trace!` logging paths when a
//!   malformed or unexpected frame needs to be shown without flooding the
//!   log with a full `Debug` derive of the raw bytes.

use rand::RngCore;

use crate::identity::Vmac;

/// Generate a fresh random 16-bit message id.
///
/// Connect-Request message ids are chosen at random (rather than from a
/// simple counter) to avoid id reuse across reboots and to reduce ambiguity
/// when two handshakes overlap on the same peer. Uses the process-wide CSPRNG
/// (`rand::thread_rng`), seeded per-thread by the OS.
pub fn random_message_id() -> u16 {
    rand::thread_rng().next_u32() as u16
}

/// Choose a fresh random unicast VMAC, distinct from [`Vmac::BROADCAST`].
///
/// Called by an initiator that must re-roll its local VMAC after a
/// `NODE_DUPLICATE_VMAC` rejection (§4.2.1, §4.3b).
pub fn random_vmac() -> Vmac {
    loop {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        let candidate = Vmac::new(bytes);
        if !candidate.is_broadcast() {
            return candidate;
        }
    }
}

/// Render up to `max_bytes` of `data` as a compact hex string for log lines,
/// appending an ellipsis marker if truncated.
pub fn hex_preview(data: &[u8], max_bytes: usize) -> String {
    if data.len() <= max_bytes {
        hex::encode(data)
    } else {
        format!("{}...({} bytes total)", hex::encode(&data[..max_bytes]), data.len())
    }
}
