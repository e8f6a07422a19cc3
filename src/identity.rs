//! BACnet/SC node identity types.
//!
//! This module provides the two identifiers a BACnet/SC node is known by on
//! the wire: a 6-byte Virtual MAC address (§3 VMAC) that can change across a
//! reboot, and a 16-byte UUID that is stable for the device's lifetime and is
//! what peer-reboot detection (§4.3a) actually keys on.
//!
//! # Examples
//!
//! ```
//! use bacnet_sc::identity::Vmac;
//!
//! let broadcast = Vmac::BROADCAST;
//! assert!(broadcast.is_broadcast());
//!
//! let unicast = Vmac::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
//! assert!(!unicast.is_broadcast());
//! ```

use std::fmt;

/// Size in bytes of a BACnet/SC Virtual MAC address.
pub const VMAC_SIZE: usize = 6;

/// Size in bytes of a BACnet/SC device UUID.
pub const UUID_SIZE: usize = 16;

/// A 6-byte Virtual MAC address identifying a node on a BACnet/SC network.
///
/// All-0xFF is the reserved broadcast address (see [`Vmac::is_broadcast`]).
/// A VMAC is not guaranteed stable across a device reboot; [`Uuid`] is.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vmac(pub [u8; VMAC_SIZE]);

impl Vmac {
    /// The reserved broadcast VMAC: six bytes of `0xFF`.
    pub const BROADCAST: Vmac = Vmac([0xFF; VMAC_SIZE]);

    /// Construct a VMAC from its six raw bytes.
    pub const fn new(bytes: [u8; VMAC_SIZE]) -> Self {
        Vmac(bytes)
    }

    /// Construct a VMAC from a byte slice, which must be exactly
    /// [`VMAC_SIZE`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != VMAC_SIZE {
            return None;
        }
        let mut buf = [0u8; VMAC_SIZE];
        buf.copy_from_slice(bytes);
        Some(Vmac(buf))
    }

    /// The raw six bytes of this VMAC.
    pub const fn as_bytes(&self) -> &[u8; VMAC_SIZE] {
        &self.0
    }

    /// `true` iff all six bytes are `0xFF` (§8 Broadcast recognition).
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; VMAC_SIZE]
    }
}

impl fmt::Debug for Vmac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vmac({})", self)
    }
}

impl fmt::Display for Vmac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// A 16-byte device UUID. Survives a VMAC change across a reboot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uuid(pub [u8; UUID_SIZE]);

impl Uuid {
    /// Construct a UUID from its sixteen raw bytes.
    pub const fn new(bytes: [u8; UUID_SIZE]) -> Self {
        Uuid(bytes)
    }

    /// Construct a UUID from a byte slice, which must be exactly
    /// [`UUID_SIZE`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != UUID_SIZE {
            return None;
        }
        let mut buf = [0u8; UUID_SIZE];
        buf.copy_from_slice(bytes);
        Some(Uuid(buf))
    }

    /// The raw sixteen bytes of this UUID.
    pub const fn as_bytes(&self) -> &[u8; UUID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({})", self)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_recognition() {
        assert!(Vmac::BROADCAST.is_broadcast());
        assert!(Vmac::new([0xFF; 6]).is_broadcast());
        assert!(!Vmac::new([0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]).is_broadcast());
        assert!(!Vmac::new([0; 6]).is_broadcast());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(Vmac::from_slice(&[1, 2, 3]).is_none());
        assert!(Vmac::from_slice(&[0u8; 6]).is_some());
        assert!(Uuid::from_slice(&[0u8; 15]).is_none());
        assert!(Uuid::from_slice(&[0u8; 16]).is_some());
    }

    #[test]
    fn display_is_uppercase_hex() {
        let v = Vmac::new([0xAB, 0xCD, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(format!("{}", v), "ABCD01020304");
    }
}
