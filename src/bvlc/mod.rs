//! BVLC-SC: the BACnet Virtual Link Control frame codec for the Secure
//! Connect datalink.
//!
//! A frame is a 4-byte prefix (function code, control flags, big-endian
//! message id), an optional destination VMAC, an optional origin VMAC, an
//! optional destination-option chain, an optional data-option chain, and a
//! function-specific payload. [`decode_message`] is the single entry point
//! for turning wire bytes into a [`DecodedMessage`]; the `encode_*` functions
//! build frames in the other direction. The header editors
//! ([`set_orig`], [`remove_dest_set_orig`], [`remove_orig_and_dest`] and the
//! `pdu_*` queries) rewrite the address portion of an already-encoded frame
//! without touching its options or payload bytes.
//!
//! # Examples
//!
//! ```
//! use bacnet_sc::bvlc::{encode_heartbeat_request, decode_message, Payload};
//!
//! let frame = encode_heartbeat_request(0x1234);
//! let decoded = decode_message(&frame).unwrap();
//! assert_eq!(decoded.message_id, 0x1234);
//! assert!(matches!(decoded.payload, Payload::HeartbeatRequest));
//! ```

pub mod error;
pub mod options;

pub use error::{BvlcError, ErrorClass, ErrorCode, Result};
pub use options::{HeaderOption, OptionKind, MAX_OPTIONS_PER_CHAIN};

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::identity::{Uuid, Vmac};

bitflags! {
    /// The BVLC-SC header's control byte: which optional fields follow the
    /// 4-byte prefix (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ControlFlags: u8 {
        const DATA_OPT = 0x01;
        const DEST_OPT = 0x02;
        const DEST_VADDR = 0x04;
        const ORIG_VADDR = 0x08;
    }
}

const CTRL_DATA_OPT: u8 = ControlFlags::DATA_OPT.bits();
const CTRL_DEST_OPT: u8 = ControlFlags::DEST_OPT.bits();
const CTRL_DEST_VADDR: u8 = ControlFlags::DEST_VADDR.bits();
const CTRL_ORIG_VADDR: u8 = ControlFlags::ORIG_VADDR.bits();

const HEADER_LEN: usize = 4;

/// BVLC-SC function codes (§4.1 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    Result = 0x00,
    EncapsulatedNpdu = 0x01,
    AddressResolution = 0x02,
    AddressResolutionAck = 0x03,
    Advertisement = 0x04,
    AdvertisementSolicitation = 0x05,
    ConnectRequest = 0x06,
    ConnectAccept = 0x07,
    DisconnectRequest = 0x08,
    DisconnectAck = 0x09,
    HeartbeatRequest = 0x0A,
    HeartbeatAck = 0x0B,
    Proprietary = 0x0C,
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => FunctionCode::Result,
            0x01 => FunctionCode::EncapsulatedNpdu,
            0x02 => FunctionCode::AddressResolution,
            0x03 => FunctionCode::AddressResolutionAck,
            0x04 => FunctionCode::Advertisement,
            0x05 => FunctionCode::AdvertisementSolicitation,
            0x06 => FunctionCode::ConnectRequest,
            0x07 => FunctionCode::ConnectAccept,
            0x08 => FunctionCode::DisconnectRequest,
            0x09 => FunctionCode::DisconnectAck,
            0x0A => FunctionCode::HeartbeatRequest,
            0x0B => FunctionCode::HeartbeatAck,
            0x0C => FunctionCode::Proprietary,
            _ => return None,
        })
    }

    /// `true` for the six connection-management functions that must never
    /// carry an origin or destination VMAC (§4.1).
    const fn forbids_addresses(self) -> bool {
        matches!(
            self,
            FunctionCode::ConnectRequest
                | FunctionCode::ConnectAccept
                | FunctionCode::DisconnectRequest
                | FunctionCode::DisconnectAck
                | FunctionCode::HeartbeatRequest
                | FunctionCode::HeartbeatAck
        )
    }
}

/// The ack/nack body of a BVLC-Result message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultCode {
    Ack,
    Nack {
        /// An opaque byte carried alongside the error class/code and
        /// round-tripped verbatim; the source test suite always passes a
        /// fixed marker value here and recovers it unchanged, with no bit
        /// inside it gating the details string (that's payload-length
        /// driven — see the decode/encode of this variant below).
        error_header_marker: u8,
        error_class: ErrorClass,
        error_code: ErrorCode,
        details: Option<String>,
    },
}

/// The function-specific payload of a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Result {
        originating_function: u8,
        result: ResultCode,
    },
    EncapsulatedNpdu(Vec<u8>),
    AddressResolution,
    AddressResolutionAck(String),
    Advertisement {
        hub_connection_status: u8,
        direct_connection_support: u8,
        max_bvlc_len: u16,
        max_npdu_len: u16,
    },
    AdvertisementSolicitation,
    ConnectRequest {
        vmac: Vmac,
        uuid: Uuid,
        max_bvlc_len: u16,
        max_npdu_len: u16,
    },
    ConnectAccept {
        vmac: Vmac,
        uuid: Uuid,
        max_bvlc_len: u16,
        max_npdu_len: u16,
    },
    DisconnectRequest,
    DisconnectAck,
    HeartbeatRequest,
    HeartbeatAck,
    Proprietary {
        vendor_id: u16,
        function: u8,
        data: Vec<u8>,
    },
}

impl Payload {
    const fn function(&self) -> FunctionCode {
        match self {
            Payload::Result { .. } => FunctionCode::Result,
            Payload::EncapsulatedNpdu(_) => FunctionCode::EncapsulatedNpdu,
            Payload::AddressResolution => FunctionCode::AddressResolution,
            Payload::AddressResolutionAck(_) => FunctionCode::AddressResolutionAck,
            Payload::Advertisement { .. } => FunctionCode::Advertisement,
            Payload::AdvertisementSolicitation => FunctionCode::AdvertisementSolicitation,
            Payload::ConnectRequest { .. } => FunctionCode::ConnectRequest,
            Payload::ConnectAccept { .. } => FunctionCode::ConnectAccept,
            Payload::DisconnectRequest => FunctionCode::DisconnectRequest,
            Payload::DisconnectAck => FunctionCode::DisconnectAck,
            Payload::HeartbeatRequest => FunctionCode::HeartbeatRequest,
            Payload::HeartbeatAck => FunctionCode::HeartbeatAck,
            Payload::Proprietary { .. } => FunctionCode::Proprietary,
        }
    }
}

/// A fully decoded BVLC-SC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub message_id: u16,
    pub origin: Option<Vmac>,
    pub destination: Option<Vmac>,
    pub dest_options: Vec<HeaderOption>,
    pub data_options: Vec<HeaderOption>,
    pub payload: Payload,
}

impl DecodedMessage {
    pub const fn function(&self) -> FunctionCode {
        self.payload.function()
    }
}

/// `true` exactly for functions whose receipt mandates an unprompted
/// BVLC-Result reply (§4.1).
pub const fn need_send_bvlc_result(decoded: &DecodedMessage) -> bool {
    matches!(
        decoded.function(),
        FunctionCode::EncapsulatedNpdu
            | FunctionCode::AddressResolution
            | FunctionCode::AdvertisementSolicitation
            | FunctionCode::HeartbeatRequest
            | FunctionCode::ConnectRequest
            | FunctionCode::DisconnectRequest
    )
}

// ---------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------

/// Decode a complete BVLC-SC frame. The single entry point for turning wire
/// bytes into a [`DecodedMessage`].
pub fn decode_message(bytes: &[u8]) -> Result<DecodedMessage> {
    if bytes.len() < HEADER_LEN {
        return Err(BvlcError::MessageIncomplete);
    }
    let function_byte = bytes[0];
    let control = bytes[1];
    let message_id = (&bytes[2..4]).get_u16();
    let function = FunctionCode::from_u8(function_byte)
        .ok_or(BvlcError::FunctionUnknown(function_byte))?;

    if function.forbids_addresses()
        && (control & (CTRL_DEST_VADDR | CTRL_ORIG_VADDR) != 0)
    {
        return Err(BvlcError::HeaderEncodingError(control));
    }

    let mut offset = HEADER_LEN;

    let destination = if control & CTRL_DEST_VADDR != 0 {
        let v = read_vmac(bytes, offset)?;
        offset += 6;
        Some(v)
    } else {
        None
    };

    let origin = if control & CTRL_ORIG_VADDR != 0 {
        let v = read_vmac(bytes, offset)?;
        offset += 6;
        Some(v)
    } else {
        None
    };

    let dest_options = if control & CTRL_DEST_OPT != 0 {
        let (opts, consumed) = options::decode_chain(&bytes[offset..])?;
        for opt in &opts {
            if !opt.kind.allowed_in_dest_chain() {
                return Err(BvlcError::HeaderEncodingError(control));
            }
        }
        offset += consumed;
        opts
    } else {
        Vec::new()
    };

    let data_options = if control & CTRL_DATA_OPT != 0 {
        let (opts, consumed) = options::decode_chain(&bytes[offset..])?;
        offset += consumed;
        opts
    } else {
        Vec::new()
    };

    let payload = decode_payload(function, &bytes[offset..])?;

    Ok(DecodedMessage {
        message_id,
        origin,
        destination,
        dest_options,
        data_options,
        payload,
    })
}

fn read_vmac(bytes: &[u8], offset: usize) -> Result<Vmac> {
    if bytes.len() < offset + 6 {
        return Err(BvlcError::TruncatedAddressOrOption);
    }
    Ok(Vmac::from_slice(&bytes[offset..offset + 6]).expect("slice is exactly 6 bytes"))
}

fn read_uuid(bytes: &[u8], offset: usize) -> Result<Uuid> {
    if bytes.len() < offset + 16 {
        return Err(BvlcError::MessageIncomplete);
    }
    Ok(Uuid::from_slice(&bytes[offset..offset + 16]).expect("slice is exactly 16 bytes"))
}

fn decode_payload(function: FunctionCode, payload: &[u8]) -> Result<Payload> {
    match function {
        FunctionCode::Result => {
            if payload.len() < 2 {
                return Err(BvlcError::MessageIncomplete);
            }
            let originating_function = payload[0];
            let result_byte = payload[1];
            let result = match result_byte {
                0 => {
                    if payload.len() > 2 {
                        return Err(BvlcError::UnexpectedData(FunctionCode::Result.as_u8()));
                    }
                    ResultCode::Ack
                }
                1 => {
                    if payload.len() < 7 {
                        return Err(BvlcError::MessageIncomplete);
                    }
                    let error_header_marker = payload[2];
                    let error_class = ErrorClass::from_u16((&payload[3..5]).get_u16());
                    let error_code = ErrorCode::from_u16((&payload[5..7]).get_u16());
                    let details = if payload.len() > 7 {
                        let s = std::str::from_utf8(&payload[7..])
                            .map_err(|_| BvlcError::InconsistentParameters("details not utf-8"))?;
                        if s.contains('\0') {
                            return Err(BvlcError::InconsistentParameters(
                                "details string contains embedded NUL",
                            ));
                        }
                        Some(s.to_string())
                    } else {
                        None
                    };
                    ResultCode::Nack {
                        error_header_marker,
                        error_class,
                        error_code,
                        details,
                    }
                }
                _ => {
                    return Err(BvlcError::ParameterOutOfRange {
                        field: "result",
                        value: result_byte as u32,
                    })
                }
            };
            Ok(Payload::Result {
                originating_function,
                result,
            })
        }
        FunctionCode::EncapsulatedNpdu => Ok(Payload::EncapsulatedNpdu(payload.to_vec())),
        FunctionCode::AddressResolution => {
            if !payload.is_empty() {
                return Err(BvlcError::UnexpectedData(function.as_u8()));
            }
            Ok(Payload::AddressResolution)
        }
        FunctionCode::AddressResolutionAck => {
            let s = std::str::from_utf8(payload)
                .map_err(|_| BvlcError::InconsistentParameters("uri list not utf-8"))?;
            Ok(Payload::AddressResolutionAck(s.to_string()))
        }
        FunctionCode::Advertisement => {
            if payload.len() != 6 {
                return Err(BvlcError::MessageIncomplete);
            }
            let hub_connection_status = payload[0];
            let direct_connection_support = payload[1];
            if hub_connection_status > 2 {
                return Err(BvlcError::ParameterOutOfRange {
                    field: "hub_connection_status",
                    value: hub_connection_status as u32,
                });
            }
            if direct_connection_support > 3 {
                return Err(BvlcError::ParameterOutOfRange {
                    field: "direct_connection_support",
                    value: direct_connection_support as u32,
                });
            }
            let max_bvlc_len = (&payload[2..4]).get_u16();
            let max_npdu_len = (&payload[4..6]).get_u16();
            Ok(Payload::Advertisement {
                hub_connection_status,
                direct_connection_support,
                max_bvlc_len,
                max_npdu_len,
            })
        }
        FunctionCode::AdvertisementSolicitation => {
            if !payload.is_empty() {
                return Err(BvlcError::UnexpectedData(function.as_u8()));
            }
            Ok(Payload::AdvertisementSolicitation)
        }
        FunctionCode::ConnectRequest | FunctionCode::ConnectAccept => {
            if payload.len() != 26 {
                return Err(BvlcError::MessageIncomplete);
            }
            let vmac = read_vmac(payload, 0)?;
            let uuid = read_uuid(payload, 6)?;
            let max_bvlc_len = (&payload[22..24]).get_u16();
            let max_npdu_len = (&payload[24..26]).get_u16();
            Ok(if function == FunctionCode::ConnectRequest {
                Payload::ConnectRequest {
                    vmac,
                    uuid,
                    max_bvlc_len,
                    max_npdu_len,
                }
            } else {
                Payload::ConnectAccept {
                    vmac,
                    uuid,
                    max_bvlc_len,
                    max_npdu_len,
                }
            })
        }
        FunctionCode::DisconnectRequest => {
            if !payload.is_empty() {
                return Err(BvlcError::UnexpectedData(function.as_u8()));
            }
            Ok(Payload::DisconnectRequest)
        }
        FunctionCode::DisconnectAck => {
            if !payload.is_empty() {
                return Err(BvlcError::UnexpectedData(function.as_u8()));
            }
            Ok(Payload::DisconnectAck)
        }
        FunctionCode::HeartbeatRequest => {
            if !payload.is_empty() {
                return Err(BvlcError::UnexpectedData(function.as_u8()));
            }
            Ok(Payload::HeartbeatRequest)
        }
        FunctionCode::HeartbeatAck => {
            if !payload.is_empty() {
                return Err(BvlcError::UnexpectedData(function.as_u8()));
            }
            Ok(Payload::HeartbeatAck)
        }
        FunctionCode::Proprietary => {
            if payload.len() < 3 {
                return Err(BvlcError::PayloadExpected);
            }
            let vendor_id = (&payload[0..2]).get_u16();
            let function_byte = payload[2];
            let data = payload[3..].to_vec();
            Ok(Payload::Proprietary {
                vendor_id,
                function: function_byte,
                data,
            })
        }
    }
}

// ---------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------

/// Encode a fully assembled message. Fails with [`BvlcError::OutOfMemory`] if
/// either option chain exceeds [`MAX_OPTIONS_PER_CHAIN`].
pub fn encode(msg: &DecodedMessage) -> Result<Vec<u8>> {
    let function = msg.function();
    if function.forbids_addresses() && (msg.origin.is_some() || msg.destination.is_some()) {
        return Err(BvlcError::InconsistentParameters(
            "this function must not carry an origin or destination address",
        ));
    }
    for opt in &msg.dest_options {
        if !opt.kind.allowed_in_dest_chain() {
            return Err(BvlcError::InconsistentParameters(
                "secure-path is only valid in the data-option chain",
            ));
        }
    }

    let mut control = 0u8;
    if msg.destination.is_some() {
        control |= CTRL_DEST_VADDR;
    }
    if msg.origin.is_some() {
        control |= CTRL_ORIG_VADDR;
    }
    if !msg.dest_options.is_empty() {
        control |= CTRL_DEST_OPT;
    }
    if !msg.data_options.is_empty() {
        control |= CTRL_DATA_OPT;
    }

    let mut buf = Vec::with_capacity(32);
    buf.put_u8(function.as_u8());
    buf.put_u8(control);
    buf.put_u16(msg.message_id);
    if let Some(dest) = msg.destination {
        buf.extend_from_slice(dest.as_bytes());
    }
    if let Some(origin) = msg.origin {
        buf.extend_from_slice(origin.as_bytes());
    }
    options::encode_chain(&mut buf, &msg.dest_options)?;
    options::encode_chain(&mut buf, &msg.data_options)?;
    encode_payload(&mut buf, &msg.payload)?;
    Ok(buf)
}

fn encode_payload(buf: &mut Vec<u8>, payload: &Payload) -> Result<()> {
    match payload {
        Payload::Result {
            originating_function,
            result,
        } => {
            buf.put_u8(*originating_function);
            match result {
                ResultCode::Ack => buf.put_u8(0),
                ResultCode::Nack {
                    error_header_marker,
                    error_class,
                    error_code,
                    details,
                } => {
                    buf.put_u8(1);
                    buf.put_u8(*error_header_marker);
                    buf.put_u16(error_class.as_u16());
                    buf.put_u16(error_code.as_u16());
                    if let Some(details) = details {
                        if details.contains('\0') {
                            return Err(BvlcError::InconsistentParameters(
                                "details string contains embedded NUL",
                            ));
                        }
                        buf.extend_from_slice(details.as_bytes());
                    }
                }
            }
        }
        Payload::EncapsulatedNpdu(npdu) => buf.extend_from_slice(npdu),
        Payload::AddressResolution | Payload::AdvertisementSolicitation => {}
        Payload::AddressResolutionAck(uris) => buf.extend_from_slice(uris.as_bytes()),
        Payload::Advertisement {
            hub_connection_status,
            direct_connection_support,
            max_bvlc_len,
            max_npdu_len,
        } => {
            buf.put_u8(*hub_connection_status);
            buf.put_u8(*direct_connection_support);
            buf.put_u16(*max_bvlc_len);
            buf.put_u16(*max_npdu_len);
        }
        Payload::ConnectRequest {
            vmac,
            uuid,
            max_bvlc_len,
            max_npdu_len,
        }
        | Payload::ConnectAccept {
            vmac,
            uuid,
            max_bvlc_len,
            max_npdu_len,
        } => {
            buf.extend_from_slice(vmac.as_bytes());
            buf.extend_from_slice(uuid.as_bytes());
            buf.put_u16(*max_bvlc_len);
            buf.put_u16(*max_npdu_len);
        }
        Payload::DisconnectRequest
        | Payload::DisconnectAck
        | Payload::HeartbeatRequest
        | Payload::HeartbeatAck => {}
        Payload::Proprietary {
            vendor_id,
            function,
            data,
        } => {
            buf.put_u16(*vendor_id);
            buf.put_u8(*function);
            buf.extend_from_slice(data);
        }
    }
    Ok(())
}

fn bare(message_id: u16, payload: Payload) -> DecodedMessage {
    DecodedMessage {
        message_id,
        origin: None,
        destination: None,
        dest_options: Vec::new(),
        data_options: Vec::new(),
        payload,
    }
}

/// `encode_<function>` convenience wrappers, one per BVLC-SC function code.
pub fn encode_connect_request(
    message_id: u16,
    vmac: Vmac,
    uuid: Uuid,
    max_bvlc_len: u16,
    max_npdu_len: u16,
) -> Vec<u8> {
    encode(&bare(
        message_id,
        Payload::ConnectRequest {
            vmac,
            uuid,
            max_bvlc_len,
            max_npdu_len,
        },
    ))
    .expect("connect-request never carries addresses or options")
}

pub fn encode_connect_accept(
    message_id: u16,
    vmac: Vmac,
    uuid: Uuid,
    max_bvlc_len: u16,
    max_npdu_len: u16,
) -> Vec<u8> {
    encode(&bare(
        message_id,
        Payload::ConnectAccept {
            vmac,
            uuid,
            max_bvlc_len,
            max_npdu_len,
        },
    ))
    .expect("connect-accept never carries addresses or options")
}

pub fn encode_disconnect_request(message_id: u16) -> Vec<u8> {
    encode(&bare(message_id, Payload::DisconnectRequest)).expect("infallible")
}

pub fn encode_disconnect_ack(message_id: u16) -> Vec<u8> {
    encode(&bare(message_id, Payload::DisconnectAck)).expect("infallible")
}

pub fn encode_heartbeat_request(message_id: u16) -> Vec<u8> {
    encode(&bare(message_id, Payload::HeartbeatRequest)).expect("infallible")
}

pub fn encode_heartbeat_ack(message_id: u16) -> Vec<u8> {
    encode(&bare(message_id, Payload::HeartbeatAck)).expect("infallible")
}

pub fn encode_bvlc_result_ack(message_id: u16, originating_function: u8) -> Vec<u8> {
    encode(&bare(
        message_id,
        Payload::Result {
            originating_function,
            result: ResultCode::Ack,
        },
    ))
    .expect("infallible")
}

pub fn encode_bvlc_result_nack(
    message_id: u16,
    originating_function: u8,
    error_header_marker: u8,
    error_class: ErrorClass,
    error_code: ErrorCode,
    details: Option<String>,
) -> Result<Vec<u8>> {
    encode(&bare(
        message_id,
        Payload::Result {
            originating_function,
            result: ResultCode::Nack {
                error_header_marker,
                error_class,
                error_code,
                details,
            },
        },
    ))
}

pub fn encode_encapsulated_npdu(
    message_id: u16,
    origin: Option<Vmac>,
    destination: Option<Vmac>,
    npdu: Vec<u8>,
) -> Vec<u8> {
    encode(&DecodedMessage {
        message_id,
        origin,
        destination,
        dest_options: Vec::new(),
        data_options: Vec::new(),
        payload: Payload::EncapsulatedNpdu(npdu),
    })
    .expect("encapsulated-npdu permits addresses")
}

pub fn encode_proprietary(message_id: u16, vendor_id: u16, function: u8, data: Vec<u8>) -> Vec<u8> {
    encode(&bare(
        message_id,
        Payload::Proprietary {
            vendor_id,
            function,
            data,
        },
    ))
    .expect("infallible")
}

// ---------------------------------------------------------------------
// Header editors
// ---------------------------------------------------------------------

struct HeaderLayout {
    function: FunctionCode,
    control: u8,
    dest: Option<std::ops::Range<usize>>,
    origin: Option<std::ops::Range<usize>>,
    rest: usize,
}

fn parse_layout(pdu: &[u8]) -> Result<HeaderLayout> {
    if pdu.len() < HEADER_LEN {
        return Err(BvlcError::MessageIncomplete);
    }
    let function = FunctionCode::from_u8(pdu[0]).ok_or(BvlcError::FunctionUnknown(pdu[0]))?;
    let control = pdu[1];
    let mut offset = HEADER_LEN;
    let dest = if control & CTRL_DEST_VADDR != 0 {
        if pdu.len() < offset + 6 {
            return Err(BvlcError::TruncatedAddressOrOption);
        }
        let r = offset..offset + 6;
        offset += 6;
        Some(r)
    } else {
        None
    };
    let origin = if control & CTRL_ORIG_VADDR != 0 {
        if pdu.len() < offset + 6 {
            return Err(BvlcError::TruncatedAddressOrOption);
        }
        let r = offset..offset + 6;
        offset += 6;
        Some(r)
    } else {
        None
    };
    Ok(HeaderLayout {
        function,
        control,
        dest,
        origin,
        rest: offset,
    })
}

/// `true` iff the frame carries no destination VMAC.
pub fn pdu_has_no_dest(pdu: &[u8]) -> Result<bool> {
    Ok(parse_layout(pdu)?.dest.is_none())
}

/// The frame's destination VMAC, if present.
pub fn pdu_get_dest(pdu: &[u8]) -> Result<Option<Vmac>> {
    let layout = parse_layout(pdu)?;
    Ok(match layout.dest {
        Some(r) => Some(Vmac::from_slice(&pdu[r]).expect("range is exactly 6 bytes")),
        None => None,
    })
}

/// `true` iff the frame carries a destination VMAC and it is the broadcast
/// address.
pub fn pdu_has_dest_broadcast(pdu: &[u8]) -> Result<bool> {
    Ok(pdu_get_dest(pdu)?.map(|v| v.is_broadcast()).unwrap_or(false))
}

/// `true` iff all six bytes of `v` are `0xFF` (§8 Broadcast recognition).
pub fn is_vmac_broadcast(v: &Vmac) -> bool {
    v.is_broadcast()
}

/// Insert or overwrite the frame's origin VMAC, leaving its destination,
/// options and payload untouched.
pub fn set_orig(pdu: &[u8], new_origin: Vmac) -> Result<Vec<u8>> {
    let layout = parse_layout(pdu)?;
    if layout.function.forbids_addresses() {
        return Err(BvlcError::InconsistentParameters(
            "this function must not carry an origin address",
        ));
    }
    let mut out = Vec::with_capacity(pdu.len() + 6);
    out.extend_from_slice(&pdu[0..1]);
    out.push(layout.control | CTRL_ORIG_VADDR);
    out.extend_from_slice(&pdu[2..4]);
    if let Some(r) = &layout.dest {
        out.extend_from_slice(&pdu[r.clone()]);
    }
    out.extend_from_slice(new_origin.as_bytes());
    out.extend_from_slice(&pdu[layout.rest..]);
    Ok(out)
}

/// Atomically remove the destination VMAC and set the origin to `origin`,
/// preserving options and payload.
pub fn remove_dest_set_orig(pdu: &[u8], origin: Vmac) -> Result<Vec<u8>> {
    let layout = parse_layout(pdu)?;
    if layout.function.forbids_addresses() {
        return Err(BvlcError::InconsistentParameters(
            "this function must not carry an origin address",
        ));
    }
    let mut out = Vec::with_capacity(pdu.len());
    out.extend_from_slice(&pdu[0..1]);
    out.push((layout.control & !CTRL_DEST_VADDR) | CTRL_ORIG_VADDR);
    out.extend_from_slice(&pdu[2..4]);
    out.extend_from_slice(origin.as_bytes());
    out.extend_from_slice(&pdu[layout.rest..]);
    Ok(out)
}

/// Prepend `opt` to the frame's destination-option chain, re-encoding the
/// whole frame. `opt` must be legal in a destination chain (not secure-path,
/// §4.1); `pdu` is decoded and re-encoded rather than spliced, so this is
/// the allocating counterpart of the source library's aliasing in-place
/// `add_option_to_dest_options(dst, src, opt)` (§9 Buffer aliasing).
pub fn add_option_to_dest_options(pdu: &[u8], opt: HeaderOption) -> Result<Vec<u8>> {
    let mut msg = decode_message(pdu)?;
    if !opt.kind.allowed_in_dest_chain() {
        return Err(BvlcError::InconsistentParameters(
            "secure-path is only valid in the data-option chain",
        ));
    }
    msg.dest_options = options::add_option_to_chain(&msg.dest_options, opt)?;
    encode(&msg)
}

/// Prepend `opt` to the frame's data-option chain, re-encoding the whole
/// frame. See [`add_option_to_dest_options`] for the aliasing note.
pub fn add_option_to_data_options(pdu: &[u8], opt: HeaderOption) -> Result<Vec<u8>> {
    let mut msg = decode_message(pdu)?;
    msg.data_options = options::add_option_to_chain(&msg.data_options, opt)?;
    encode(&msg)
}

/// Strip both origin and destination VMACs, clearing their control flags.
pub fn remove_orig_and_dest(pdu: &[u8]) -> Result<Vec<u8>> {
    let layout = parse_layout(pdu)?;
    let mut out = Vec::with_capacity(pdu.len());
    out.extend_from_slice(&pdu[0..1]);
    out.push(layout.control & !(CTRL_DEST_VADDR | CTRL_ORIG_VADDR));
    out.extend_from_slice(&pdu[2..4]);
    out.extend_from_slice(&pdu[layout.rest..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bvlc_result_ack_round_trips() {
        let frame = encode_bvlc_result_ack(0x7777, 3);
        let decoded = decode_message(&frame).unwrap();
        assert_eq!(decoded.message_id, 0x7777);
        assert_eq!(decoded.origin, None);
        assert_eq!(decoded.destination, None);
        assert_eq!(
            decoded.payload,
            Payload::Result {
                originating_function: 3,
                result: ResultCode::Ack,
            }
        );
        assert_eq!(encode(&decoded).unwrap(), frame);
    }

    #[test]
    fn bvlc_result_nack_round_trips_with_details() {
        let frame = encode_bvlc_result_nack(
            1,
            FunctionCode::ConnectRequest.as_u8(),
            0xcc,
            ErrorClass::Communication,
            ErrorCode::NodeDuplicateVmac,
            Some("duplicate vmac".to_string()),
        )
        .unwrap();
        let decoded = decode_message(&frame).unwrap();
        match decoded.payload {
            Payload::Result {
                result:
                    ResultCode::Nack {
                        error_header_marker,
                        error_class,
                        error_code,
                        ref details,
                    },
                ..
            } => {
                assert_eq!(error_header_marker, 0xcc);
                assert_eq!(error_class, ErrorClass::Communication);
                assert_eq!(error_code, ErrorCode::NodeDuplicateVmac);
                assert_eq!(details.as_deref(), Some("duplicate vmac"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn connect_request_round_trips() {
        let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
        let uuid = Uuid::new([0xAA; 16]);
        let frame = encode_connect_request(42, vmac, uuid, 1500, 1400);
        let decoded = decode_message(&frame).unwrap();
        assert_eq!(
            decoded.payload,
            Payload::ConnectRequest {
                vmac,
                uuid,
                max_bvlc_len: 1500,
                max_npdu_len: 1400,
            }
        );
    }

    #[test]
    fn connect_request_with_address_flag_is_header_encoding_error() {
        let mut frame = encode_connect_request(1, Vmac::new([0; 6]), Uuid::new([0; 16]), 1, 1);
        frame[1] |= CTRL_ORIG_VADDR;
        assert!(matches!(
            decode_message(&frame),
            Err(BvlcError::HeaderEncodingError(_))
        ));
    }

    #[test]
    fn encapsulated_npdu_carries_addresses_and_npdu_bytes() {
        let origin = Vmac::new([1; 6]);
        let dest = Vmac::new([2; 6]);
        let npdu = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let frame = encode_encapsulated_npdu(9, Some(origin), Some(dest), npdu.clone());
        let decoded = decode_message(&frame).unwrap();
        assert_eq!(decoded.origin, Some(origin));
        assert_eq!(decoded.destination, Some(dest));
        assert_eq!(decoded.payload, Payload::EncapsulatedNpdu(npdu));
    }

    #[test]
    fn truncated_frame_is_message_incomplete() {
        let frame = encode_heartbeat_request(1);
        for k in 1..frame.len() {
            let result = decode_message(&frame[..k]);
            assert!(
                matches!(result, Err(BvlcError::MessageIncomplete))
                    || matches!(result, Err(_)),
                "short frame of len {k} must never decode successfully"
            );
            assert!(result.is_err());
        }
    }

    #[test]
    fn need_send_bvlc_result_matches_table() {
        let npdu = decode_message(&encode_encapsulated_npdu(1, None, None, vec![])).unwrap();
        assert!(need_send_bvlc_result(&npdu));
        let ack = decode_message(&encode_heartbeat_ack(1)).unwrap();
        assert!(!need_send_bvlc_result(&ack));
        let req = decode_message(&encode_heartbeat_request(1)).unwrap();
        assert!(need_send_bvlc_result(&req));
        let prop = decode_message(&encode_proprietary(1, 9, 1, vec![])).unwrap();
        assert!(!need_send_bvlc_result(&prop));
    }

    #[test]
    fn set_orig_then_decode_preserves_other_fields() {
        let dest = Vmac::new([9; 6]);
        let frame = encode_encapsulated_npdu(5, None, Some(dest), vec![1, 2, 3]);
        let origin = Vmac::new([7; 6]);
        let edited = set_orig(&frame, origin).unwrap();
        let decoded = decode_message(&edited).unwrap();
        assert_eq!(decoded.origin, Some(origin));
        assert_eq!(decoded.destination, Some(dest));
        assert_eq!(decoded.payload, Payload::EncapsulatedNpdu(vec![1, 2, 3]));
    }

    #[test]
    fn remove_orig_and_dest_is_idempotent() {
        let origin = Vmac::new([1; 6]);
        let dest = Vmac::new([2; 6]);
        let frame = encode_encapsulated_npdu(1, Some(origin), Some(dest), vec![0x55]);
        let stripped = remove_orig_and_dest(&frame).unwrap();
        let re_origin = set_orig(&stripped, origin).unwrap();
        let re_stripped = remove_orig_and_dest(&re_origin).unwrap();
        assert_eq!(stripped, re_stripped);
    }

    #[test]
    fn broadcast_recognition_via_pdu_helpers() {
        let frame = encode_encapsulated_npdu(1, None, Some(Vmac::BROADCAST), vec![]);
        assert!(pdu_has_dest_broadcast(&frame).unwrap());
        assert!(!pdu_has_no_dest(&frame).unwrap());
        assert_eq!(pdu_get_dest(&frame).unwrap(), Some(Vmac::BROADCAST));
    }

    #[test]
    fn five_chained_data_options_is_out_of_memory() {
        let mut opts = Vec::new();
        for _ in 0..5 {
            opts.push(HeaderOption::secure_path(false));
        }
        let msg = DecodedMessage {
            message_id: 1,
            origin: None,
            destination: None,
            dest_options: Vec::new(),
            data_options: opts,
            payload: Payload::AdvertisementSolicitation,
        };
        assert!(matches!(encode(&msg), Err(BvlcError::OutOfMemory)));
    }

    #[test]
    fn add_option_to_data_options_prepends_and_sets_more_bit() {
        let frame = encode_heartbeat_request(1);
        let once = add_option_to_data_options(&frame, HeaderOption::secure_path(false)).unwrap();
        let decoded = decode_message(&once).unwrap();
        assert_eq!(decoded.data_options, vec![HeaderOption::secure_path(false)]);

        let twice = add_option_to_data_options(
            &once,
            HeaderOption::proprietary(true, 1, 1, vec![0xAA]),
        )
        .unwrap();
        let decoded = decode_message(&twice).unwrap();
        assert_eq!(
            decoded.data_options,
            vec![
                HeaderOption::proprietary(true, 1, 1, vec![0xAA]),
                HeaderOption::secure_path(false),
            ]
        );
    }

    #[test]
    fn add_option_to_dest_options_rejects_secure_path() {
        let frame = encode_heartbeat_request(1);
        assert!(add_option_to_dest_options(&frame, HeaderOption::secure_path(false)).is_err());
    }

    #[test]
    fn five_chained_data_options_via_add_option_is_out_of_memory() {
        let mut frame = encode_heartbeat_request(1);
        for _ in 0..MAX_OPTIONS_PER_CHAIN {
            frame = add_option_to_data_options(&frame, HeaderOption::secure_path(false)).unwrap();
        }
        assert!(matches!(
            add_option_to_data_options(&frame, HeaderOption::secure_path(false)),
            Err(BvlcError::OutOfMemory)
        ));
    }

    #[test]
    fn secure_path_in_dest_options_is_rejected() {
        let msg = DecodedMessage {
            message_id: 1,
            origin: None,
            destination: None,
            dest_options: vec![HeaderOption::secure_path(false)],
            data_options: Vec::new(),
            payload: Payload::AdvertisementSolicitation,
        };
        assert!(encode(&msg).is_err());
    }
}
