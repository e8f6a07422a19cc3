//! BVLC-SC header options: the secure-path and proprietary option types that
//! may be chained onto a frame's destination-option or data-option list.
//!
//! Option header byte layout: bits 0..4 are the option type (1 = secure-path,
//! 31 = proprietary), bit `0x20` is has-data, bit `0x40` is more-options, bit
//! `0x80` is must-understand. Secure-path carries no data and must have
//! has-data clear. Proprietary carries `u16 length`, `u16 vendor-id`, `u8
//! option-type`, then `length - 3` data bytes, and must have has-data set.

use bytes::{Buf, BufMut};

use super::error::{BvlcError, Result};

const OPTION_TYPE_MASK: u8 = 0x1F;
const HEADER_DATA: u8 = 0x20;
const HEADER_MORE: u8 = 0x40;
const HEADER_MUST_UNDERSTAND: u8 = 0x80;

const OPTION_TYPE_SECURE_PATH: u8 = 1;
const OPTION_TYPE_PROPRIETARY: u8 = 31;

/// At most four options may be chained together (§8 Chain limit); a fifth
/// `add_option_to_*` call is an out-of-memory codec error.
pub const MAX_OPTIONS_PER_CHAIN: usize = 4;

/// The type-specific body of a header option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionKind {
    /// Carries no data; valid only in the data-option chain, never dest.
    SecurePath,
    /// Vendor-specific payload, valid in either chain.
    Proprietary {
        vendor_id: u16,
        option_type: u8,
        data: Vec<u8>,
    },
}

impl OptionKind {
    const fn type_byte(&self) -> u8 {
        match self {
            OptionKind::SecurePath => OPTION_TYPE_SECURE_PATH,
            OptionKind::Proprietary { .. } => OPTION_TYPE_PROPRIETARY,
        }
    }

    const fn has_data(&self) -> bool {
        matches!(self, OptionKind::Proprietary { .. })
    }

    /// Secure-path is only legal in the data-option chain (§4.1).
    pub const fn allowed_in_dest_chain(&self) -> bool {
        !matches!(self, OptionKind::SecurePath)
    }
}

/// A single decoded header option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderOption {
    pub must_understand: bool,
    pub kind: OptionKind,
}

impl HeaderOption {
    pub const fn secure_path(must_understand: bool) -> Self {
        HeaderOption {
            must_understand,
            kind: OptionKind::SecurePath,
        }
    }

    pub const fn proprietary(
        must_understand: bool,
        vendor_id: u16,
        option_type: u8,
        data: Vec<u8>,
    ) -> Self {
        HeaderOption {
            must_understand,
            kind: OptionKind::Proprietary {
                vendor_id,
                option_type,
                data,
            },
        }
    }

    /// Encode this option, setting the more-options bit iff `more` is true.
    pub fn encode(&self, buf: &mut Vec<u8>, more: bool) {
        let mut marker = self.kind.type_byte() & OPTION_TYPE_MASK;
        if self.kind.has_data() {
            marker |= HEADER_DATA;
        }
        if more {
            marker |= HEADER_MORE;
        }
        if self.must_understand {
            marker |= HEADER_MUST_UNDERSTAND;
        }
        buf.put_u8(marker);
        if let OptionKind::Proprietary {
            vendor_id,
            option_type,
            data,
        } = &self.kind
        {
            let length = 2 + 1 + data.len();
            buf.put_u16(length as u16);
            buf.put_u16(*vendor_id);
            buf.put_u8(*option_type);
            buf.extend_from_slice(data);
        }
    }

    /// Decode one option starting at the front of `input`. Returns the option,
    /// whether another option follows, and the number of bytes consumed.
    fn decode_one(input: &[u8]) -> Result<(Self, bool, usize)> {
        if input.is_empty() {
            return Err(BvlcError::TruncatedAddressOrOption);
        }
        let marker = input[0];
        let opt_type = marker & OPTION_TYPE_MASK;
        let has_data = marker & HEADER_DATA != 0;
        let more = marker & HEADER_MORE != 0;
        let must_understand = marker & HEADER_MUST_UNDERSTAND != 0;

        match opt_type {
            OPTION_TYPE_SECURE_PATH => {
                if has_data {
                    return Err(BvlcError::OptionDataMismatch);
                }
                Ok((Self::secure_path(must_understand), more, 1))
            }
            OPTION_TYPE_PROPRIETARY => {
                if !has_data {
                    return Err(BvlcError::OptionDataMismatch);
                }
                let mut rest = &input[1..];
                if rest.len() < 2 {
                    return Err(BvlcError::TruncatedAddressOrOption);
                }
                let length = rest.get_u16() as usize;
                if length < 3 {
                    return Err(BvlcError::HeaderEncodingError(marker));
                }
                if rest.len() < length {
                    return Err(BvlcError::TruncatedAddressOrOption);
                }
                let vendor_id = (&rest[0..2]).get_u16();
                let option_type = rest[2];
                let data = rest[3..length].to_vec();
                let consumed = 1 + 2 + length;
                Ok((
                    Self::proprietary(must_understand, vendor_id, option_type, data),
                    more,
                    consumed,
                ))
            }
            _ => Err(BvlcError::HeaderEncodingError(marker)),
        }
    }
}

/// Decode a full option chain starting at the front of `input`.
///
/// Returns the decoded options, in wire order, and the number of bytes the
/// chain occupied. Stops after an option whose more-options bit is clear.
pub fn decode_chain(input: &[u8]) -> Result<(Vec<HeaderOption>, usize)> {
    let mut options = Vec::new();
    let mut offset = 0;
    loop {
        let (option, more, consumed) = HeaderOption::decode_one(&input[offset..])?;
        offset += consumed;
        options.push(option);
        if options.len() > MAX_OPTIONS_PER_CHAIN {
            return Err(BvlcError::OutOfMemory);
        }
        if !more {
            break;
        }
        if offset >= input.len() {
            return Err(BvlcError::OptionChainUnterminated);
        }
    }
    Ok((options, offset))
}

/// Encode a full option chain, setting every option's more-options bit except
/// the last.
pub fn encode_chain(buf: &mut Vec<u8>, options: &[HeaderOption]) -> Result<()> {
    if options.len() > MAX_OPTIONS_PER_CHAIN {
        return Err(BvlcError::OutOfMemory);
    }
    for (i, option) in options.iter().enumerate() {
        option.encode(buf, i + 1 < options.len());
    }
    Ok(())
}

/// Prepend `opt` to an existing chain, re-encoding the whole chain so the
/// new option's more-options bit is set and the prior head's bit is
/// preserved. `src` and `dst` may be the same `Vec` (aliasing is permitted
/// per §4.1).
pub fn add_option_to_chain(
    existing: &[HeaderOption],
    opt: HeaderOption,
) -> Result<Vec<HeaderOption>> {
    if existing.len() + 1 > MAX_OPTIONS_PER_CHAIN {
        return Err(BvlcError::OutOfMemory);
    }
    let mut chain = Vec::with_capacity(existing.len() + 1);
    chain.push(opt);
    chain.extend_from_slice(existing);
    Ok(chain)
}
