//! Error taxonomy for the BVLC-SC codec.
//!
//! `BvlcError` is returned by `decode_message` and the header editors. Every
//! variant carries the `(ErrorClass, ErrorCode)` pair a BVLC-Result NAK needs,
//! via [`BvlcError::class`] and [`BvlcError::code`], so a caller can build the
//! NAK directly from a decode failure without a second lookup table.

use thiserror::Error;

/// BACnet error class, as carried in a BVLC-Result NAK payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Device,
    Object,
    Property,
    Resources,
    Security,
    Services,
    Vt,
    Communication,
    Proprietary(u16),
}

impl ErrorClass {
    pub const fn as_u16(self) -> u16 {
        match self {
            ErrorClass::Device => 0,
            ErrorClass::Object => 1,
            ErrorClass::Property => 2,
            ErrorClass::Resources => 3,
            ErrorClass::Security => 4,
            ErrorClass::Services => 5,
            ErrorClass::Vt => 6,
            ErrorClass::Communication => 7,
            ErrorClass::Proprietary(v) => v,
        }
    }

    pub const fn from_u16(v: u16) -> Self {
        match v {
            0 => ErrorClass::Device,
            1 => ErrorClass::Object,
            2 => ErrorClass::Property,
            3 => ErrorClass::Resources,
            4 => ErrorClass::Security,
            5 => ErrorClass::Services,
            6 => ErrorClass::Vt,
            7 => ErrorClass::Communication,
            v => ErrorClass::Proprietary(v),
        }
    }
}

/// BACnet error code, as carried in a BVLC-Result NAK payload.
///
/// Only the codes this codec and connection engine can actually raise are
/// named; anything else decoded off the wire round-trips through
/// [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InconsistentParameters,
    ParameterOutOfRange,
    OutOfMemory,
    NodeDuplicateVmac,
    HeaderEncodingError,
    HeaderNotUnderstood,
    MessageIncomplete,
    NotConfigured,
    PayloadExpected,
    UnexpectedData,
    BvlcFunctionUnknown,
    BvlcProprietaryFunctionUnknown,
    Other(u16),
}

impl ErrorCode {
    pub const fn as_u16(self) -> u16 {
        match self {
            ErrorCode::InconsistentParameters => 7,
            ErrorCode::ParameterOutOfRange => 37,
            ErrorCode::OutOfMemory => 157,
            ErrorCode::NodeDuplicateVmac => 152,
            ErrorCode::HeaderEncodingError => 153,
            ErrorCode::HeaderNotUnderstood => 154,
            ErrorCode::MessageIncomplete => 155,
            ErrorCode::NotConfigured => 156,
            ErrorCode::PayloadExpected => 158,
            ErrorCode::UnexpectedData => 159,
            ErrorCode::BvlcFunctionUnknown => 200,
            ErrorCode::BvlcProprietaryFunctionUnknown => 201,
            ErrorCode::Other(v) => v,
        }
    }

    pub const fn from_u16(v: u16) -> Self {
        match v {
            7 => ErrorCode::InconsistentParameters,
            37 => ErrorCode::ParameterOutOfRange,
            157 => ErrorCode::OutOfMemory,
            152 => ErrorCode::NodeDuplicateVmac,
            153 => ErrorCode::HeaderEncodingError,
            154 => ErrorCode::HeaderNotUnderstood,
            155 => ErrorCode::MessageIncomplete,
            156 => ErrorCode::NotConfigured,
            158 => ErrorCode::PayloadExpected,
            159 => ErrorCode::UnexpectedData,
            200 => ErrorCode::BvlcFunctionUnknown,
            201 => ErrorCode::BvlcProprietaryFunctionUnknown,
            v => ErrorCode::Other(v),
        }
    }
}

/// Errors raised while decoding a BVLC-SC frame or editing its header in place.
#[derive(Debug, Error)]
pub enum BvlcError {
    #[error("frame shorter than the 4-byte BVLC-SC header prefix")]
    MessageIncomplete,

    #[error("address or option flagged present but its bytes are truncated")]
    TruncatedAddressOrOption,

    #[error("function code {0:#04x} carries an address or option it must not")]
    HeaderEncodingError(u8),

    #[error("option chain did not terminate (more-options bit set past end of buffer)")]
    OptionChainUnterminated,

    #[error("option data-bit does not match its declared option type")]
    OptionDataMismatch,

    #[error("unknown BVLC-SC function code {0:#04x}")]
    FunctionUnknown(u8),

    #[error("proprietary function requires a payload but none was supplied")]
    PayloadExpected,

    #[error("function code {0:#04x} does not accept a payload but one was present")]
    UnexpectedData(u8),

    #[error("{field} value {value} is out of the permitted range")]
    ParameterOutOfRange { field: &'static str, value: u32 },

    #[error("field values are mutually inconsistent: {0}")]
    InconsistentParameters(&'static str),

    #[error("buffer too small to encode this message")]
    OutOfMemory,
}

impl BvlcError {
    /// The error class a BVLC-Result NAK should carry for this failure.
    pub const fn class(&self) -> ErrorClass {
        match self {
            BvlcError::OutOfMemory => ErrorClass::Resources,
            _ => ErrorClass::Communication,
        }
    }

    /// The error code a BVLC-Result NAK should carry for this failure.
    pub const fn code(&self) -> ErrorCode {
        match self {
            BvlcError::MessageIncomplete | BvlcError::TruncatedAddressOrOption => {
                ErrorCode::MessageIncomplete
            }
            BvlcError::HeaderEncodingError(_) | BvlcError::OptionChainUnterminated => {
                ErrorCode::HeaderEncodingError
            }
            BvlcError::OptionDataMismatch => ErrorCode::HeaderEncodingError,
            BvlcError::FunctionUnknown(_) => ErrorCode::BvlcFunctionUnknown,
            BvlcError::PayloadExpected => ErrorCode::PayloadExpected,
            BvlcError::UnexpectedData(_) => ErrorCode::UnexpectedData,
            BvlcError::ParameterOutOfRange { .. } => ErrorCode::ParameterOutOfRange,
            BvlcError::InconsistentParameters(_) => ErrorCode::InconsistentParameters,
            BvlcError::OutOfMemory => ErrorCode::OutOfMemory,
        }
    }
}

pub type Result<T> = std::result::Result<T, BvlcError>;
