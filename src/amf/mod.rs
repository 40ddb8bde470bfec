//! AMF codecs
//!
//! Both wire format versions share the value model in [`value`] and the
//! per-pass reference tables in [`context`]. [`amf0`] and [`amf3`] each
//! expose an encoder and a decoder operating over a
//! [`ByteStream`](crate::stream::ByteStream), plus `encode`/`decode`
//! convenience functions for one-shot use.

use std::fmt;

use crate::error::AmfError;

pub mod amf0;
pub mod amf3;
pub mod context;
pub mod value;

pub use context::{DecodeContext, EncodeContext, TraitDef};
pub use value::{
    AmfArray, AmfObject, Dictionary, DoubleVector, IntVector, ObjectVector, UIntVector, Value,
};

/// The wire format version of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AmfVersion {
    Amf0 = 0,
    Amf3 = 3,
}

impl fmt::Display for AmfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfVersion::Amf0 => f.write_str("AMF0"),
            AmfVersion::Amf3 => f.write_str("AMF3"),
        }
    }
}

impl TryFrom<u8> for AmfVersion {
    type Error = AmfError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AmfVersion::Amf0),
            3 => Ok(AmfVersion::Amf3),
            _ => Err(AmfError::BadHeader("unsupported AMF version")),
        }
    }
}
