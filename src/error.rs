//! Error types
//!
//! All codec operations share a single error enum. Decode-side variants
//! describe malformed wire data; encode-side variants describe host values
//! that have no wire representation. `EndOfStream` is special: the
//! iterator-style decode APIs treat it as normal exhaustion at the top
//! level and only propagate it when it happens inside a value.

use std::fmt;
use std::io;

/// Error type for AMF encoding, decoding and SOL file operations
#[derive(Debug)]
pub enum AmfError {
    /// Ran out of bytes in the middle of a value
    EndOfStream,
    /// Unrecognized type marker byte
    UnknownMarker(u8),
    /// String payload was not valid UTF-8
    InvalidUtf8,
    /// Reference index points past the end of the reference table
    InvalidReference(usize),
    /// Trait reference with no trait registered at that index
    MissingTrait(usize),
    /// Object body not terminated by the empty-key/end-marker sentinel
    InvalidObjectEnd,
    /// Nesting exceeded the decoder depth limit
    NestingTooDeep,
    /// Malformed container framing (SOL magic, signature or version)
    BadHeader(&'static str),
    /// XML payload used a forbidden construct (DTD or entity declaration)
    ForbiddenXml(&'static str),
    /// Host value has no representation in the target format
    Unencodable(&'static str),
    /// A count or index exceeded its wire-format range
    OutOfRange(&'static str),
    /// Class alias required during decode but not registered
    UnknownClassAlias(String),
    /// Internal reference-table invariant violation
    ReferenceTable(&'static str),
    /// I/O failure in the SOL file surface
    Io(io::Error),
}

impl AmfError {
    /// True for errors caused by malformed wire data
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            AmfError::EndOfStream
                | AmfError::UnknownMarker(_)
                | AmfError::InvalidUtf8
                | AmfError::InvalidReference(_)
                | AmfError::MissingTrait(_)
                | AmfError::InvalidObjectEnd
                | AmfError::NestingTooDeep
                | AmfError::BadHeader(_)
                | AmfError::ForbiddenXml(_)
        )
    }

    /// True for errors caused by an unencodable host value
    pub fn is_encode(&self) -> bool {
        matches!(self, AmfError::Unencodable(_) | AmfError::OutOfRange(_))
    }
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::EndOfStream => write!(f, "Unexpected end of stream"),
            AmfError::UnknownMarker(m) => write!(f, "Unknown type marker: 0x{:02X}", m),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in string payload"),
            AmfError::InvalidReference(idx) => write!(f, "Reference index out of range: {}", idx),
            AmfError::MissingTrait(idx) => write!(f, "Trait reference out of range: {}", idx),
            AmfError::InvalidObjectEnd => write!(f, "Missing or malformed object end marker"),
            AmfError::NestingTooDeep => write!(f, "Nesting depth limit exceeded"),
            AmfError::BadHeader(what) => write!(f, "Malformed container header: {}", what),
            AmfError::ForbiddenXml(what) => write!(f, "Forbidden XML construct: {}", what),
            AmfError::Unencodable(what) => write!(f, "Value cannot be encoded: {}", what),
            AmfError::OutOfRange(what) => write!(f, "Value out of wire-format range: {}", what),
            AmfError::UnknownClassAlias(name) => write!(f, "Unknown class alias: {}", name),
            AmfError::ReferenceTable(what) => {
                write!(f, "Reference table invariant violated: {}", what)
            }
            AmfError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for AmfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AmfError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AmfError {
    fn from(e: io::Error) -> Self {
        AmfError::Io(e)
    }
}
