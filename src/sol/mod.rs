//! Local Shared Object container
//!
//! SOL (".sol") is Flash's persisted-object file format: a thin envelope
//! around an AMF0 or AMF3 payload.
//!
//! File layout:
//! ```text
//! +------+----------+--------+------------------+
//! | 00BF | Size(4)  | "TCSO" | 00 04 00 00 00 00 |
//! +------+----------+--------+------------------+
//! | NameLen(2) | Name(N) | Reserved(4) | Ver(1) |
//! +--------------------------------------------+
//! | NameLen(2) | Name | AMF value | 00 | ...    |
//! +--------------------------------------------+
//! ```
//!
//! `Size` counts every byte after itself. Each body entry is a
//! u16-length-prefixed UTF-8 name, one AMF value in the envelope's
//! version, and a mandatory 0x00 terminator. All entries of one file share
//! a single codec pass, so AMF3 reference tables span the whole body.

use std::fs;
use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;

use crate::amf::amf0::{Amf0Decoder, Amf0Encoder};
use crate::amf::amf3::{Amf3Decoder, Amf3Encoder};
use crate::amf::value::Value;
use crate::amf::AmfVersion;
use crate::error::AmfError;
use crate::stream::ByteStream;

const MAGIC: [u8; 2] = [0x00, 0xBF];
const SIGNATURE: &[u8; 4] = b"TCSO";
const PADDING: [u8; 6] = [0x00, 0x04, 0x00, 0x00, 0x00, 0x00];

/// A parsed Local Shared Object
#[derive(Debug, Clone, PartialEq)]
pub struct Sol {
    /// Root name from the header
    pub name: String,
    /// AMF version of the body
    pub version: AmfVersion,
    /// Root entries in file order
    pub body: Vec<(String, Value)>,
}

impl Sol {
    /// Empty shared object with the given root name and version
    pub fn new(name: impl Into<String>, version: AmfVersion) -> Self {
        Self {
            name: name.into(),
            version,
            body: Vec::new(),
        }
    }

    /// Look up a root entry
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.body.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Insert or replace a root entry, preserving insertion order
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.body.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.body.push((name, value));
        }
    }

    /// Serialize the whole file
    pub fn to_bytes(&self) -> Result<Bytes, AmfError> {
        let mut stream = ByteStream::new();
        stream.write_bytes(&MAGIC);
        stream.write_u32(0); // patched below
        stream.write_bytes(SIGNATURE);
        stream.write_bytes(&PADDING);
        if self.name.len() > 0xFFFF {
            return Err(AmfError::OutOfRange("root name length"));
        }
        stream.write_u16(self.name.len() as u16);
        stream.write_bytes(self.name.as_bytes());
        stream.write_u32(0); // reserved
        stream.write_u8(self.version as u8);

        let mut amf0 = Amf0Encoder::new();
        let mut amf3 = Amf3Encoder::new();
        for (name, value) in &self.body {
            if name.len() > 0xFFFF {
                return Err(AmfError::OutOfRange("entry name length"));
            }
            stream.write_u16(name.len() as u16);
            stream.write_bytes(name.as_bytes());
            match self.version {
                AmfVersion::Amf0 => amf0.encode(&mut stream, value)?,
                AmfVersion::Amf3 => amf3.encode(&mut stream, value)?,
            }
            stream.write_u8(0); // entry terminator
        }

        // Patch the size field: every byte after it
        let total = stream.len() as u32 - 6;
        stream.seek(SeekFrom::Start(2))?;
        stream.write_u32(total);
        stream.seek(SeekFrom::End(0))?;
        Ok(stream.into_bytes())
    }

    /// Parse a whole file
    pub fn from_bytes(data: &[u8]) -> Result<Sol, AmfError> {
        let mut stream = ByteStream::from_slice(data);

        if stream.read_bytes(2)? != MAGIC {
            return Err(AmfError::BadHeader("bad magic bytes"));
        }
        let declared = stream.read_u32()? as usize;
        if declared != stream.remaining() {
            // Some writers get this wrong; the body is parsed to EOF anyway
            tracing::warn!(
                declared,
                actual = stream.remaining(),
                "SOL size field does not match file size"
            );
        }
        if stream.read_bytes(4)? != SIGNATURE.as_slice() {
            return Err(AmfError::BadHeader("missing TCSO signature"));
        }
        stream.read_bytes(PADDING.len())?;

        let name_len = stream.read_u16()? as usize;
        let name = stream.read_utf8(name_len)?;
        stream.read_u32()?; // reserved
        let version = AmfVersion::try_from(stream.read_u8()?)?;

        let mut amf0 = Amf0Decoder::new();
        let mut amf3 = Amf3Decoder::new();
        let mut body = Vec::new();
        while !stream.at_eof() {
            let entry_len = stream.read_u16()? as usize;
            let entry_name = stream.read_utf8(entry_len)?;
            let value = match version {
                AmfVersion::Amf0 => amf0.decode(&mut stream)?,
                AmfVersion::Amf3 => amf3.decode(&mut stream)?,
            };
            if stream.read_u8()? != 0 {
                return Err(AmfError::BadHeader("missing entry terminator"));
            }
            body.push((entry_name, value));
        }

        Ok(Sol {
            name,
            version,
            body,
        })
    }

    /// Write the file atomically: serialize, write a sibling temp file,
    /// then rename over the target. Handles close on every path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AmfError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;

        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        fs::write(&tmp, &bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "SOL saved");
        Ok(())
    }

    /// Read and parse a file. The handle closes on every path.
    pub fn load(path: impl AsRef<Path>) -> Result<Sol, AmfError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let sol = Self::from_bytes(&data)?;
        tracing::debug!(path = %path.display(), entries = sol.body.len(), "SOL loaded");
        Ok(sol)
    }
}

/// Serialize a name/value mapping as a shared object file
pub fn save(
    path: impl AsRef<Path>,
    name: impl Into<String>,
    body: &[(String, Value)],
    version: AmfVersion,
) -> Result<(), AmfError> {
    let sol = Sol {
        name: name.into(),
        version,
        body: body.to_vec(),
    };
    sol.save(path)
}

/// Load a shared object file and return its root mapping
pub fn load(path: impl AsRef<Path>) -> Result<Vec<(String, Value)>, AmfError> {
    Ok(Sol::load(path)?.body)
}
