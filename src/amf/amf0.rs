//! AMF0 encoder and decoder
//!
//! AMF0 is the original Action Message Format used by Flash remoting and
//! Local Shared Objects.
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x04 - MovieClip (reserved, not supported)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x07 - Reference (16-bit index)
//! 0x08 - ECMA Array (associative array)
//! 0x09 - Object End (0x000009 sequence)
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double + timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! 0x0D - Unsupported
//! 0x0E - RecordSet (reserved, not supported)
//! 0x0F - XML Document
//! 0x10 - Typed Object (class name + properties)
//! 0x11 - AVM+ (switch to AMF3)
//! ```
//!
//! AMF0 keeps a single reference table, for complex values only; strings
//! and scalars are never reference-eligible. The encoder interns a complex
//! value before writing its body, so cyclic graphs terminate as 0x07
//! back-references. A 0x11 marker switches the remainder of that value to
//! AMF3 rules; the embedded AMF3 context is carried across all 0x11 values
//! of one payload.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::rc::Rc;

use bytes::Bytes;

use super::amf3::{Amf3Decoder, Amf3Encoder};
use super::context::{EncodeContext, ObjKey};
use super::value::{AmfArray, AmfObject, Value};
use crate::error::AmfError;
use crate::registry::dispatch::{self, Adapted, ValueWriter};
use crate::registry::lookup_class_alias;
use crate::stream::ByteStream;
use crate::xml::xml_adapter;

// AMF0 type markers
const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;
const MARKER_AVMPLUS: u8 = 0x11;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 encoder with a reference table for complex values
pub struct Amf0Encoder {
    ctx: EncodeContext,
    /// Lazily created AMF3 encoder for 0x11-upgraded values; its context
    /// persists across all upgraded values of one payload
    amf3: Option<Box<Amf3Encoder>>,
}

impl Amf0Encoder {
    /// Create an encoder with a fresh reference table
    pub fn new() -> Self {
        Self {
            ctx: EncodeContext::new(),
            amf3: None,
        }
    }

    /// Reset encoder state (call between independent payloads)
    pub fn reset(&mut self) {
        self.ctx.clear();
        if let Some(amf3) = &mut self.amf3 {
            amf3.reset();
        }
    }

    /// Encode a single value at the stream cursor
    pub fn encode(&mut self, stream: &mut ByteStream, value: &Value) -> Result<(), AmfError> {
        match value {
            Value::Null => {
                stream.write_u8(MARKER_NULL);
                Ok(())
            }
            Value::Undefined => {
                stream.write_u8(MARKER_UNDEFINED);
                Ok(())
            }
            Value::Boolean(b) => {
                stream.write_u8(MARKER_BOOLEAN);
                stream.write_u8(*b as u8);
                Ok(())
            }
            Value::Integer(i) => {
                // AMF0 has no integer type
                stream.write_u8(MARKER_NUMBER);
                stream.write_double(*i as f64);
                Ok(())
            }
            Value::Number(n) => {
                stream.write_u8(MARKER_NUMBER);
                stream.write_double(*n);
                Ok(())
            }
            Value::ByteArray(data) => {
                // AMF0 has no byte-array type; raw bytes travel as a
                // length-prefixed string
                self.write_raw_string(stream, data);
                Ok(())
            }
            Value::String(s) => {
                self.write_raw_string(stream, s.as_bytes());
                Ok(())
            }
            Value::Array(array) => {
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let array = array.borrow();
                if array.assoc.is_empty() {
                    stream.write_u8(MARKER_STRICT_ARRAY);
                    stream.write_u32(array.dense.len() as u32);
                    for element in &array.dense {
                        self.encode(stream, element)?;
                    }
                } else {
                    self.write_ecma_body(stream, &array)?;
                }
                Ok(())
            }
            Value::VectorInt(_)
            | Value::VectorUInt(_)
            | Value::VectorDouble(_)
            | Value::VectorObject(_) => {
                // Vectors are AMF3-only; flatten to a strict array
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let elements = vector_elements(value);
                stream.write_u8(MARKER_STRICT_ARRAY);
                stream.write_u32(elements.len() as u32);
                for element in &elements {
                    self.encode(stream, element)?;
                }
                Ok(())
            }
            Value::Dictionary(dict) => {
                // String-keyed dictionaries flatten to an ECMA array
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let dict = dict.borrow();
                let mut assoc = Vec::with_capacity(dict.entries.len());
                for (key, val) in &dict.entries {
                    match key {
                        Value::String(k) => assoc.push((k.clone(), val.clone())),
                        _ => {
                            return Err(AmfError::Unencodable(
                                "dictionary with non-string keys in AMF0",
                            ))
                        }
                    }
                }
                let array = AmfArray {
                    dense: Vec::new(),
                    assoc,
                };
                self.write_ecma_body(stream, &array)?;
                Ok(())
            }
            Value::Date { millis, timezone } => {
                stream.write_u8(MARKER_DATE);
                stream.write_double(*millis);
                stream.write_i16(*timezone);
                Ok(())
            }
            Value::Xml { .. } => {
                let bytes = xml_adapter().to_bytes(value)?;
                stream.write_u8(MARKER_XML_DOCUMENT);
                stream.write_u32(bytes.len() as u32);
                stream.write_bytes(&bytes);
                Ok(())
            }
            Value::Object(_) => self.encode_object(stream, value),
        }
    }

    /// Encode a value with the 0x11 AVM+ marker, switching it to AMF3.
    /// The embedded AMF3 reference tables persist across calls.
    pub fn encode_amf3(&mut self, stream: &mut ByteStream, value: &Value) -> Result<(), AmfError> {
        stream.write_u8(MARKER_AVMPLUS);
        self.amf3
            .get_or_insert_with(|| Box::new(Amf3Encoder::new()))
            .encode(stream, value)
    }

    fn encode_object(&mut self, stream: &mut ByteStream, value: &Value) -> Result<(), AmfError> {
        match dispatch::dispatch_value(value, self, stream)? {
            Adapted::Written => return Ok(()),
            Adapted::Replace(replacement) => return self.encode(stream, &replacement),
            Adapted::Unhandled => {}
        }

        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let object = match value {
            Value::Object(rc) => rc,
            _ => unreachable!("encode_object called with non-object"),
        };
        let class_name = object.borrow().class_name.clone();

        let mut alias = match &class_name {
            Some(name) => {
                stream.write_u8(MARKER_TYPED_OBJECT);
                self.write_utf8(stream, name)?;
                self.ctx.resolve_alias(name)
            }
            None => {
                stream.write_u8(MARKER_OBJECT);
                crate::registry::ClassAlias::new("").dynamic(true)
            }
        };

        if alias.defer && alias.static_attrs.is_empty() && !alias.dynamic {
            let derived: Vec<String> = object
                .borrow()
                .properties
                .iter()
                .map(|(k, _)| k.clone())
                .filter(|k| !alias.is_excluded(k))
                .collect();
            alias.static_attrs = derived;
            self.ctx.cache_alias(alias.clone());
        }

        let object_ref = object.borrow();

        // Static members first, in declared order
        for host in &alias.static_attrs {
            if alias.is_excluded(host) {
                continue;
            }
            let member = object_ref.get(host).cloned().unwrap_or(Value::Undefined);
            self.write_utf8(stream, alias.wire_name(host))?;
            self.encode(stream, &member)?;
        }

        // Remaining members in insertion order
        if alias.dynamic || class_name.is_none() {
            for (host, member) in &object_ref.properties {
                if alias.is_excluded(host) || alias.static_attrs.iter().any(|a| a == host) {
                    continue;
                }
                self.write_utf8(stream, alias.wire_name(host))?;
                self.encode(stream, member)?;
            }
        }

        stream.write_u16(0);
        stream.write_u8(MARKER_OBJECT_END);
        Ok(())
    }

    /// Emit a 0x07 back-reference if this complex value was already
    /// written; otherwise intern it (before the body, so cycles resolve)
    /// and report that an inline body must follow.
    fn write_reference(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
    ) -> Result<bool, AmfError> {
        let key = match ObjKey::identity(value) {
            Some(key) => key,
            None => return Ok(false),
        };
        if let Some(index) = self.ctx.object_index(&key) {
            if index > u16::MAX as u32 {
                return Err(AmfError::OutOfRange("AMF0 reference index"));
            }
            stream.write_u8(MARKER_REFERENCE);
            stream.write_u16(index as u16);
            return Ok(true);
        }
        self.ctx.intern_object(key, value.clone())?;
        Ok(false)
    }

    fn write_ecma_body(
        &mut self,
        stream: &mut ByteStream,
        array: &AmfArray,
    ) -> Result<(), AmfError> {
        stream.write_u8(MARKER_ECMA_ARRAY);
        // Length hint is advisory; decoders must tolerate mismatches
        stream.write_u32((array.dense.len() + array.assoc.len()) as u32);
        for (index, element) in array.dense.iter().enumerate() {
            self.write_utf8(stream, &index.to_string())?;
            self.encode(stream, element)?;
        }
        for (key, element) in &array.assoc {
            self.write_utf8(stream, key)?;
            self.encode(stream, element)?;
        }
        stream.write_u16(0);
        stream.write_u8(MARKER_OBJECT_END);
        Ok(())
    }

    /// Write a string value with the String/LongString marker chosen by
    /// byte length
    fn write_raw_string(&mut self, stream: &mut ByteStream, bytes: &[u8]) {
        if bytes.len() > 0xFFFF {
            stream.write_u8(MARKER_LONG_STRING);
            stream.write_u32(bytes.len() as u32);
        } else {
            stream.write_u8(MARKER_STRING);
            stream.write_u16(bytes.len() as u16);
        }
        stream.write_bytes(bytes);
    }

    /// Write a UTF-8 name with 16-bit length prefix (no type marker)
    fn write_utf8(&mut self, stream: &mut ByteStream, s: &str) -> Result<(), AmfError> {
        if s.len() > 0xFFFF {
            return Err(AmfError::OutOfRange("property name length"));
        }
        stream.write_u16(s.len() as u16);
        stream.write_bytes(s.as_bytes());
        Ok(())
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueWriter for Amf0Encoder {
    fn write_value(&mut self, stream: &mut ByteStream, value: &Value) -> Result<(), AmfError> {
        self.encode(stream, value)
    }
}

/// Dense view of a vector value for AMF0 flattening
fn vector_elements(value: &Value) -> Vec<Value> {
    match value {
        Value::VectorInt(v) => v.borrow().items.iter().map(|i| Value::Integer(*i)).collect(),
        Value::VectorUInt(v) => v
            .borrow()
            .items
            .iter()
            .map(|i| Value::Number(*i as f64))
            .collect(),
        Value::VectorDouble(v) => v.borrow().items.iter().map(|i| Value::Number(*i)).collect(),
        Value::VectorObject(v) => v.borrow().items.clone(),
        _ => Vec::new(),
    }
}

/// AMF0 decoder with lenient parsing mode
pub struct Amf0Decoder {
    /// Reference table for complex values
    references: Vec<Value>,
    /// Decoder for 0x11-embedded AMF3 values; context carries forward
    /// across the whole payload
    amf3: Amf3Decoder,
    /// Tolerate encoder quirks (missing end markers, unknown markers)
    lenient: bool,
    /// Current nesting depth
    depth: usize,
    /// Scratch space for post-decode processors
    extra: HashMap<String, String>,
}

impl Amf0Decoder {
    /// Create a decoder with default settings (lenient)
    pub fn new() -> Self {
        Self {
            references: Vec::new(),
            amf3: Amf3Decoder::new(),
            lenient: true,
            depth: 0,
            extra: HashMap::new(),
        }
    }

    /// Create a decoder with explicit lenient mode
    pub fn with_lenient(lenient: bool) -> Self {
        Self {
            references: Vec::new(),
            amf3: Amf3Decoder::with_lenient(lenient),
            lenient,
            depth: 0,
            extra: HashMap::new(),
        }
    }

    /// Reset decoder state (call between independent payloads)
    pub fn reset(&mut self) {
        self.references.clear();
        self.amf3.reset();
        self.depth = 0;
        self.extra.clear();
    }

    /// Decode a single value. Post-decode processors run when this call
    /// returns to the outermost level.
    pub fn decode(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }
        let result = (|| {
            let marker = stream.read_u8()?;
            self.decode_value(marker, stream)
        })();
        self.depth -= 1;
        match result {
            Ok(value) if self.depth == 0 => {
                Ok(dispatch::run_post_decode(value, &mut self.extra))
            }
            other => other,
        }
    }

    /// Decode values until the stream is exhausted
    pub fn decode_all(&mut self, stream: &mut ByteStream) -> Result<Vec<Value>, AmfError> {
        let mut values = Vec::new();
        while let Some(value) = self.next_value(stream)? {
            values.push(value);
        }
        Ok(values)
    }

    /// Pull the next top-level value. Returns `Ok(None)` when the stream
    /// is exhausted; a truncated top-level value seeks back to its start
    /// and also signals exhaustion so the caller can supply more bytes.
    pub fn next_value(&mut self, stream: &mut ByteStream) -> Result<Option<Value>, AmfError> {
        if stream.at_eof() {
            return Ok(None);
        }
        let start = stream.tell();
        match self.decode(stream) {
            Ok(value) => Ok(Some(value)),
            Err(AmfError::EndOfStream) => {
                tracing::trace!(position = start, "Top-level value truncated, seeking back");
                stream.seek(SeekFrom::Start(start as u64))?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn decode_value(&mut self, marker: u8, stream: &mut ByteStream) -> Result<Value, AmfError> {
        match marker {
            MARKER_NUMBER => Ok(Value::Number(stream.read_double()?)),
            MARKER_BOOLEAN => Ok(Value::Boolean(stream.read_u8()? != 0)),
            MARKER_STRING => {
                let s = self.read_utf8(stream)?;
                Ok(Value::String(s))
            }
            MARKER_OBJECT => self.decode_object(stream),
            MARKER_NULL => Ok(Value::Null),
            MARKER_UNDEFINED => Ok(Value::Undefined),
            MARKER_REFERENCE => self.decode_reference(stream),
            MARKER_ECMA_ARRAY => self.decode_ecma_array(stream),
            MARKER_STRICT_ARRAY => self.decode_strict_array(stream),
            MARKER_DATE => {
                let millis = stream.read_double()?;
                let timezone = stream.read_int(2)? as i16;
                Ok(Value::Date { millis, timezone })
            }
            MARKER_LONG_STRING => {
                let s = self.read_utf8_long(stream)?;
                Ok(Value::String(s))
            }
            MARKER_UNSUPPORTED => Ok(Value::Undefined),
            MARKER_XML_DOCUMENT => {
                let len = stream.read_u32()? as usize;
                let bytes = stream.read_bytes(len)?.to_vec();
                xml_adapter().from_bytes(&bytes, true, true, true)
            }
            MARKER_TYPED_OBJECT => self.decode_typed_object(stream),
            MARKER_AVMPLUS => {
                // Switch to AMF3 rules; the embedded context carries
                // forward across all upgraded values of this payload
                self.amf3.decode_embedded(stream)
            }
            _ => {
                if self.lenient {
                    tracing::warn!(marker, "Unknown AMF0 marker, decoding as undefined");
                    Ok(Value::Undefined)
                } else {
                    Err(AmfError::UnknownMarker(marker))
                }
            }
        }
    }

    fn decode_object(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let rc = Rc::new(RefCell::new(AmfObject::anonymous()));
        self.references.push(Value::Object(rc.clone()));

        let properties = self.read_pairs(stream)?;
        rc.borrow_mut().properties = properties;
        Ok(Value::Object(rc))
    }

    fn decode_typed_object(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let class_name = self.read_utf8(stream)?;
        if !self.lenient && lookup_class_alias(&class_name).is_none() {
            return Err(AmfError::UnknownClassAlias(class_name));
        }
        let alias = lookup_class_alias(&class_name);

        let mut object = AmfObject::typed(class_name);
        object.proxy = alias.as_ref().map(|a| a.proxy).unwrap_or(false);
        let rc = Rc::new(RefCell::new(object));
        self.references.push(Value::Object(rc.clone()));

        let pairs = self.read_pairs(stream)?;
        let properties = match &alias {
            Some(alias) => pairs
                .into_iter()
                .map(|(wire, value)| (alias.host_name(&wire).to_string(), value))
                .filter(|(host, _)| !alias.is_excluded(host) && !alias.is_readonly(host))
                .collect(),
            None => pairs,
        };
        rc.borrow_mut().properties = properties;
        Ok(Value::Object(rc))
    }

    fn decode_ecma_array(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        // Length hint is advisory and not always accurate
        let _hint = stream.read_u32()?;

        let rc = Rc::new(RefCell::new(AmfArray::default()));
        self.references.push(Value::Array(rc.clone()));

        let mut assoc = self.read_pairs(stream)?;

        // Re-densify a leading run of sequential integer keys, which is
        // how the encoder writes the dense part of a mixed array
        let mut dense = Vec::new();
        while assoc
            .first()
            .map(|(k, _)| k == &dense.len().to_string())
            .unwrap_or(false)
        {
            dense.push(assoc.remove(0).1);
        }

        *rc.borrow_mut() = AmfArray { dense, assoc };
        Ok(Value::Array(rc))
    }

    fn decode_strict_array(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let count = stream.read_u32()? as usize;

        let rc = Rc::new(RefCell::new(AmfArray::default()));
        self.references.push(Value::Array(rc.clone()));

        let mut dense = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            dense.push(self.decode(stream)?);
        }

        rc.borrow_mut().dense = dense;
        Ok(Value::Array(rc))
    }

    fn decode_reference(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let index = stream.read_u16()? as usize;
        self.references
            .get(index)
            .cloned()
            .ok_or(AmfError::InvalidReference(index))
    }

    /// Read name/value pairs up to the empty-key/0x09 sentinel
    fn read_pairs(&mut self, stream: &mut ByteStream) -> Result<Vec<(String, Value)>, AmfError> {
        let mut pairs = Vec::new();
        loop {
            let key = self.read_utf8(stream)?;
            if key.is_empty() {
                if stream.at_eof() {
                    if self.lenient {
                        // Some encoders omit the end marker entirely
                        tracing::warn!("Object body ended without end marker");
                        break;
                    }
                    return Err(AmfError::EndOfStream);
                }
                let end_marker = stream.read_u8()?;
                if end_marker == MARKER_OBJECT_END {
                    break;
                }
                if self.lenient {
                    // Treat the empty key as the end and give the byte back
                    tracing::warn!(end_marker, "Expected object end marker");
                    stream.seek(SeekFrom::Current(-1))?;
                    break;
                }
                return Err(AmfError::InvalidObjectEnd);
            }
            let value = self.decode(stream)?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    /// Read a UTF-8 string with 16-bit length prefix
    fn read_utf8(&mut self, stream: &mut ByteStream) -> Result<String, AmfError> {
        let len = stream.read_u16()? as usize;
        stream.read_utf8(len)
    }

    /// Read a UTF-8 string with 32-bit length prefix
    fn read_utf8_long(&mut self, stream: &mut ByteStream) -> Result<String, AmfError> {
        let len = stream.read_u32()? as usize;
        stream.read_utf8(len)
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single value
pub fn encode(value: &Value) -> Result<Bytes, AmfError> {
    let mut encoder = Amf0Encoder::new();
    let mut stream = ByteStream::new();
    encoder.encode(&mut stream, value)?;
    Ok(stream.into_bytes())
}

/// Convenience function to encode multiple values into one payload,
/// sharing one reference table
pub fn encode_all(values: &[Value]) -> Result<Bytes, AmfError> {
    let mut encoder = Amf0Encoder::new();
    let mut stream = ByteStream::new();
    for value in values {
        encoder.encode(&mut stream, value)?;
    }
    Ok(stream.into_bytes())
}

/// Convenience function to decode a single value
pub fn decode(data: &[u8]) -> Result<Value, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut stream = ByteStream::from_slice(data);
    decoder.decode(&mut stream)
}

/// Convenience function to decode all values in a payload
pub fn decode_all(data: &[u8]) -> Result<Vec<Value>, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut stream = ByteStream::from_slice(data);
    decoder.decode_all(&mut stream)
}
