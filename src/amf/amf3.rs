//! AMF3 encoder and decoder
//!
//! AMF3 is the ActionScript 3.0 serialization format. It's more efficient
//! than AMF0 due to string/object/trait reference tables and a native
//! integer type.
//!
//! Type Markers:
//! ```text
//! 0x00 - Undefined
//! 0x01 - Null
//! 0x02 - Boolean false
//! 0x03 - Boolean true
//! 0x04 - Integer (29-bit signed)
//! 0x05 - Double
//! 0x06 - String
//! 0x07 - XML Document (legacy)
//! 0x08 - Date
//! 0x09 - Array
//! 0x0A - Object
//! 0x0B - XML
//! 0x0C - ByteArray
//! 0x0D - Vector<int>
//! 0x0E - Vector<uint>
//! 0x0F - Vector<double>
//! 0x10 - Vector<Object>
//! 0x11 - Dictionary
//! ```
//!
//! Every reference-eligible value starts with a U29 header: LSB clear
//! means "reference, upper bits are the table index"; LSB set means
//! "inline, upper bits carry length/count/flags". The encoder interns a
//! value *before* writing its body, so self-referential graphs terminate
//! as back-references. The decoder mirrors this by registering a shared
//! placeholder before decoding the body and filling it in place.

use std::cell::RefCell;
use std::io::SeekFrom;
use std::rc::Rc;

use bytes::Bytes;

use super::context::{DecodeContext, EncodeContext, ObjKey, TraitDef, MAX_REFERENCE_INDEX};
use super::value::{
    AmfArray, AmfObject, Dictionary, DoubleVector, IntVector, ObjectVector, UIntVector, Value,
};
use crate::error::AmfError;
use crate::registry::dispatch::{self, Adapted, ValueWriter};
use crate::registry::lookup_class_alias;
use crate::stream::ByteStream;
use crate::xml::xml_adapter;

// AMF3 type markers
const MARKER_UNDEFINED: u8 = 0x00;
const MARKER_NULL: u8 = 0x01;
const MARKER_FALSE: u8 = 0x02;
const MARKER_TRUE: u8 = 0x03;
const MARKER_INTEGER: u8 = 0x04;
const MARKER_DOUBLE: u8 = 0x05;
const MARKER_STRING: u8 = 0x06;
const MARKER_XML_DOC: u8 = 0x07;
const MARKER_DATE: u8 = 0x08;
const MARKER_ARRAY: u8 = 0x09;
const MARKER_OBJECT: u8 = 0x0A;
const MARKER_XML: u8 = 0x0B;
const MARKER_BYTE_ARRAY: u8 = 0x0C;
const MARKER_VECTOR_INT: u8 = 0x0D;
const MARKER_VECTOR_UINT: u8 = 0x0E;
const MARKER_VECTOR_DOUBLE: u8 = 0x0F;
const MARKER_VECTOR_OBJECT: u8 = 0x10;
const MARKER_DICTIONARY: u8 = 0x11;

/// Maximum nesting depth (prevent stack overflow on hostile input)
const MAX_NESTING_DEPTH: usize = 64;

/// AMF3 29-bit signed integer bounds; values outside fall back to Double
const AMF3_INT_MAX: i32 = 0x0FFF_FFFF;
const AMF3_INT_MIN: i32 = -0x1000_0000;

/// Object header: externalizable inline trait (inline|trait-inline|external)
const TRAIT_EXTERNAL_HEADER: u32 = 0x07;

/// Read an AMF3 U29 variable-length integer: 1-4 bytes, 7 bits per byte
/// except the fourth, which carries all 8.
pub(crate) fn read_u29(stream: &mut ByteStream) -> Result<u32, AmfError> {
    let mut value: u32 = 0;
    for i in 0..4 {
        let byte = stream.read_u8()?;
        if i < 3 {
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        } else {
            value = (value << 8) | byte as u32;
        }
    }
    Ok(value)
}

/// Write an AMF3 U29 variable-length integer
pub(crate) fn write_u29(stream: &mut ByteStream, value: u32) {
    let value = value & 0x1FFF_FFFF;
    if value < 0x80 {
        stream.write_u8(value as u8);
    } else if value < 0x4000 {
        stream.write_u8(((value >> 7) & 0x7F) as u8 | 0x80);
        stream.write_u8((value & 0x7F) as u8);
    } else if value < 0x0020_0000 {
        stream.write_u8(((value >> 14) & 0x7F) as u8 | 0x80);
        stream.write_u8(((value >> 7) & 0x7F) as u8 | 0x80);
        stream.write_u8((value & 0x7F) as u8);
    } else {
        stream.write_u8(((value >> 22) & 0x7F) as u8 | 0x80);
        stream.write_u8(((value >> 15) & 0x7F) as u8 | 0x80);
        stream.write_u8(((value >> 8) & 0x7F) as u8 | 0x80);
        stream.write_u8((value & 0xFF) as u8);
    }
}

/// AMF3 encoder with reference tables
pub struct Amf3Encoder {
    ctx: EncodeContext,
}

impl Amf3Encoder {
    /// Create an encoder with a fresh context
    pub fn new() -> Self {
        Self {
            ctx: EncodeContext::new(),
        }
    }

    /// Create an encoder reusing an existing context, sharing its
    /// reference tables with previous passes
    pub fn with_context(ctx: EncodeContext) -> Self {
        Self { ctx }
    }

    /// Reset all reference tables (call between independent payloads)
    pub fn reset(&mut self) {
        self.ctx.clear();
    }

    /// The encoder's reference tables
    pub fn context(&self) -> &EncodeContext {
        &self.ctx
    }

    /// Mutable access to the encoder's reference tables
    pub fn context_mut(&mut self) -> &mut EncodeContext {
        &mut self.ctx
    }

    /// Encode a single value at the stream cursor
    pub fn encode(&mut self, stream: &mut ByteStream, value: &Value) -> Result<(), AmfError> {
        match value {
            Value::Undefined => {
                stream.write_u8(MARKER_UNDEFINED);
                Ok(())
            }
            Value::Null => {
                stream.write_u8(MARKER_NULL);
                Ok(())
            }
            Value::Boolean(false) => {
                stream.write_u8(MARKER_FALSE);
                Ok(())
            }
            Value::Boolean(true) => {
                stream.write_u8(MARKER_TRUE);
                Ok(())
            }
            Value::Integer(i) if (AMF3_INT_MIN..=AMF3_INT_MAX).contains(i) => {
                stream.write_u8(MARKER_INTEGER);
                write_u29(stream, *i as u32 & 0x1FFF_FFFF);
                Ok(())
            }
            Value::Integer(i) => {
                // Out of 29-bit signed range
                stream.write_u8(MARKER_DOUBLE);
                stream.write_double(*i as f64);
                Ok(())
            }
            Value::Number(n) => {
                stream.write_u8(MARKER_DOUBLE);
                stream.write_double(*n);
                Ok(())
            }
            Value::String(s) => {
                stream.write_u8(MARKER_STRING);
                self.write_string(stream, s)
            }
            Value::Date { millis, .. } => {
                stream.write_u8(MARKER_DATE);
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                write_u29(stream, 1);
                stream.write_double(*millis);
                Ok(())
            }
            Value::Xml { legacy, .. } => {
                stream.write_u8(if *legacy { MARKER_XML_DOC } else { MARKER_XML });
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let bytes = xml_adapter().to_bytes(value)?;
                if bytes.len() as u64 > MAX_REFERENCE_INDEX as u64 {
                    return Err(AmfError::OutOfRange("XML payload length"));
                }
                write_u29(stream, ((bytes.len() as u32) << 1) | 1);
                stream.write_bytes(&bytes);
                Ok(())
            }
            Value::ByteArray(data) => {
                stream.write_u8(MARKER_BYTE_ARRAY);
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                if data.len() as u64 > MAX_REFERENCE_INDEX as u64 {
                    return Err(AmfError::OutOfRange("byte array length"));
                }
                write_u29(stream, ((data.len() as u32) << 1) | 1);
                stream.write_bytes(data);
                Ok(())
            }
            Value::Array(array) => {
                stream.write_u8(MARKER_ARRAY);
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let array = array.borrow();
                if array.dense.len() as u64 > MAX_REFERENCE_INDEX as u64 {
                    return Err(AmfError::OutOfRange("array dense length"));
                }
                write_u29(stream, ((array.dense.len() as u32) << 1) | 1);
                for (k, v) in &array.assoc {
                    self.write_string(stream, k)?;
                    self.encode(stream, v)?;
                }
                write_u29(stream, 1); // assoc terminator: empty string
                for v in &array.dense {
                    self.encode(stream, v)?;
                }
                Ok(())
            }
            Value::Object(_) => self.encode_object(stream, value),
            Value::VectorInt(vector) => {
                stream.write_u8(MARKER_VECTOR_INT);
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let vector = vector.borrow();
                write_u29(stream, ((vector.items.len() as u32) << 1) | 1);
                stream.write_u8(vector.fixed as u8);
                for item in &vector.items {
                    stream.write_u32(*item as u32);
                }
                Ok(())
            }
            Value::VectorUInt(vector) => {
                stream.write_u8(MARKER_VECTOR_UINT);
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let vector = vector.borrow();
                write_u29(stream, ((vector.items.len() as u32) << 1) | 1);
                stream.write_u8(vector.fixed as u8);
                for item in &vector.items {
                    stream.write_u32(*item);
                }
                Ok(())
            }
            Value::VectorDouble(vector) => {
                stream.write_u8(MARKER_VECTOR_DOUBLE);
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let vector = vector.borrow();
                write_u29(stream, ((vector.items.len() as u32) << 1) | 1);
                stream.write_u8(vector.fixed as u8);
                for item in &vector.items {
                    stream.write_double(*item);
                }
                Ok(())
            }
            Value::VectorObject(vector) => {
                stream.write_u8(MARKER_VECTOR_OBJECT);
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let vector = vector.borrow();
                write_u29(stream, ((vector.items.len() as u32) << 1) | 1);
                stream.write_u8(vector.fixed as u8);
                self.write_string(stream, &vector.type_name)?;
                for item in &vector.items {
                    self.encode(stream, item)?;
                }
                Ok(())
            }
            Value::Dictionary(dict) => {
                stream.write_u8(MARKER_DICTIONARY);
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let dict = dict.borrow();
                write_u29(stream, ((dict.entries.len() as u32) << 1) | 1);
                stream.write_u8(dict.weak_keys as u8);
                for (k, v) in &dict.entries {
                    self.encode(stream, k)?;
                    self.encode(stream, v)?;
                }
                Ok(())
            }
        }
    }

    fn encode_object(&mut self, stream: &mut ByteStream, value: &Value) -> Result<(), AmfError> {
        // Extension hooks get first look at object values
        match dispatch::dispatch_value(value, self, stream)? {
            Adapted::Written => return Ok(()),
            Adapted::Replace(replacement) => return self.encode(stream, &replacement),
            Adapted::Unhandled => {}
        }

        stream.write_u8(MARKER_OBJECT);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let object = match value {
            Value::Object(rc) => rc,
            _ => unreachable!("encode_object called with non-object"),
        };
        let class_name = object.borrow().class_name.clone();

        let mut alias = match &class_name {
            Some(name) => self.ctx.resolve_alias(name),
            None => crate::registry::ClassAlias::new("").dynamic(true),
        };

        if alias.external {
            let handler = alias
                .handler
                .clone()
                .ok_or_else(|| AmfError::UnknownClassAlias(alias.alias.clone()))?;
            let def = TraitDef {
                class_name: alias.alias.clone(),
                dynamic: false,
                external: true,
                properties: Vec::new(),
            };
            if let Some(index) = self.ctx.trait_index(&def) {
                write_u29(stream, (index << 2) | 0x01);
            } else {
                self.ctx.intern_trait(def)?;
                write_u29(stream, TRAIT_EXTERNAL_HEADER);
                let name = alias.alias.clone();
                self.write_string(stream, &name)?;
            }
            return handler.write_external(value, self, stream);
        }

        // Deferred aliases resolve their member list from the first
        // instance encoded in this pass
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

        // Sealed members as (host name, wire name), in declared order
        let sealed: Vec<(String, String)> = alias
            .static_attrs
            .iter()
            .filter(|host| !alias.is_excluded(host))
            .map(|host| (host.clone(), alias.wire_name(host).to_string()))
            .collect();

        let def = TraitDef {
            class_name: alias.alias.clone(),
            dynamic: alias.dynamic || class_name.is_none(),
            external: false,
            properties: sealed.iter().map(|(_, wire)| wire.clone()).collect(),
        };

        if sealed.len() as u64 > (MAX_REFERENCE_INDEX >> 3) as u64 {
            return Err(AmfError::OutOfRange("sealed member count"));
        }

        if let Some(index) = self.ctx.trait_index(&def) {
            write_u29(stream, (index << 2) | 0x01);
        } else {
            let header = ((sealed.len() as u32) << 4)
                | if def.dynamic { 0x08 } else { 0 }
                | 0x03;
            write_u29(stream, header);
            let name = def.class_name.clone();
            self.write_string(stream, &name)?;
            for (_, wire) in &sealed {
                self.write_string(stream, wire)?;
            }
            self.ctx.intern_trait(def.clone())?;
        }

        // Sealed values in declared order; missing members encode as
        // Undefined
        let object_ref = object.borrow();
        for (host, _) in &sealed {
            let member = object_ref.get(host).cloned().unwrap_or(Value::Undefined);
            self.encode(stream, &member)?;
        }

        if def.dynamic {
            for (host, member) in &object_ref.properties {
                if alias.is_excluded(host) || sealed.iter().any(|(h, _)| h == host) {
                    continue;
                }
                self.write_string(stream, alias.wire_name(host))?;
                self.encode(stream, member)?;
            }
            write_u29(stream, 1); // dynamic terminator: empty string
        }
        Ok(())
    }

    /// Emit a reference header if this value was already written;
    /// otherwise intern it (before the body, so cycles resolve as
    /// back-references) and report that an inline body must follow.
    fn write_reference(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
    ) -> Result<bool, AmfError> {
        let key = match ObjKey::for_value(value) {
            Some(key) => key,
            None => return Err(AmfError::ReferenceTable("value not reference-eligible")),
        };
        if let Some(index) = self.ctx.object_index(&key) {
            write_u29(stream, index << 1);
            return Ok(true);
        }
        self.ctx.intern_object(key, value.clone())?;
        Ok(false)
    }

    /// Write a string with reference handling. The empty string is the
    /// literal U29 value 0x01 and never enters the table.
    pub(crate) fn write_string(
        &mut self,
        stream: &mut ByteStream,
        s: &str,
    ) -> Result<(), AmfError> {
        if s.is_empty() {
            write_u29(stream, 1);
            return Ok(());
        }
        if let Some(index) = self.ctx.string_index(s) {
            write_u29(stream, index << 1);
            return Ok(());
        }
        if s.len() as u64 > MAX_REFERENCE_INDEX as u64 {
            return Err(AmfError::OutOfRange("string length"));
        }
        self.ctx.intern_string(s)?;
        write_u29(stream, ((s.len() as u32) << 1) | 1);
        stream.write_bytes(s.as_bytes());
        Ok(())
    }
}

impl Default for Amf3Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueWriter for Amf3Encoder {
    fn write_value(&mut self, stream: &mut ByteStream, value: &Value) -> Result<(), AmfError> {
        self.encode(stream, value)
    }
}

/// AMF3 decoder with reference tables
pub struct Amf3Decoder {
    ctx: DecodeContext,
    /// Tolerate unknown markers and unregistered class aliases
    lenient: bool,
    depth: usize,
}

impl Amf3Decoder {
    /// Create a decoder with default settings (lenient)
    pub fn new() -> Self {
        Self {
            ctx: DecodeContext::new(),
            lenient: true,
            depth: 0,
        }
    }

    /// Create a decoder with explicit lenient mode
    pub fn with_lenient(lenient: bool) -> Self {
        Self {
            ctx: DecodeContext::new(),
            lenient,
            depth: 0,
        }
    }

    /// Create a decoder reusing an existing context
    pub fn with_context(ctx: DecodeContext) -> Self {
        Self {
            ctx,
            lenient: true,
            depth: 0,
        }
    }

    /// Reset decoder state (call between independent payloads)
    pub fn reset(&mut self) {
        self.ctx.clear();
        self.depth = 0;
    }

    /// The decoder's reference tables
    pub fn context(&self) -> &DecodeContext {
        &self.ctx
    }

    /// Mutable access to the decoder's reference tables
    pub fn context_mut(&mut self) -> &mut DecodeContext {
        &mut self.ctx
    }

    /// Decode a single value. Post-decode processors run when this call
    /// returns to the outermost level.
    pub fn decode(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let value = self.decode_embedded(stream)?;
        if self.depth == 0 {
            return Ok(dispatch::run_post_decode(value, &mut self.ctx.extra));
        }
        Ok(value)
    }

    /// Decode without the top-level post-decode pass. Used internally and
    /// by the AMF0 decoder for 0x11-embedded values.
    pub(crate) fn decode_embedded(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
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
        result
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
            MARKER_UNDEFINED => Ok(Value::Undefined),
            MARKER_NULL => Ok(Value::Null),
            MARKER_FALSE => Ok(Value::Boolean(false)),
            MARKER_TRUE => Ok(Value::Boolean(true)),
            MARKER_INTEGER => {
                let raw = read_u29(stream)?;
                // Sign-extend from 29 bits
                let signed = if raw & 0x1000_0000 != 0 {
                    (raw | !0x1FFF_FFFF) as i32
                } else {
                    raw as i32
                };
                Ok(Value::Integer(signed))
            }
            MARKER_DOUBLE => Ok(Value::Number(stream.read_double()?)),
            MARKER_STRING => Ok(Value::String(self.read_string(stream)?)),
            MARKER_XML_DOC => self.decode_xml(stream, true),
            MARKER_XML => self.decode_xml(stream, false),
            MARKER_DATE => self.decode_date(stream),
            MARKER_ARRAY => self.decode_array(stream),
            MARKER_OBJECT => self.decode_object(stream),
            MARKER_BYTE_ARRAY => self.decode_byte_array(stream),
            MARKER_VECTOR_INT | MARKER_VECTOR_UINT | MARKER_VECTOR_DOUBLE => {
                self.decode_fixed_vector(stream, marker)
            }
            MARKER_VECTOR_OBJECT => self.decode_object_vector(stream),
            MARKER_DICTIONARY => self.decode_dictionary(stream),
            _ => {
                if self.lenient {
                    tracing::warn!(marker, "Unknown AMF3 marker, decoding as undefined");
                    Ok(Value::Undefined)
                } else {
                    Err(AmfError::UnknownMarker(marker))
                }
            }
        }
    }

    fn decode_date(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.object_at((header >> 1) as usize);
        }
        let millis = stream.read_double()?;
        let value = Value::Date {
            millis,
            timezone: 0,
        };
        self.ctx.push_object(value.clone());
        Ok(value)
    }

    fn decode_array(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.object_at((header >> 1) as usize);
        }
        let dense_count = (header >> 1) as usize;

        // Shared placeholder registered before the body so nested
        // back-references resolve to this same allocation
        let rc = Rc::new(RefCell::new(AmfArray::default()));
        self.ctx.push_object(Value::Array(rc.clone()));

        let mut assoc = Vec::new();
        loop {
            let key = self.read_string(stream)?;
            if key.is_empty() {
                break;
            }
            let value = self.decode_embedded(stream)?;
            assoc.push((key, value));
        }

        let mut dense = Vec::with_capacity(dense_count.min(1024));
        for _ in 0..dense_count {
            dense.push(self.decode_embedded(stream)?);
        }

        *rc.borrow_mut() = AmfArray { dense, assoc };
        Ok(Value::Array(rc))
    }

    fn decode_object(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.object_at((header >> 1) as usize);
        }

        let trait_def = if header & 2 == 0 {
            // Trait reference
            self.ctx.trait_at((header >> 2) as usize)?
        } else if header & 4 != 0 {
            // Inline externalizable trait
            let class_name = self.read_string(stream)?;
            let def = TraitDef {
                class_name,
                dynamic: false,
                external: true,
                properties: Vec::new(),
            };
            self.ctx.push_trait(def.clone());
            def
        } else {
            // Inline trait definition
            let dynamic = header & 8 != 0;
            let sealed_count = (header >> 4) as usize;
            let class_name = self.read_string(stream)?;
            let mut properties = Vec::with_capacity(sealed_count.min(1024));
            for _ in 0..sealed_count {
                properties.push(self.read_string(stream)?);
            }
            let def = TraitDef {
                class_name,
                dynamic,
                external: false,
                properties,
            };
            self.ctx.push_trait(def.clone());
            def
        };

        if trait_def.external {
            return self.decode_external(stream, &trait_def.class_name);
        }

        if !trait_def.class_name.is_empty()
            && !self.lenient
            && lookup_class_alias(&trait_def.class_name).is_none()
        {
            return Err(AmfError::UnknownClassAlias(trait_def.class_name.clone()));
        }

        let alias = if trait_def.class_name.is_empty() {
            None
        } else {
            Some(self.ctx.resolve_alias(&trait_def.class_name))
        };

        let rc = Rc::new(RefCell::new(AmfObject {
            class_name: if trait_def.class_name.is_empty() {
                None
            } else {
                Some(trait_def.class_name.clone())
            },
            properties: Vec::new(),
            proxy: alias.as_ref().map(|a| a.proxy).unwrap_or(false),
        }));
        self.ctx.push_object(Value::Object(rc.clone()));

        let mut properties = Vec::new();
        for wire in &trait_def.properties {
            let value = self.decode_embedded(stream)?;
            let host = alias
                .as_ref()
                .map(|a| a.host_name(wire).to_string())
                .unwrap_or_else(|| wire.clone());
            if let Some(a) = &alias {
                if a.is_excluded(&host) || a.is_readonly(&host) {
                    continue;
                }
            }
            properties.push((host, value));
        }

        if trait_def.dynamic {
            loop {
                let wire = self.read_string(stream)?;
                if wire.is_empty() {
                    break;
                }
                let value = self.decode_embedded(stream)?;
                let host = alias
                    .as_ref()
                    .map(|a| a.host_name(&wire).to_string())
                    .unwrap_or(wire);
                if let Some(a) = &alias {
                    if a.is_excluded(&host) || a.is_readonly(&host) {
                        continue;
                    }
                }
                properties.push((host, value));
            }
        }

        rc.borrow_mut().properties = properties;
        Ok(Value::Object(rc))
    }

    fn decode_external(
        &mut self,
        stream: &mut ByteStream,
        class_name: &str,
    ) -> Result<Value, AmfError> {
        let alias = self.ctx.resolve_alias(class_name);
        let handler = alias
            .handler
            .clone()
            .ok_or_else(|| AmfError::UnknownClassAlias(class_name.to_string()))?;
        // Reserve the slot before the body; the handler may produce a
        // graph that other values reference later in the payload
        let index = self.ctx.push_object(Value::Null);
        let value = handler.read_external(self, stream)?;
        self.ctx.set_object(index, value.clone());
        Ok(value)
    }

    fn decode_byte_array(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.object_at((header >> 1) as usize);
        }
        let len = (header >> 1) as usize;
        let data = stream.read_bytes(len)?.to_vec();
        let value = Value::ByteArray(data);
        self.ctx.push_object(value.clone());
        Ok(value)
    }

    fn decode_xml(&mut self, stream: &mut ByteStream, legacy: bool) -> Result<Value, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.object_at((header >> 1) as usize);
        }
        let len = (header >> 1) as usize;
        let bytes = stream.read_bytes(len)?.to_vec();
        let value = xml_adapter().from_bytes(&bytes, true, true, legacy)?;
        self.ctx.push_object(value.clone());
        Ok(value)
    }

    fn decode_fixed_vector(
        &mut self,
        stream: &mut ByteStream,
        marker: u8,
    ) -> Result<Value, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.object_at((header >> 1) as usize);
        }
        let count = (header >> 1) as usize;
        let fixed = stream.read_u8()? != 0;
        let value = match marker {
            MARKER_VECTOR_INT => {
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(stream.read_u32()? as i32);
                }
                Value::VectorInt(Rc::new(RefCell::new(IntVector { fixed, items })))
            }
            MARKER_VECTOR_UINT => {
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(stream.read_u32()?);
                }
                Value::VectorUInt(Rc::new(RefCell::new(UIntVector { fixed, items })))
            }
            _ => {
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(stream.read_double()?);
                }
                Value::VectorDouble(Rc::new(RefCell::new(DoubleVector { fixed, items })))
            }
        };
        self.ctx.push_object(value.clone());
        Ok(value)
    }

    fn decode_object_vector(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.object_at((header >> 1) as usize);
        }
        let count = (header >> 1) as usize;
        let fixed = stream.read_u8()? != 0;
        let type_name = self.read_string(stream)?;

        let rc = Rc::new(RefCell::new(ObjectVector {
            fixed,
            type_name,
            items: Vec::new(),
        }));
        self.ctx.push_object(Value::VectorObject(rc.clone()));

        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(self.decode_embedded(stream)?);
        }
        rc.borrow_mut().items = items;
        Ok(Value::VectorObject(rc))
    }

    fn decode_dictionary(&mut self, stream: &mut ByteStream) -> Result<Value, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.object_at((header >> 1) as usize);
        }
        let count = (header >> 1) as usize;
        let weak_keys = stream.read_u8()? != 0;

        let rc = Rc::new(RefCell::new(Dictionary {
            weak_keys,
            entries: Vec::new(),
        }));
        self.ctx.push_object(Value::Dictionary(rc.clone()));

        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = self.decode_embedded(stream)?;
            let value = self.decode_embedded(stream)?;
            entries.push((key, value));
        }
        rc.borrow_mut().entries = entries;
        Ok(Value::Dictionary(rc))
    }

    /// Read an AMF3 string with reference handling
    pub(crate) fn read_string(&mut self, stream: &mut ByteStream) -> Result<String, AmfError> {
        let header = read_u29(stream)?;
        if header & 1 == 0 {
            return self.ctx.string_at((header >> 1) as usize);
        }
        let len = (header >> 1) as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let s = stream.read_utf8(len)?;
        self.ctx.push_string(s.clone());
        Ok(s)
    }
}

impl Default for Amf3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single value
pub fn encode(value: &Value) -> Result<Bytes, AmfError> {
    let mut encoder = Amf3Encoder::new();
    let mut stream = ByteStream::new();
    encoder.encode(&mut stream, value)?;
    Ok(stream.into_bytes())
}

/// Convenience function to encode multiple values into one payload,
/// sharing one set of reference tables
pub fn encode_all(values: &[Value]) -> Result<Bytes, AmfError> {
    let mut encoder = Amf3Encoder::new();
    let mut stream = ByteStream::new();
    for value in values {
        encoder.encode(&mut stream, value)?;
    }
    Ok(stream.into_bytes())
}

/// Convenience function to decode a single value
pub fn decode(data: &[u8]) -> Result<Value, AmfError> {
    let mut decoder = Amf3Decoder::new();
    let mut stream = ByteStream::from_slice(data);
    decoder.decode(&mut stream)
}

/// Convenience function to decode all values in a payload
pub fn decode_all(data: &[u8]) -> Result<Vec<Value>, AmfError> {
    let mut decoder = Amf3Decoder::new();
    let mut stream = ByteStream::from_slice(data);
    decoder.decode_all(&mut stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{register_class_alias, unregister_class_alias, ClassAlias};
    use std::sync::Arc;

    fn roundtrip(value: &Value) -> Value {
        let bytes = encode(value).unwrap();
        decode(&bytes).unwrap()
    }

    #[test]
    fn test_u29_roundtrip_boundaries() {
        let cases = [
            0u32, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, 0x0FFF_FFFF, 0x1FFF_FFFF,
        ];
        for &case in &cases {
            let mut stream = ByteStream::new();
            write_u29(&mut stream, case);
            stream.seek(SeekFrom::Start(0)).unwrap();
            assert_eq!(read_u29(&mut stream).unwrap(), case, "case {:#x}", case);
        }
    }

    #[test]
    fn test_u29_byte_lengths() {
        for (value, len) in [(0x7Fu32, 1usize), (0x80, 2), (0x3FFF, 2), (0x4000, 3)] {
            let mut stream = ByteStream::new();
            write_u29(&mut stream, value);
            assert_eq!(stream.len(), len, "value {:#x}", value);
        }
        let mut stream = ByteStream::new();
        write_u29(&mut stream, 0x20_0000);
        assert_eq!(stream.len(), 4);
    }

    #[test]
    fn test_null_and_undefined() {
        assert_eq!(encode(&Value::Null).unwrap().as_ref(), &[0x01]);
        assert_eq!(encode(&Value::Undefined).unwrap().as_ref(), &[0x00]);
        assert_eq!(decode(&[0x01]).unwrap(), Value::Null);
        assert_eq!(decode(&[0x00]).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_booleans_have_dedicated_markers() {
        assert_eq!(encode(&Value::Boolean(false)).unwrap().as_ref(), &[0x02]);
        assert_eq!(encode(&Value::Boolean(true)).unwrap().as_ref(), &[0x03]);
        assert_eq!(decode(&[0x02]).unwrap(), Value::Boolean(false));
        assert_eq!(decode(&[0x03]).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_integer_boundary_encodings() {
        // Largest 29-bit signed value stays an Integer
        let bytes = encode(&Value::Integer(268_435_455)).unwrap();
        assert_eq!(bytes.as_ref(), &[0x04, 0xBF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode(&bytes).unwrap(), Value::Integer(268_435_455));

        // One past the range falls back to Double
        let bytes = encode(&Value::Integer(268_435_456)).unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0x05, 0x41, 0xB0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(decode(&bytes).unwrap(), Value::Number(268_435_456.0));

        // Negative values use two's complement within 29 bits
        let bytes = encode(&Value::Integer(-1)).unwrap();
        assert_eq!(bytes.as_ref(), &[0x04, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode(&bytes).unwrap(), Value::Integer(-1));

        let bytes = encode(&Value::Integer(-268_435_456)).unwrap();
        assert_eq!(bytes.as_ref(), &[0x04, 0xC0, 0x80, 0x80, 0x00]);
        assert_eq!(decode(&bytes).unwrap(), Value::Integer(-268_435_456));

        let bytes = encode(&Value::Integer(-268_435_457)).unwrap();
        assert_eq!(bytes[0], 0x05);
        assert_eq!(decode(&bytes).unwrap(), Value::Number(-268_435_457.0));
    }

    #[test]
    fn test_string_roundtrip() {
        assert_eq!(roundtrip(&Value::String("hello".into())), Value::String("hello".into()));
        assert_eq!(roundtrip(&Value::String("".into())), Value::String("".into()));
        assert_eq!(
            roundtrip(&Value::String("héllo wörld".into())),
            Value::String("héllo wörld".into())
        );
    }

    #[test]
    fn test_shared_string_emits_reference() {
        let array = Value::dense_array(vec![
            Value::String("hello".into()),
            Value::String("hello".into()),
        ]);
        let bytes = encode(&array).unwrap();
        // Array header (2 dense, inline), empty assoc, inline "hello",
        // then a string reference to index 0
        assert_eq!(
            bytes.as_ref(),
            &[
                0x09, 0x05, 0x01, // array, 2 dense, assoc end
                0x06, 0x0B, b'h', b'e', b'l', b'l', b'o', // inline string
                0x06, 0x00, // reference to string 0
            ]
        );
        let decoded = decode(&bytes).unwrap();
        if let Value::Array(arr) = decoded {
            assert_eq!(arr.borrow().dense[0], Value::String("hello".into()));
            assert_eq!(arr.borrow().dense[1], Value::String("hello".into()));
        } else {
            panic!("Expected Array");
        }
    }

    #[test]
    fn test_empty_string_never_interned() {
        let mut encoder = Amf3Encoder::new();
        let mut stream = ByteStream::new();
        for _ in 0..3 {
            encoder
                .encode(&mut stream, &Value::String(String::new()))
                .unwrap();
        }
        assert_eq!(encoder.context().string_count(), 0);
        // Each occurrence is the literal inline header 0x01
        assert_eq!(stream.as_slice(), &[0x06, 0x01, 0x06, 0x01, 0x06, 0x01]);

        let mut decoder = Amf3Decoder::new();
        let mut stream = ByteStream::from_slice(&[0x06, 0x01, 0x06, 0x01]);
        decoder.decode(&mut stream).unwrap();
        decoder.decode(&mut stream).unwrap();
        assert!(decoder.context().strings.is_empty());
    }

    #[test]
    fn test_number_roundtrip() {
        assert_eq!(roundtrip(&Value::Number(42.5)), Value::Number(42.5));
        assert_eq!(
            roundtrip(&Value::Number(f64::INFINITY)),
            Value::Number(f64::INFINITY)
        );
        if let Value::Number(n) = roundtrip(&Value::Number(f64::NAN)) {
            assert!(n.is_nan());
        } else {
            panic!("Expected Number");
        }
    }

    #[test]
    fn test_date_roundtrip_and_reference() {
        let date = Value::date(1_700_000_000_000.0);
        assert_eq!(roundtrip(&date), date);

        // The same date twice becomes a reference
        let pair = Value::dense_array(vec![date.clone(), date.clone()]);
        let bytes = encode(&pair).unwrap();
        if let Value::Array(arr) = decode(&bytes).unwrap() {
            assert_eq!(arr.borrow().dense[0], date);
            assert_eq!(arr.borrow().dense[1], date);
        } else {
            panic!("Expected Array");
        }
        // One array slot + one date slot in the object table; the second
        // date is the 2-byte reference header
        let inline = encode(&date).unwrap();
        assert!(bytes.len() < 2 * inline.len() + 8);
    }

    #[test]
    fn test_byte_array_roundtrip() {
        let value = Value::ByteArray(vec![0, 1, 2, 255]);
        let bytes = encode(&value).unwrap();
        assert_eq!(bytes.as_ref(), &[0x0C, 0x09, 0, 1, 2, 255]);
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_byte_array_interns_by_content() {
        // Two separate but equal byte arrays share one table slot
        let pair = Value::dense_array(vec![
            Value::ByteArray(vec![1, 2, 3]),
            Value::ByteArray(vec![1, 2, 3]),
        ]);
        let bytes = encode(&pair).unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x09, 0x05, 0x01, // array, 2 dense
                0x0C, 0x07, 1, 2, 3, // inline byte array
                0x0C, 0x02, // reference to object 1 (array itself is 0)
            ]
        );
    }

    #[test]
    fn test_xml_roundtrip() {
        let xml = Value::Xml {
            content: "<root><a/></root>".into(),
            legacy: false,
        };
        let bytes = encode(&xml).unwrap();
        assert_eq!(bytes[0], 0x0B);
        assert_eq!(roundtrip(&xml), xml);

        let legacy = Value::Xml {
            content: "<x/>".into(),
            legacy: true,
        };
        let bytes = encode(&legacy).unwrap();
        assert_eq!(bytes[0], 0x07);
        assert_eq!(decode(&bytes).unwrap(), legacy);
    }

    #[test]
    fn test_array_with_assoc_part() {
        let mut array = AmfArray::dense(vec![Value::Integer(1), Value::Integer(2)]);
        array.insert("name", Value::String("x".into()));
        let value = Value::array(array);
        let decoded = roundtrip(&value);
        if let Value::Array(arr) = decoded {
            let arr = arr.borrow();
            assert_eq!(arr.dense.len(), 2);
            assert_eq!(arr.get("name"), Some(&Value::String("x".into())));
        } else {
            panic!("Expected Array");
        }
    }

    #[test]
    fn test_anonymous_object_roundtrip() {
        let mut obj = AmfObject::anonymous();
        obj.insert("b", Value::Integer(1));
        obj.insert("a", Value::String("two".into()));
        let decoded = roundtrip(&Value::object(obj));
        if let Value::Object(o) = decoded {
            let o = o.borrow();
            assert_eq!(o.class_name, None);
            // Insertion order survives the round trip
            let keys: Vec<&str> = o.properties.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, ["b", "a"]);
        } else {
            panic!("Expected Object");
        }
    }

    #[test]
    fn test_shared_substructure_preserved() {
        let shared = Value::object(AmfObject::anonymous());
        let outer = Value::dense_array(vec![shared.clone(), shared.clone()]);
        let decoded = roundtrip(&outer);
        if let Value::Array(arr) = decoded {
            let arr = arr.borrow();
            match (&arr.dense[0], &arr.dense[1]) {
                (Value::Object(a), Value::Object(b)) => assert!(Rc::ptr_eq(a, b)),
                _ => panic!("Expected objects"),
            }
        } else {
            panic!("Expected Array");
        }
    }

    #[test]
    fn test_cyclic_object_roundtrip() {
        // o.self = o
        let rc = Rc::new(RefCell::new(AmfObject::anonymous()));
        rc.borrow_mut()
            .insert("self", Value::Object(rc.clone()));
        let value = Value::Object(rc);

        let bytes = encode(&value).unwrap();
        let decoded = decode(&bytes).unwrap();
        if let Value::Object(outer) = &decoded {
            let inner = outer.borrow().get("self").cloned().unwrap();
            if let Value::Object(inner) = inner {
                assert!(Rc::ptr_eq(outer, &inner));
            } else {
                panic!("Expected object member");
            }
        } else {
            panic!("Expected Object");
        }
    }

    #[test]
    fn test_cyclic_array_terminates() {
        let rc = Rc::new(RefCell::new(AmfArray::default()));
        rc.borrow_mut().dense.push(Value::Array(rc.clone()));
        let bytes = encode(&Value::Array(rc)).unwrap();
        // Array header + assoc end + back-reference, nothing unbounded
        assert_eq!(bytes.as_ref(), &[0x09, 0x03, 0x01, 0x09, 0x00]);

        let decoded = decode(&bytes).unwrap();
        if let Value::Array(outer) = &decoded {
            let first = outer.borrow().dense[0].clone();
            if let Value::Array(inner) = first {
                assert!(Rc::ptr_eq(outer, &inner));
            } else {
                panic!("Expected array element");
            }
        } else {
            panic!("Expected Array");
        }
    }

    #[test]
    fn test_typed_object_traits_shared() {
        register_class_alias(
            ClassAlias::new("test.amf3.Point")
                .with_static_attrs(vec!["x".into(), "y".into()]),
        );

        let mut p1 = AmfObject::typed("test.amf3.Point");
        p1.insert("x", Value::Integer(1));
        p1.insert("y", Value::Integer(2));
        let mut p2 = AmfObject::typed("test.amf3.Point");
        p2.insert("x", Value::Integer(3));
        p2.insert("y", Value::Integer(4));

        let mut encoder = Amf3Encoder::new();
        let mut stream = ByteStream::new();
        encoder.encode(&mut stream, &Value::object(p1)).unwrap();
        encoder.encode(&mut stream, &Value::object(p2)).unwrap();

        let mut decoder = Amf3Decoder::new();
        let mut stream = ByteStream::from_slice(stream.as_slice());
        let d1 = decoder.decode(&mut stream).unwrap();
        let d2 = decoder.decode(&mut stream).unwrap();
        // One trait decoded, shared by both instances
        assert_eq!(decoder.context().traits.len(), 1);
        assert_eq!(d1.get_number("x"), Some(1.0));
        assert_eq!(d2.get_number("y"), Some(4.0));
        if let Value::Object(o) = &d2 {
            assert_eq!(o.borrow().class_name.as_deref(), Some("test.amf3.Point"));
        }

        unregister_class_alias("test.amf3.Point");
    }

    #[test]
    fn test_alias_attribute_rules() {
        register_class_alias(
            ClassAlias::new("test.amf3.User")
                .with_static_attrs(vec!["id".into(), "screen_name".into()])
                .dynamic(true)
                .with_exclude_attrs(vec!["secret".into()])
                .with_readonly_attrs(vec!["id".into()])
                .with_synonym_attrs(vec![("screen_name".into(), "screenName".into())]),
        );

        let mut user = AmfObject::typed("test.amf3.User");
        user.insert("id", Value::Integer(7));
        user.insert("screen_name", Value::String("ada".into()));
        user.insert("secret", Value::String("hidden".into()));
        user.insert("note", Value::String("dynamic".into()));

        let bytes = encode(&Value::object(user)).unwrap();
        // The excluded attribute never crosses the wire
        assert!(!bytes.windows(6).any(|w| w == b"secret"));
        // The synonym's wire spelling is used
        assert!(bytes.windows(10).any(|w| w == b"screenName"));

        let decoded = decode(&bytes).unwrap();
        // Readonly attributes are filtered out of decoded objects
        assert_eq!(decoded.get("id"), None);
        // Synonym maps back to the host spelling
        assert_eq!(decoded.get_string("screen_name"), Some("ada".to_string()));
        assert_eq!(decoded.get_string("note"), Some("dynamic".to_string()));
        assert_eq!(decoded.get("secret"), None);

        unregister_class_alias("test.amf3.User");
    }

    #[test]
    fn test_proxy_alias_marks_decoded_object() {
        register_class_alias(ClassAlias::new("test.amf3.Proxied").dynamic(true).proxy(true));

        let mut obj = AmfObject::typed("test.amf3.Proxied");
        obj.insert("inner", Value::Integer(1));
        let bytes = encode(&Value::object(obj)).unwrap();

        let decoded = decode(&bytes).unwrap();
        if let Value::Object(o) = &decoded {
            assert!(o.borrow().proxy);
            assert_eq!(decoded.get_number("inner"), Some(1.0));
        } else {
            panic!("Expected Object");
        }

        // Without the flag nothing is marked
        let plain = roundtrip(&Value::object(AmfObject::anonymous()));
        if let Value::Object(o) = &plain {
            assert!(!o.borrow().proxy);
        }

        unregister_class_alias("test.amf3.Proxied");
    }

    #[test]
    fn test_unregistered_alias_strict_vs_lenient() {
        let obj = Value::object(AmfObject::typed("test.amf3.NotRegistered"));
        let bytes = encode(&obj).unwrap();

        // Lenient (default): anonymous-style fallback keeps the class name
        let decoded = decode(&bytes).unwrap();
        if let Value::Object(o) = &decoded {
            assert_eq!(
                o.borrow().class_name.as_deref(),
                Some("test.amf3.NotRegistered")
            );
        } else {
            panic!("Expected Object");
        }

        // Strict: unknown alias is an error
        let mut decoder = Amf3Decoder::with_lenient(false);
        let mut stream = ByteStream::from_slice(&bytes);
        assert!(matches!(
            decoder.decode(&mut stream),
            Err(AmfError::UnknownClassAlias(_))
        ));
    }

    #[test]
    fn test_externalizable_roundtrip() {
        struct PairHandler;

        impl crate::registry::Externalizable for PairHandler {
            fn write_external(
                &self,
                value: &Value,
                encoder: &mut Amf3Encoder,
                stream: &mut ByteStream,
            ) -> Result<(), AmfError> {
                let first = value.get("first").unwrap_or(Value::Null);
                let second = value.get("second").unwrap_or(Value::Null);
                encoder.encode(stream, &first)?;
                encoder.encode(stream, &second)
            }

            fn read_external(
                &self,
                decoder: &mut Amf3Decoder,
                stream: &mut ByteStream,
            ) -> Result<Value, AmfError> {
                let mut obj = AmfObject::typed("test.amf3.Pair");
                obj.insert("first", decoder.decode_embedded(stream)?);
                obj.insert("second", decoder.decode_embedded(stream)?);
                Ok(Value::object(obj))
            }
        }

        register_class_alias(ClassAlias::new("test.amf3.Pair").external(Arc::new(PairHandler)));

        let mut pair = AmfObject::typed("test.amf3.Pair");
        pair.insert("first", Value::Integer(1));
        pair.insert("second", Value::String("two".into()));

        let bytes = encode(&Value::object(pair)).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.get_number("first"), Some(1.0));
        assert_eq!(decoded.get_string("second"), Some("two".to_string()));

        unregister_class_alias("test.amf3.Pair");
    }

    #[test]
    fn test_externalizable_without_handler_fails() {
        // Inline externalizable trait for a class nobody registered
        let mut stream = ByteStream::new();
        stream.write_u8(MARKER_OBJECT);
        write_u29(&mut stream, TRAIT_EXTERNAL_HEADER);
        // Alias name "test.amf3.Ghost"
        let name = "test.amf3.Ghost";
        write_u29(&mut stream, ((name.len() as u32) << 1) | 1);
        stream.write_bytes(name.as_bytes());

        let mut decoder = Amf3Decoder::new();
        let mut read = ByteStream::from_slice(stream.as_slice());
        assert!(matches!(
            decoder.decode(&mut read),
            Err(AmfError::UnknownClassAlias(_))
        ));
    }

    #[test]
    fn test_vector_roundtrips() {
        let ints = Value::VectorInt(Rc::new(RefCell::new(IntVector {
            fixed: true,
            items: vec![-1, 0, i32::MAX],
        })));
        assert_eq!(roundtrip(&ints), ints);

        let uints = Value::VectorUInt(Rc::new(RefCell::new(UIntVector {
            fixed: false,
            items: vec![0, u32::MAX],
        })));
        assert_eq!(roundtrip(&uints), uints);

        let doubles = Value::VectorDouble(Rc::new(RefCell::new(DoubleVector {
            fixed: false,
            items: vec![1.5, -2.5],
        })));
        assert_eq!(roundtrip(&doubles), doubles);

        let objects = Value::VectorObject(Rc::new(RefCell::new(ObjectVector {
            fixed: false,
            type_name: "".into(),
            items: vec![Value::Integer(1), Value::String("x".into())],
        })));
        assert_eq!(roundtrip(&objects), objects);
    }

    #[test]
    fn test_vector_int_wire_layout() {
        let v = Value::VectorInt(Rc::new(RefCell::new(IntVector {
            fixed: false,
            items: vec![1, -1],
        })));
        let bytes = encode(&v).unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x0D, 0x05, 0x00, // marker, 2 items inline, not fixed
                0x00, 0x00, 0x00, 0x01, // 1
                0xFF, 0xFF, 0xFF, 0xFF, // -1
            ]
        );
    }

    #[test]
    fn test_dictionary_roundtrip() {
        let mut dict = Dictionary::default();
        dict.entries
            .push((Value::String("key".into()), Value::Integer(1)));
        dict.entries
            .push((Value::Integer(2), Value::Boolean(true)));
        let value = Value::dictionary(dict);
        let decoded = roundtrip(&value);
        if let Value::Dictionary(d) = decoded {
            let d = d.borrow();
            assert_eq!(d.entries.len(), 2);
            assert_eq!(d.entries[0].0, Value::String("key".into()));
            assert_eq!(d.entries[1].1, Value::Boolean(true));
            assert!(!d.weak_keys);
        } else {
            panic!("Expected Dictionary");
        }
    }

    #[test]
    fn test_reference_index_out_of_range() {
        // String reference to an empty table
        assert!(matches!(
            decode(&[0x06, 0x02]),
            Err(AmfError::InvalidReference(1))
        ));
        // Object reference to an empty table
        assert!(matches!(
            decode(&[0x0A, 0x00]),
            Err(AmfError::InvalidReference(0))
        ));
        // Trait reference with no traits
        assert!(matches!(
            decode(&[0x0A, 0x01]),
            Err(AmfError::MissingTrait(0))
        ));
    }

    #[test]
    fn test_truncated_value_errors() {
        assert!(matches!(decode(&[0x05, 0x40]), Err(AmfError::EndOfStream)));
        assert!(matches!(
            decode(&[0x06, 0x0B, b'h', b'i']),
            Err(AmfError::EndOfStream)
        ));
        assert!(matches!(decode(&[]), Err(AmfError::EndOfStream)));
    }

    #[test]
    fn test_next_value_seeks_back_on_truncation() {
        let mut full = ByteStream::new();
        let mut encoder = Amf3Encoder::new();
        encoder
            .encode(&mut full, &Value::String("hello".into()))
            .unwrap();
        let complete = full.as_slice().to_vec();

        // Complete value followed by a truncated one
        let mut data = complete.clone();
        data.extend_from_slice(&[0x06, 0x0B, b'h']);
        let mut decoder = Amf3Decoder::new();
        let mut stream = ByteStream::from_slice(&data);

        let first = decoder.next_value(&mut stream).unwrap();
        assert_eq!(first, Some(Value::String("hello".into())));

        let second = decoder.next_value(&mut stream).unwrap();
        assert_eq!(second, None);
        // Cursor is back at the start of the truncated value
        assert_eq!(stream.tell(), complete.len());
    }

    #[test]
    fn test_decode_all() {
        let payload = encode_all(&[
            Value::Integer(1),
            Value::String("two".into()),
            Value::Null,
        ])
        .unwrap();
        let values = decode_all(&payload).unwrap();
        assert_eq!(
            values,
            vec![Value::Integer(1), Value::String("two".into()), Value::Null]
        );
    }

    #[test]
    fn test_nesting_depth_limit() {
        let mut value = Value::dense_array(vec![]);
        for _ in 0..(MAX_NESTING_DEPTH + 5) {
            value = Value::dense_array(vec![value]);
        }
        let bytes = encode(&value).unwrap();
        assert!(matches!(decode(&bytes), Err(AmfError::NestingTooDeep)));
    }

    #[test]
    fn test_strict_mode_unknown_marker() {
        let mut decoder = Amf3Decoder::with_lenient(false);
        let mut stream = ByteStream::from_slice(&[0x7E]);
        assert!(matches!(
            decoder.decode(&mut stream),
            Err(AmfError::UnknownMarker(0x7E))
        ));
        // Lenient mode swallows it
        assert_eq!(decode(&[0x7E]).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_context_reuse_shares_references() {
        let mut encoder = Amf3Encoder::new();
        let mut s1 = ByteStream::new();
        encoder
            .encode(&mut s1, &Value::String("shared".into()))
            .unwrap();
        // Second payload reuses the table: the string becomes a reference
        let mut s2 = ByteStream::new();
        encoder
            .encode(&mut s2, &Value::String("shared".into()))
            .unwrap();
        assert_eq!(s2.as_slice(), &[0x06, 0x00]);

        // After reset it is inline again
        encoder.reset();
        let mut s3 = ByteStream::new();
        encoder
            .encode(&mut s3, &Value::String("shared".into()))
            .unwrap();
        assert_eq!(s3.as_slice()[1], 0x0D);
    }
}
