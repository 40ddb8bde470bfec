//! Per-pass codec state
//!
//! AMF3 maintains three parallel reference tables (objects, strings,
//! traits) in strict insertion order; AMF0 maintains a single table for
//! complex values. The two directions index opposite ways — the encoder
//! maps content/identity to indices, the decoder maps indices back to
//! values — so the state is split into `EncodeContext` and
//! `DecodeContext`. Both are created per pass; reuse across calls (to
//! share references between payloads) is an explicit opt-in via the codec
//! constructors.
//!
//! Encoder object keys: aggregates key on `Rc` pointer identity, and the
//! interned value is pinned in the context so the pointer stays stable for
//! the whole pass. Byte arrays, XML and dates key on content.

use std::collections::HashMap;
use std::rc::Rc;

use super::value::Value;
use crate::error::AmfError;
use crate::registry::alias::ClassAlias;
use crate::registry::lookup_class_alias;

/// Largest index expressible in a U29 reference header
pub const MAX_REFERENCE_INDEX: u32 = (1 << 28) - 1;

/// Class descriptor shared across instances within one payload
#[derive(Debug, Clone, PartialEq)]
pub struct TraitDef {
    /// Wire alias; empty for anonymous objects
    pub class_name: String,
    /// Object carries a dynamic member section
    pub dynamic: bool,
    /// Body is delegated to the class's own serializer
    pub external: bool,
    /// Static member names in declared order
    pub properties: Vec<String>,
}

impl TraitDef {
    /// Trait for an anonymous dynamic object
    pub fn anonymous() -> Self {
        Self {
            class_name: String::new(),
            dynamic: true,
            external: false,
            properties: Vec::new(),
        }
    }
}

/// Encoder-side object table key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ObjKey {
    /// Aggregate identity: the `Rc` allocation address
    Identity(usize),
    /// Byte-array content
    Bytes(Vec<u8>),
    /// XML content, split by marker kind
    Xml(bool, String),
    /// Date content: the raw bits of the millisecond timestamp
    Date(u64),
}

impl ObjKey {
    /// Key for a reference-eligible value; `None` for scalars
    pub(crate) fn for_value(value: &Value) -> Option<ObjKey> {
        match value {
            Value::Array(rc) => Some(ObjKey::Identity(Rc::as_ptr(rc) as usize)),
            Value::Object(rc) => Some(ObjKey::Identity(Rc::as_ptr(rc) as usize)),
            Value::VectorInt(rc) => Some(ObjKey::Identity(Rc::as_ptr(rc) as usize)),
            Value::VectorUInt(rc) => Some(ObjKey::Identity(Rc::as_ptr(rc) as usize)),
            Value::VectorDouble(rc) => Some(ObjKey::Identity(Rc::as_ptr(rc) as usize)),
            Value::VectorObject(rc) => Some(ObjKey::Identity(Rc::as_ptr(rc) as usize)),
            Value::Dictionary(rc) => Some(ObjKey::Identity(Rc::as_ptr(rc) as usize)),
            Value::ByteArray(data) => Some(ObjKey::Bytes(data.clone())),
            Value::Xml { content, legacy } => Some(ObjKey::Xml(*legacy, content.clone())),
            Value::Date { millis, .. } => Some(ObjKey::Date(millis.to_bits())),
            _ => None,
        }
    }

    /// Identity-only key, used by the AMF0 table (content types are not
    /// reference-eligible there)
    pub(crate) fn identity(value: &Value) -> Option<ObjKey> {
        match ObjKey::for_value(value) {
            Some(key @ ObjKey::Identity(_)) => Some(key),
            _ => None,
        }
    }
}

/// Encoder-side reference tables
#[derive(Default)]
pub struct EncodeContext {
    objects: HashMap<ObjKey, u32>,
    /// Keeps interned `Rc`s alive so identity keys stay stable
    pins: Vec<Value>,
    strings: HashMap<String, u32>,
    traits: Vec<TraitDef>,
    alias_cache: HashMap<String, ClassAlias>,
    /// Scratch space for adapter hooks
    pub extra: HashMap<String, String>,
}

impl EncodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all tables
    pub fn clear(&mut self) {
        self.objects.clear();
        self.pins.clear();
        self.strings.clear();
        self.traits.clear();
        self.alias_cache.clear();
        self.extra.clear();
    }

    /// Index of an already-interned object, if any
    pub(crate) fn object_index(&self, key: &ObjKey) -> Option<u32> {
        self.objects.get(key).copied()
    }

    /// Intern an object before its body is written. Returns the assigned
    /// index, which is exactly the pre-write table length.
    pub(crate) fn intern_object(&mut self, key: ObjKey, pin: Value) -> Result<u32, AmfError> {
        let index = self.objects.len() as u32;
        if index > MAX_REFERENCE_INDEX {
            return Err(AmfError::OutOfRange("object reference table full"));
        }
        self.objects.insert(key, index);
        self.pins.push(pin);
        Ok(index)
    }

    /// Number of interned objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Index of an interned string, if any
    pub(crate) fn string_index(&self, s: &str) -> Option<u32> {
        self.strings.get(s).copied()
    }

    /// Intern a non-empty string. The empty string is never interned.
    pub(crate) fn intern_string(&mut self, s: &str) -> Result<u32, AmfError> {
        debug_assert!(!s.is_empty());
        let index = self.strings.len() as u32;
        if index > MAX_REFERENCE_INDEX {
            return Err(AmfError::OutOfRange("string reference table full"));
        }
        self.strings.insert(s.to_string(), index);
        Ok(index)
    }

    /// Number of interned strings
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// Index of a structurally equal trait, if any
    pub(crate) fn trait_index(&self, def: &TraitDef) -> Option<u32> {
        self.traits.iter().position(|t| t == def).map(|i| i as u32)
    }

    /// Intern a trait definition
    pub(crate) fn intern_trait(&mut self, def: TraitDef) -> Result<u32, AmfError> {
        let index = self.traits.len() as u32;
        if index > MAX_REFERENCE_INDEX {
            return Err(AmfError::OutOfRange("trait reference table full"));
        }
        self.traits.push(def);
        Ok(index)
    }

    /// Resolve a class alias, consulting the process-wide registry and
    /// caching the result (or a default alias) for the rest of the pass
    pub fn resolve_alias(&mut self, name: &str) -> ClassAlias {
        resolve_cached(&mut self.alias_cache, name)
    }

    /// Overwrite the cached alias for this pass (used when a deferred
    /// alias resolves its member list from the first instance)
    pub fn cache_alias(&mut self, alias: ClassAlias) {
        self.alias_cache.insert(alias.alias.clone(), alias);
    }
}

/// Decoder-side reference tables
#[derive(Default)]
pub struct DecodeContext {
    pub(crate) objects: Vec<Value>,
    pub(crate) strings: Vec<String>,
    pub(crate) traits: Vec<TraitDef>,
    alias_cache: HashMap<String, ClassAlias>,
    /// Scratch space for adapter hooks
    pub extra: HashMap<String, String>,
}

impl DecodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all tables
    pub fn clear(&mut self) {
        self.objects.clear();
        self.strings.clear();
        self.traits.clear();
        self.alias_cache.clear();
        self.extra.clear();
    }

    /// Resolve an object back-reference
    pub(crate) fn object_at(&self, index: usize) -> Result<Value, AmfError> {
        self.objects
            .get(index)
            .cloned()
            .ok_or(AmfError::InvalidReference(index))
    }

    /// Register a decoded (or placeholder) object, returning its index
    pub(crate) fn push_object(&mut self, value: Value) -> usize {
        self.objects.push(value);
        self.objects.len() - 1
    }

    /// Replace a reserved slot once its real value is known
    pub(crate) fn set_object(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.objects.get_mut(index) {
            *slot = value;
        }
    }

    /// Resolve a string back-reference
    pub(crate) fn string_at(&self, index: usize) -> Result<String, AmfError> {
        self.strings
            .get(index)
            .cloned()
            .ok_or(AmfError::InvalidReference(index))
    }

    /// Register a decoded non-empty string
    pub(crate) fn push_string(&mut self, s: String) {
        debug_assert!(!s.is_empty());
        self.strings.push(s);
    }

    /// Resolve a trait back-reference
    pub(crate) fn trait_at(&self, index: usize) -> Result<TraitDef, AmfError> {
        self.traits
            .get(index)
            .cloned()
            .ok_or(AmfError::MissingTrait(index))
    }

    /// Register a decoded trait definition
    pub(crate) fn push_trait(&mut self, def: TraitDef) {
        self.traits.push(def);
    }

    /// Resolve a class alias, consulting the process-wide registry and
    /// caching the result for the rest of the pass
    pub fn resolve_alias(&mut self, name: &str) -> ClassAlias {
        resolve_cached(&mut self.alias_cache, name)
    }
}

fn resolve_cached(cache: &mut HashMap<String, ClassAlias>, name: &str) -> ClassAlias {
    if let Some(alias) = cache.get(name) {
        return alias.clone();
    }
    let alias = lookup_class_alias(name).unwrap_or_else(|| ClassAlias::new(name).dynamic(true));
    cache.insert(name.to_string(), alias.clone());
    alias
}
