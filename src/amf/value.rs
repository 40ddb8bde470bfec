//! AMF value types
//!
//! Both AMF0 and AMF3 share a common value representation. Scalars are
//! stored inline. Aggregates (arrays, objects, vectors, dictionaries) are
//! stored behind `Rc<RefCell<..>>`: reference emission keys on pointer
//! identity, and decoding a back-reference hands out the same allocation,
//! so shared substructure and cycles survive a round trip.
//!
//! Associative storage is ordered (`Vec<(String, Value)>`). Key iteration
//! order is insertion order; nothing is ever sorted.
//!
//! Structural equality (`PartialEq`) does not terminate on a cyclic graph.
//! Compare cyclic values by identity (`Rc::ptr_eq`) instead.

use std::cell::RefCell;
use std::rc::Rc;

/// Unified AMF value representation
///
/// Covers every type of both wire formats. Some variants (ByteArray,
/// vectors, Dictionary) are AMF3-only; the AMF0 encoder maps them to the
/// nearest AMF0 shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Undefined (AMF0: 0x06, AMF3: 0x00). Distinct from Null.
    Undefined,

    /// Null (AMF0: 0x05, AMF3: 0x01)
    Null,

    /// Boolean (AMF0: 0x01, AMF3: 0x02/0x03)
    Boolean(bool),

    /// 29-bit signed integer (AMF3: 0x04). AMF0 encodes it as Number;
    /// AMF3 falls back to Double outside the 29-bit signed range.
    Integer(i32),

    /// IEEE 754 double (AMF0: 0x00, AMF3: 0x05)
    Number(f64),

    /// UTF-8 string (AMF0: 0x02/0x0C, AMF3: 0x06)
    String(String),

    /// UTC milliseconds since epoch (AMF0: 0x0B, AMF3: 0x08).
    /// The timezone offset (minutes) only exists on the AMF0 wire.
    Date { millis: f64, timezone: i16 },

    /// Opaque XML (AMF0: 0x0F; AMF3: 0x0B, or 0x07 when `legacy`)
    Xml { content: String, legacy: bool },

    /// Raw bytes (AMF3: 0x0C). AMF0 writes them as a raw string.
    ByteArray(Vec<u8>),

    /// Dense + associative array
    /// (AMF0: 0x0A strict / 0x08 ECMA, AMF3: 0x09)
    Array(Rc<RefCell<AmfArray>>),

    /// Object, optionally class-aliased (AMF0: 0x03/0x10, AMF3: 0x0A)
    Object(Rc<RefCell<AmfObject>>),

    /// Vector of 32-bit signed integers (AMF3: 0x0D)
    VectorInt(Rc<RefCell<IntVector>>),

    /// Vector of 32-bit unsigned integers (AMF3: 0x0E)
    VectorUInt(Rc<RefCell<UIntVector>>),

    /// Vector of doubles (AMF3: 0x0F)
    VectorDouble(Rc<RefCell<DoubleVector>>),

    /// Vector of arbitrary values with an element type name (AMF3: 0x10)
    VectorObject(Rc<RefCell<ObjectVector>>),

    /// Arbitrary-keyed dictionary (AMF3: 0x11)
    Dictionary(Rc<RefCell<Dictionary>>),
}

/// Array with a dense part and an ordered associative part
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmfArray {
    /// Indexed elements
    pub dense: Vec<Value>,
    /// String-keyed elements in insertion order
    pub assoc: Vec<(String, Value)>,
}

impl AmfArray {
    /// Dense-only array
    pub fn dense(elements: Vec<Value>) -> Self {
        Self {
            dense: elements,
            assoc: Vec::new(),
        }
    }

    /// Look up an associative entry
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.assoc.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace an associative entry, preserving insertion order
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.assoc.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.assoc.push((key, value));
        }
    }
}

/// Object with ordered properties and an optional class alias
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmfObject {
    /// Wire class name; `None` for anonymous objects
    pub class_name: Option<String>,
    /// Properties in insertion order. Static members encode in the order
    /// declared by the class alias, dynamic members in this order.
    pub properties: Vec<(String, Value)>,
    /// Set by the decoders when the class alias is proxy-flagged: the
    /// object is a proxy view to be unwrapped by an object-framework
    /// adapter. Ignored on encode.
    pub proxy: bool,
}

impl AmfObject {
    /// Anonymous dynamic object
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Object carrying a class alias
    pub fn typed(class_name: impl Into<String>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            properties: Vec::new(),
            proxy: false,
        }
    }

    /// Look up a property
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert or replace a property, preserving insertion order
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.properties.push((key, value));
        }
    }
}

/// AMF3 vector of i32
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntVector {
    /// Fixed-length flag from the wire
    pub fixed: bool,
    pub items: Vec<i32>,
}

/// AMF3 vector of u32
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UIntVector {
    pub fixed: bool,
    pub items: Vec<u32>,
}

/// AMF3 vector of f64
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoubleVector {
    pub fixed: bool,
    pub items: Vec<f64>,
}

/// AMF3 vector of arbitrary values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectVector {
    pub fixed: bool,
    /// Element class name; empty means plain Object
    pub type_name: String,
    pub items: Vec<Value>,
}

/// AMF3 dictionary with arbitrary keys, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    /// Weak-keys byte from the wire (advisory)
    pub weak_keys: bool,
    pub entries: Vec<(Value, Value)>,
}

impl Value {
    /// Wrap an array for sharing
    pub fn array(array: AmfArray) -> Self {
        Value::Array(Rc::new(RefCell::new(array)))
    }

    /// Dense array from elements
    pub fn dense_array(elements: Vec<Value>) -> Self {
        Value::array(AmfArray::dense(elements))
    }

    /// Wrap an object for sharing
    pub fn object(object: AmfObject) -> Self {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    /// Wrap a dictionary for sharing
    pub fn dictionary(dict: Dictionary) -> Self {
        Value::Dictionary(Rc::new(RefCell::new(dict)))
    }

    /// Date from epoch milliseconds, UTC
    pub fn date(millis: f64) -> Self {
        Value::Date {
            millis,
            timezone: 0,
        }
    }

    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as a shared object handle
    pub fn as_object(&self) -> Option<&Rc<RefCell<AmfObject>>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Try to get this value as a shared array handle
    pub fn as_array(&self) -> Option<&Rc<RefCell<AmfArray>>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// True for values that occupy a slot in a reference table
    pub fn is_reference_eligible(&self) -> bool {
        matches!(
            self,
            Value::Array(_)
                | Value::Object(_)
                | Value::Date { .. }
                | Value::ByteArray(_)
                | Value::Xml { .. }
                | Value::VectorInt(_)
                | Value::VectorUInt(_)
                | Value::VectorDouble(_)
                | Value::VectorObject(_)
                | Value::Dictionary(_)
        )
    }

    /// Get a property from an object or array value
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(o) => o.borrow().get(key).cloned(),
            Value::Array(a) => a.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Get a string property from an object value
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get a number property from an object value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        if v <= i32::MAX as u32 {
            Value::Integer(v as i32)
        } else {
            Value::Number(v as f64)
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::ByteArray(v)
    }
}

impl From<AmfObject> for Value {
    fn from(v: AmfObject) -> Self {
        Value::object(v)
    }
}

impl From<AmfArray> for Value {
    fn from(v: AmfArray) -> Self {
        Value::array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        let s = Value::String("test".into());
        assert_eq!(s.as_str(), Some("test"));
        assert_eq!(s.as_number(), None);

        let n = Value::Number(42.0);
        assert_eq!(n.as_number(), Some(42.0));
        assert_eq!(n.as_str(), None);

        let i = Value::Integer(100);
        assert_eq!(i.as_number(), Some(100.0));
    }

    #[test]
    fn test_from_conversions() {
        let v: Value = "test".into();
        assert!(matches!(v, Value::String(_)));

        let v: Value = 42.0.into();
        assert!(matches!(v, Value::Number(_)));

        let v: Value = 42i32.into();
        assert!(matches!(v, Value::Integer(42)));

        let v: Value = true.into();
        assert!(matches!(v, Value::Boolean(true)));

        let v: Value = u32::MAX.into();
        assert!(matches!(v, Value::Number(_)));
    }

    #[test]
    fn test_object_ordered_properties() {
        let mut obj = AmfObject::anonymous();
        obj.insert("b", Value::Integer(1));
        obj.insert("a", Value::Integer(2));
        obj.insert("c", Value::Integer(3));
        // Replacing keeps the original slot
        obj.insert("a", Value::Integer(9));

        let keys: Vec<&str> = obj.properties.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["b", "a", "c"]);
        assert_eq!(obj.get("a"), Some(&Value::Integer(9)));
        assert_eq!(obj.get("missing"), None);
    }

    #[test]
    fn test_array_parts() {
        let mut arr = AmfArray::dense(vec![Value::Integer(1), Value::Integer(2)]);
        arr.insert("name", Value::String("x".into()));
        assert_eq!(arr.dense.len(), 2);
        assert_eq!(arr.get("name"), Some(&Value::String("x".into())));
    }

    #[test]
    fn test_shared_identity() {
        let shared = Value::object(AmfObject::anonymous());
        let a = shared.clone();
        let b = shared.clone();
        if let (Value::Object(x), Value::Object(y)) = (&a, &b) {
            assert!(Rc::ptr_eq(x, y));
        } else {
            panic!("Expected objects");
        }

        // Structurally equal but distinct allocations
        let other = Value::object(AmfObject::anonymous());
        if let (Value::Object(x), Value::Object(y)) = (&shared, &other) {
            assert!(!Rc::ptr_eq(x, y));
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_mutation_through_handle() {
        let v = Value::object(AmfObject::anonymous());
        if let Value::Object(o) = &v {
            o.borrow_mut().insert("key", Value::String("value".into()));
        }
        assert_eq!(v.get_string("key"), Some("value".to_string()));
        assert_eq!(v.get_number("key"), None);
    }

    #[test]
    fn test_reference_eligibility() {
        assert!(Value::dense_array(vec![]).is_reference_eligible());
        assert!(Value::object(AmfObject::anonymous()).is_reference_eligible());
        assert!(Value::date(0.0).is_reference_eligible());
        assert!(Value::ByteArray(vec![]).is_reference_eligible());
        assert!(!Value::Null.is_reference_eligible());
        assert!(!Value::String("x".into()).is_reference_eligible());
        assert!(!Value::Integer(1).is_reference_eligible());
    }

    #[test]
    fn test_is_null_or_undefined() {
        assert!(Value::Null.is_null_or_undefined());
        assert!(Value::Undefined.is_null_or_undefined());
        assert!(!Value::Boolean(false).is_null_or_undefined());
        assert!(!Value::Number(0.0).is_null_or_undefined());
    }

    #[test]
    fn test_default_value() {
        assert_eq!(Value::default(), Value::Null);
    }

    #[test]
    fn test_dictionary_order() {
        let mut dict = Dictionary::default();
        dict.entries
            .push((Value::String("k1".into()), Value::Integer(1)));
        dict.entries.push((Value::Integer(2), Value::Boolean(true)));
        let v = Value::dictionary(dict);
        if let Value::Dictionary(d) = &v {
            assert_eq!(d.borrow().entries[0].0, Value::String("k1".into()));
            assert_eq!(d.borrow().entries[1].0, Value::Integer(2));
        } else {
            panic!("Expected Dictionary");
        }
    }
}
