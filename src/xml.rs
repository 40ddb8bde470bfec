//! XML collaborator interface
//!
//! The core treats XML as opaque UTF-8 plus a legacy/modern tag. A small
//! adapter interface delegates the document representation to an external
//! collaborator; the default implementation keeps the opaque string form
//! and rejects DTDs and entity declarations outright.

use std::sync::{Arc, OnceLock, RwLock};

use crate::amf::value::Value;
use crate::error::AmfError;

/// Bridges the codec's opaque XML values to a document representation
pub trait XmlAdapter: Send + Sync {
    /// True if the adapter recognizes this value as XML
    fn is_xml(&self, value: &Value) -> bool;

    /// Serialize an XML value to UTF-8 bytes
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, AmfError>;

    /// Build an XML value from wire bytes. `legacy` selects the
    /// XMLDocument flavor; the forbid flags reject dangerous constructs.
    fn from_bytes(
        &self,
        bytes: &[u8],
        forbid_dtd: bool,
        forbid_entities: bool,
        legacy: bool,
    ) -> Result<Value, AmfError>;
}

/// Default adapter: opaque UTF-8 strings, DTDs and entities rejected
pub struct OpaqueXmlAdapter;

impl XmlAdapter for OpaqueXmlAdapter {
    fn is_xml(&self, value: &Value) -> bool {
        matches!(value, Value::Xml { .. })
    }

    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, AmfError> {
        match value {
            Value::Xml { content, .. } => Ok(content.as_bytes().to_vec()),
            _ => Err(AmfError::Unencodable("not an XML value")),
        }
    }

    fn from_bytes(
        &self,
        bytes: &[u8],
        forbid_dtd: bool,
        forbid_entities: bool,
        legacy: bool,
    ) -> Result<Value, AmfError> {
        let content = std::str::from_utf8(bytes).map_err(|_| AmfError::InvalidUtf8)?;
        if forbid_dtd && content.contains("<!DOCTYPE") {
            return Err(AmfError::ForbiddenXml("DOCTYPE declaration"));
        }
        if forbid_entities && content.contains("<!ENTITY") {
            return Err(AmfError::ForbiddenXml("ENTITY declaration"));
        }
        Ok(Value::Xml {
            content: content.to_string(),
            legacy,
        })
    }
}

fn slot() -> &'static RwLock<Arc<dyn XmlAdapter>> {
    static SLOT: OnceLock<RwLock<Arc<dyn XmlAdapter>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(Arc::new(OpaqueXmlAdapter)))
}

/// Install a process-wide XML adapter
pub fn set_xml_adapter(adapter: Arc<dyn XmlAdapter>) {
    match slot().write() {
        Ok(mut guard) => *guard = adapter,
        Err(poisoned) => *poisoned.into_inner() = adapter,
    }
}

/// The currently installed XML adapter
pub fn xml_adapter() -> Arc<dyn XmlAdapter> {
    match slot().read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}
