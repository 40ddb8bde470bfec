//! Class alias registry
//!
//! A class alias maps a host object shape to a wire class name plus the
//! metadata the codecs need to lay out its body: static member order,
//! dynamic/externalizable/proxy flags, and attribute rewrite rules.
//!
//! The registry is process-wide and mutable. Reads during a codec pass are
//! cheap; register/unregister must not happen while a pass is in flight —
//! the codecs cache resolved aliases in their context for the duration of
//! the pass and will not observe mid-pass mutations.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::amf::amf3::{Amf3Decoder, Amf3Encoder};
use crate::amf::value::Value;
use crate::error::AmfError;
use crate::stream::ByteStream;

/// Body serializer for externalizable classes
///
/// An externalizable object writes and reads its own body; the codec only
/// emits the trait header and alias name around it.
pub trait Externalizable: Send + Sync {
    /// Write the object body. Called after the trait header and alias
    /// name have been written.
    fn write_external(
        &self,
        value: &Value,
        encoder: &mut Amf3Encoder,
        stream: &mut ByteStream,
    ) -> Result<(), AmfError>;

    /// Read the object body and produce the decoded value.
    fn read_external(
        &self,
        decoder: &mut Amf3Decoder,
        stream: &mut ByteStream,
    ) -> Result<Value, AmfError>;
}

/// Wire metadata for one host class
#[derive(Clone)]
pub struct ClassAlias {
    /// Class name used on the wire
    pub alias: String,
    /// Static member names in declared (wire) order
    pub static_attrs: Vec<String>,
    /// Instances carry a dynamic member section
    pub dynamic: bool,
    /// Body is delegated to the `Externalizable` handler
    pub external: bool,
    /// Decoded instances are marked as proxied views
    pub proxy: bool,
    /// Attributes never written or read
    pub exclude_attrs: Vec<String>,
    /// Attributes filtered out of decoded objects
    pub readonly_attrs: Vec<String>,
    /// Attribute renames as (host name, wire name) pairs
    pub synonym_attrs: Vec<(String, String)>,
    /// Resolve the static member list from the first instance seen
    pub defer: bool,
    /// Serializer for externalizable classes
    pub handler: Option<Arc<dyn Externalizable>>,
}

impl ClassAlias {
    /// New alias with no members and all flags off
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            static_attrs: Vec::new(),
            dynamic: false,
            external: false,
            proxy: false,
            exclude_attrs: Vec::new(),
            readonly_attrs: Vec::new(),
            synonym_attrs: Vec::new(),
            defer: false,
            handler: None,
        }
    }

    /// Set the static member list (declared order is wire order)
    pub fn with_static_attrs(mut self, attrs: Vec<String>) -> Self {
        self.static_attrs = attrs;
        self
    }

    /// Mark instances as carrying a dynamic section
    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Delegate the body to an `Externalizable` handler
    pub fn external(mut self, handler: Arc<dyn Externalizable>) -> Self {
        self.external = true;
        self.handler = Some(handler);
        self
    }

    /// Mark decoded instances as proxied views
    pub fn proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    /// Attributes never written or read
    pub fn with_exclude_attrs(mut self, attrs: Vec<String>) -> Self {
        self.exclude_attrs = attrs;
        self
    }

    /// Attributes filtered out of decoded objects
    pub fn with_readonly_attrs(mut self, attrs: Vec<String>) -> Self {
        self.readonly_attrs = attrs;
        self
    }

    /// Attribute renames as (host name, wire name) pairs
    pub fn with_synonym_attrs(mut self, attrs: Vec<(String, String)>) -> Self {
        self.synonym_attrs = attrs;
        self
    }

    /// Resolve the static member list lazily from the first instance
    pub fn defer(mut self, defer: bool) -> Self {
        self.defer = defer;
        self
    }

    /// Wire name for a host attribute
    pub fn wire_name<'a>(&'a self, host: &'a str) -> &'a str {
        self.synonym_attrs
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, w)| w.as_str())
            .unwrap_or(host)
    }

    /// Host name for a wire attribute
    pub fn host_name<'a>(&'a self, wire: &'a str) -> &'a str {
        self.synonym_attrs
            .iter()
            .find(|(_, w)| w == wire)
            .map(|(h, _)| h.as_str())
            .unwrap_or(wire)
    }

    /// True if the attribute must not cross the wire
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude_attrs.iter().any(|a| a == name)
    }

    /// True if the attribute is dropped from decoded objects
    pub fn is_readonly(&self, name: &str) -> bool {
        self.readonly_attrs.iter().any(|a| a == name)
    }
}

impl fmt::Debug for ClassAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassAlias")
            .field("alias", &self.alias)
            .field("static_attrs", &self.static_attrs)
            .field("dynamic", &self.dynamic)
            .field("external", &self.external)
            .field("proxy", &self.proxy)
            .field("defer", &self.defer)
            .field("handler", &self.handler.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Mutable mapping from wire class names to aliases
#[derive(Debug, Default)]
pub struct ClassAliasRegistry {
    aliases: HashMap<String, ClassAlias>,
}

impl ClassAliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an alias. Overwrite-safe: a later registration for the
    /// same name wins.
    pub fn register(&mut self, alias: ClassAlias) {
        tracing::info!(alias = %alias.alias, external = alias.external, "Class alias registered");
        self.aliases.insert(alias.alias.clone(), alias);
    }

    /// Remove an alias by wire name. Returns the removed entry.
    pub fn unregister(&mut self, name: &str) -> Option<ClassAlias> {
        let removed = self.aliases.remove(name);
        if removed.is_some() {
            tracing::info!(alias = name, "Class alias unregistered");
        }
        removed
    }

    /// Look up an alias by wire name
    pub fn resolve_by_name(&self, name: &str) -> Option<&ClassAlias> {
        self.aliases.get(name)
    }

    /// Look up by host class identity, creating a default dynamic alias
    /// on miss. Callers cache the result in their codec context.
    pub fn resolve_by_class(&self, name: &str) -> ClassAlias {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| ClassAlias::new(name).dynamic(true).defer(true))
    }

    /// Number of registered aliases
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// True if no aliases are registered
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

fn global() -> &'static RwLock<ClassAliasRegistry> {
    static REGISTRY: OnceLock<RwLock<ClassAliasRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(ClassAliasRegistry::new()))
}

fn read_global() -> RwLockReadGuard<'static, ClassAliasRegistry> {
    match global().read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_global() -> RwLockWriteGuard<'static, ClassAliasRegistry> {
    match global().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Register an alias in the process-wide registry
pub fn register_class_alias(alias: ClassAlias) {
    write_global().register(alias);
}

/// Remove an alias from the process-wide registry
pub fn unregister_class_alias(name: &str) -> bool {
    write_global().unregister(name).is_some()
}

/// Look up an alias in the process-wide registry
pub fn lookup_class_alias(name: &str) -> Option<ClassAlias> {
    read_global().resolve_by_name(name).cloned()
}
