//! # amf-rs
//!
//! Action Message Format (AMF) serialization for Rust: the binary object
//! format used by the Flash platform for remoting payloads and Local
//! Shared Objects.
//!
//! - [`amf::amf0`] and [`amf::amf3`] - encoders and decoders for both
//!   wire format versions, with full reference-table support (shared
//!   substructure and cyclic graphs survive a round trip)
//! - [`amf::value`] - the unified value model
//! - [`registry`] - process-wide class aliases and encoder extension hooks
//! - [`sol`] - the Local Shared Object (".sol") file container
//! - [`stream`] - the seekable byte cursor both codecs run on
//!
//! # Example
//!
//! ```
//! use amf_rs::{amf3, AmfObject, Value};
//!
//! let mut obj = AmfObject::anonymous();
//! obj.insert("level", Value::Integer(4));
//! obj.insert("name", Value::String("Ada".into()));
//!
//! let bytes = amf3::encode(&Value::object(obj)).unwrap();
//! let decoded = amf3::decode(&bytes).unwrap();
//! assert_eq!(decoded.get_number("level"), Some(4.0));
//! ```
//!
//! A codec plus its stream form a private mutable work set: one pass is
//! single-threaded, while distinct passes are fully independent. The
//! registries in [`registry`] are process-wide; mutate them between
//! passes, never during one.

pub mod amf;
pub mod error;
pub mod registry;
pub mod sol;
pub mod stream;
pub mod xml;

pub use amf::{
    amf0, amf3, AmfArray, AmfObject, AmfVersion, DecodeContext, Dictionary, DoubleVector,
    EncodeContext, IntVector, ObjectVector, TraitDef, UIntVector, Value,
};
pub use error::AmfError;
pub use registry::{
    register_class_alias, unregister_class_alias, ClassAlias, ClassAliasRegistry, Externalizable,
};
pub use sol::Sol;
pub use stream::{ByteStream, Endian};
pub use xml::{set_xml_adapter, xml_adapter, OpaqueXmlAdapter, XmlAdapter};
