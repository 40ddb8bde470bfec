//! Process-wide codec registries
//!
//! Two pieces of shared state extend the codecs across a whole process:
//!
//! - the class alias registry, mapping wire class names to the metadata
//!   the object writers and readers need (member order, dynamic /
//!   externalizable / proxy flags, attribute rewrites),
//! - the type dispatch table and post-decode processors, which let
//!   external collaborators convert values on the way in and out.
//!
//! Both are guarded by `std::sync::RwLock`. Reads during a codec pass are
//! lock-free in the steady state; register/unregister must be serialized
//! by the caller and must not overlap an in-flight pass.

pub mod alias;
pub mod dispatch;

pub use alias::{
    register_class_alias, unregister_class_alias, ClassAlias, ClassAliasRegistry, Externalizable,
};
pub use dispatch::{
    clear_adapters, clear_post_decode_processors, register_adapter,
    register_post_decode_processor, Adapted, Adapter, PostDecodeProcessor, Predicate, ValueWriter,
};

pub(crate) use alias::lookup_class_alias;
