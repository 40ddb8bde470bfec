//! Encoder extension hooks
//!
//! Two process-wide ordered tables let external collaborators extend the
//! codecs without touching them:
//!
//! - the type dispatch table, consulted for object values before the
//!   built-in object writers. An adapter either returns a replacement
//!   value for the encoder to recurse on, or writes directly through the
//!   `ValueWriter` it is handed and returns nothing.
//! - post-decode processors, applied exactly once to the outermost value
//!   when a decode call returns to depth zero.
//!
//! Like the class alias registry, mutation must not overlap a codec pass.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::amf::value::Value;
use crate::error::AmfError;
use crate::stream::ByteStream;

/// Encoder surface handed to adapters so they can write values directly
pub trait ValueWriter {
    /// Encode one value at the stream cursor
    fn write_value(&mut self, stream: &mut ByteStream, value: &Value) -> Result<(), AmfError>;
}

/// Matches values an adapter wants to handle
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Conversion hook: `Ok(Some(v))` hands a replacement back to the
/// encoder, `Ok(None)` means the adapter wrote directly
pub type Adapter = Arc<
    dyn Fn(&Value, &mut dyn ValueWriter, &mut ByteStream) -> Result<Option<Value>, AmfError>
        + Send
        + Sync,
>;

/// Processor applied to the outermost decoded value
pub type PostDecodeProcessor =
    Arc<dyn Fn(Value, &mut HashMap<String, String>) -> Value + Send + Sync>;

/// Outcome of consulting the dispatch table
pub enum Adapted {
    /// No predicate matched
    Unhandled,
    /// The adapter wrote the value itself
    Written,
    /// Encode this value instead
    Replace(Value),
}

fn dispatch_table() -> &'static RwLock<Vec<(Predicate, Adapter)>> {
    static TABLE: OnceLock<RwLock<Vec<(Predicate, Adapter)>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(Vec::new()))
}

fn processors() -> &'static RwLock<Vec<PostDecodeProcessor>> {
    static TABLE: OnceLock<RwLock<Vec<PostDecodeProcessor>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(Vec::new()))
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Append a `(predicate, adapter)` pair to the dispatch table
pub fn register_adapter(predicate: Predicate, adapter: Adapter) {
    write_lock(dispatch_table()).push((predicate, adapter));
}

/// Drop all registered adapters
pub fn clear_adapters() {
    write_lock(dispatch_table()).clear();
}

/// Consult the dispatch table for a value. The first matching predicate
/// wins; its adapter runs outside the table lock.
pub(crate) fn dispatch_value(
    value: &Value,
    writer: &mut dyn ValueWriter,
    stream: &mut ByteStream,
) -> Result<Adapted, AmfError> {
    let hit = {
        let table = read_lock(dispatch_table());
        table
            .iter()
            .find(|(predicate, _)| predicate(value))
            .map(|(_, adapter)| adapter.clone())
    };
    match hit {
        None => Ok(Adapted::Unhandled),
        Some(adapter) => match adapter(value, writer, stream)? {
            Some(replacement) => Ok(Adapted::Replace(replacement)),
            None => Ok(Adapted::Written),
        },
    }
}

/// Append a post-decode processor
pub fn register_post_decode_processor(processor: PostDecodeProcessor) {
    write_lock(processors()).push(processor);
}

/// Drop all post-decode processors
pub fn clear_post_decode_processors() {
    write_lock(processors()).clear();
}

/// Run every registered processor over a top-level decoded value, in
/// registration order
pub(crate) fn run_post_decode(value: Value, extra: &mut HashMap<String, String>) -> Value {
    let snapshot: Vec<PostDecodeProcessor> = read_lock(processors()).clone();
    let mut value = value;
    for processor in snapshot {
        value = processor(value, extra);
    }
    value
}
