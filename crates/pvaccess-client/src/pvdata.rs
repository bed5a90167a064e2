//! Boundary with the structured-data type system.
//!
//! The client never interprets record contents. It allocates containers through an
//! [`IntrospectionRegistry`] supplied by the transport and moves bytes in and out
//! of them through [`PvStructure`] and [`PvArray`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Buf, BytesMut};

use crate::bitset::BitSet;
use crate::error::{ClientError, Result};

/// A structured value whose fields are addressed by depth-first offset.
pub trait PvStructure: Send + fmt::Debug {
    /// Number of addressable fields, including the top level at offset 0.
    fn field_count(&self) -> usize;

    /// Writes the fields selected by `fields`.
    fn serialize_fields(&self, buf: &mut BytesMut, fields: &BitSet);

    /// Reads the fields selected by `fields`.
    fn deserialize_fields(&mut self, buf: &mut dyn Buf, fields: &BitSet) -> Result<()>;

    /// Writes every field.
    fn serialize_all(&self, buf: &mut BytesMut) {
        let all: BitSet = std::iter::once(0).collect();
        self.serialize_fields(buf, &all);
    }

    /// Reads every field.
    fn deserialize_all(&mut self, buf: &mut dyn Buf) -> Result<()> {
        let all: BitSet = std::iter::once(0).collect();
        self.deserialize_fields(buf, &all)
    }
}

/// An array value.
pub trait PvArray: Send + fmt::Debug {
    /// Current element count.
    fn len(&self) -> usize;

    /// Returns true if the array has no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes `count` elements starting at `offset`.
    fn serialize_range(&self, buf: &mut BytesMut, offset: usize, count: usize);

    /// Replaces the contents with elements read from `buf`.
    fn deserialize(&mut self, buf: &mut dyn Buf) -> Result<()>;
}

/// Type description of a field, as answered to a get-field request.
pub trait FieldDesc: Send + Sync + fmt::Debug {
    /// Type identifier, e.g. `epics:nt/NTScalar:1.0` or `double[]`.
    fn type_id(&self) -> String;
}

/// Structural serialization registry owned by a transport.
pub trait IntrospectionRegistry: Send + Sync {
    /// Writes a request descriptor.
    fn serialize_request(&self, buf: &mut BytesMut, request: &PvRequest);

    /// Reads an introspection description and allocates an empty structure for it.
    fn deserialize_structure(&self, buf: &mut dyn Buf) -> Result<Box<dyn PvStructure>>;

    /// Reads an introspection description and allocates an empty array for it.
    fn deserialize_array(&self, buf: &mut dyn Buf) -> Result<Box<dyn PvArray>>;

    /// Writes a structure together with its introspection description.
    fn serialize_structure_full(&self, buf: &mut BytesMut, value: &dyn PvStructure);

    /// Reads a structure together with its introspection description.
    fn deserialize_structure_full(&self, buf: &mut dyn Buf) -> Result<Box<dyn PvStructure>>;

    /// Reads an introspection description on its own.
    fn deserialize_field(&self, buf: &mut dyn Buf) -> Result<Arc<dyn FieldDesc>>;
}

/// Textual request descriptor, e.g. `field(value,timeStamp)record[process=true]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvRequest {
    text: String,
}

impl PvRequest {
    /// Parses a descriptor. Brackets must balance and nest properly.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let mut open: Vec<char> = Vec::new();
        for (pos, c) in text.char_indices() {
            match c {
                '(' | '[' => open.push(c),
                ')' | ']' => {
                    let expected = if c == ')' { '(' } else { '[' };
                    if open.pop() != Some(expected) {
                        return Err(ClientError::InvalidRequest {
                            request: text.clone(),
                            reason: format!("unmatched '{c}' at {pos}"),
                        });
                    }
                }
                _ => {}
            }
        }
        if let Some(c) = open.last() {
            return Err(ClientError::InvalidRequest {
                request: text.clone(),
                reason: format!("unclosed '{c}'"),
            });
        }
        Ok(Self { text })
    }

    /// Descriptor selecting the whole record.
    pub fn all() -> Self {
        Self {
            text: String::new(),
        }
    }

    /// Descriptor text.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Default for PvRequest {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for PvRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A structure and its dirty bitmap.
#[derive(Debug)]
pub struct StructureData {
    /// The value.
    pub value: Box<dyn PvStructure>,
    /// Fields changed since the bitmap was last cleared.
    pub changed: BitSet,
}

impl StructureData {
    /// Wraps a freshly allocated structure with an empty bitmap sized to it.
    pub fn new(value: Box<dyn PvStructure>) -> Self {
        let changed = BitSet::new(value.field_count());
        Self { value, changed }
    }

    /// Swaps in a re-allocated structure after re-initialisation.
    pub fn replace(&mut self, value: Box<dyn PvStructure>) {
        self.changed = BitSet::new(value.field_count());
        self.value = value;
    }
}

/// Structure shared between the application and the I/O path.
pub type StructureHandle = Arc<Mutex<StructureData>>;

/// Array shared between the application and the I/O path.
pub type ArrayHandle = Arc<Mutex<Box<dyn PvArray>>>;

/// Locks a mutex, recovering the data if a listener panicked while holding it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Installs `value` into `slot`, reusing an existing handle so listeners that kept
/// it observe the new contents.
pub(crate) fn install_structure(
    slot: &mut Option<StructureHandle>,
    value: Box<dyn PvStructure>,
) -> StructureHandle {
    match slot {
        Some(handle) => {
            lock(handle).replace(value);
            Arc::clone(handle)
        }
        None => {
            let handle = Arc::new(Mutex::new(StructureData::new(value)));
            *slot = Some(Arc::clone(&handle));
            handle
        }
    }
}

/// Array counterpart of [`install_structure`].
pub(crate) fn install_array(slot: &mut Option<ArrayHandle>, value: Box<dyn PvArray>) -> ArrayHandle {
    match slot {
        Some(handle) => {
            *lock(handle) = value;
            Arc::clone(handle)
        }
        None => {
            let handle: ArrayHandle = Arc::new(Mutex::new(value));
            *slot = Some(Arc::clone(&handle));
            handle
        }
    }
}
