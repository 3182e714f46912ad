//! The in-memory frame model.
//!
//! A document frame carries its own type metadata (classes and stores) plus
//! a document-level payload section and one payload section per store. The
//! headers are decoded eagerly into [`ClassDef`]/[`StoreDef`]; the payload
//! sections are held as [`Section`]s, a lazy dual representation that keeps
//! either the still-packed bytes or the decoded value and converts on
//! demand.
//!
//! This is what makes pure pass-through cheap: a frame that is read and
//! immediately re-written never decodes its payload bytes at all, and a
//! frame where one section was mutated re-encodes only that section.

use crate::constants::{self, IS_COLLECTION, IS_SELF_POINTER, IS_SLICE, NAME, POINTER_TO};
use crate::error::{DocrepError, Result};

pub use rmpv::Value;

/// A named record type with an ordered field list.
///
/// Classes are referenced by zero-based index from store definitions; index
/// 0 is reserved for the document's own meta record type.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    /// Class name, e.g. `"__meta__"` or `"Token"`.
    pub name: String,
    /// Ordered field definitions; items address fields by position.
    pub fields: Vec<FieldDef>,
}

impl ClassDef {
    /// Creates a class with the given name and no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub(crate) fn from_value(value: Value) -> Result<Self> {
        let parts = match value {
            Value::Array(parts) => parts,
            other => {
                return Err(DocrepError::Codec(format!(
                    "class definition must be an array, got {other}"
                )))
            }
        };
        let mut parts = parts.into_iter();
        let name = match parts.next() {
            Some(Value::String(s)) => s
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| DocrepError::Codec("class name is not valid UTF-8".into()))?,
            other => {
                return Err(DocrepError::Codec(format!(
                    "class name must be a string, got {other:?}"
                )))
            }
        };
        let fields = match parts.next() {
            Some(Value::Array(raw)) => raw
                .into_iter()
                .map(FieldDef::from_value)
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(DocrepError::Codec(format!(
                    "class field list must be an array, got {other:?}"
                )))
            }
        };
        Ok(Self { name, fields })
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.name.as_str()),
            Value::Array(self.fields.iter().map(FieldDef::to_value).collect()),
        ])
    }
}

/// A field definition: an order-preserving mapping from small integer trait
/// keys to generic values.
///
/// Recognized keys live in [`crate::constants`]; unrecognized keys are
/// preserved verbatim so newer producers' frames survive a rewrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDef {
    entries: Vec<(i64, Value)>,
}

impl FieldDef {
    /// Creates an empty field definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a field definition carrying only a `NAME` trait.
    pub fn named(name: impl Into<String>) -> Self {
        let mut def = Self::new();
        def.set(NAME, Value::from(name.into()));
        def
    }

    /// Returns the trait value for `key`, if present.
    pub fn get(&self, key: i64) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Sets the trait value for `key`, replacing an existing entry in place
    /// (its position is kept) or appending a new one.
    pub fn set(&mut self, key: i64, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Removes and returns the trait value for `key`.
    pub fn remove(&mut self, key: i64) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// The field's name, when it carries a valid `NAME` trait.
    pub fn name(&self) -> Option<&str> {
        self.get(NAME).and_then(Value::as_str)
    }

    /// Replaces the field's name. This is the explicit mutation surface a
    /// rename tool uses; the caller is responsible for keeping payload field
    /// keys consistent, which a pure rename does by construction.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set(NAME, Value::from(name.into()));
    }

    /// True if the field carries a slice marker (boolean form pre-v2, nil
    /// marker form from v2 on).
    pub fn is_slice(&self) -> bool {
        match self.get(IS_SLICE) {
            None => false,
            Some(Value::Boolean(b)) => *b,
            // From v2 the presence of the key is the flag.
            Some(_) => true,
        }
    }

    /// True if the field is a reference within its own store.
    pub fn is_self_pointer(&self) -> bool {
        self.get(IS_SELF_POINTER).is_some()
    }

    /// True if the field holds a sequence of references rather than one.
    pub fn is_collection(&self) -> bool {
        self.get(IS_COLLECTION).is_some()
    }

    /// The target store index of a `POINTER_TO` trait, if present and
    /// well-formed.
    pub fn pointer_to(&self) -> Option<u64> {
        self.get(POINTER_TO).and_then(Value::as_u64)
    }

    /// All trait entries in wire order.
    pub fn entries(&self) -> &[(i64, Value)] {
        &self.entries
    }

    pub(crate) fn from_value(value: Value) -> Result<Self> {
        let pairs = match value {
            Value::Map(pairs) => pairs,
            other => {
                return Err(DocrepError::Codec(format!(
                    "field definition must be a map, got {other}"
                )))
            }
        };
        let mut entries = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            let key = k.as_i64().ok_or_else(|| {
                DocrepError::Codec(format!("field trait key must be an integer, got {k}"))
            })?;
            entries.push((key, v));
        }
        Ok(Self { entries })
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::Map(
            self.entries
                .iter()
                .map(|(k, v)| (Value::from(*k), v.clone()))
                .collect(),
        )
    }
}

/// A store definition: a named, homogeneous collection of items of one
/// class. Wire form is the 3-tuple `[name, klass, count]`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreDef {
    /// Store name, e.g. `"tokens"`.
    pub name: String,
    /// Index into the frame's class table.
    pub klass: usize,
    /// Declared number of items in the store's payload.
    pub count: u64,
}

impl StoreDef {
    pub(crate) fn from_value(value: Value) -> Result<Self> {
        let parts = match value {
            Value::Array(parts) if parts.len() == 3 => parts,
            other => {
                return Err(DocrepError::Codec(format!(
                    "store definition must be a [name, klass, count] triple, got {other}"
                )))
            }
        };
        let name = parts[0]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| DocrepError::Codec("store name must be a UTF-8 string".into()))?;
        let klass = parts[1]
            .as_u64()
            .and_then(|k| usize::try_from(k).ok())
            .ok_or_else(|| DocrepError::Codec("store klass must be a non-negative integer".into()))?;
        let count = parts[2]
            .as_u64()
            .ok_or_else(|| DocrepError::Codec("store count must be a non-negative integer".into()))?;
        Ok(Self { name, klass, count })
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.name.as_str()),
            Value::from(self.klass as u64),
            Value::from(self.count),
        ])
    }
}

/// One payload section held lazily as packed bytes, a decoded value, or
/// both.
///
/// The two forms are never stale copies of each other: reading through
/// [`Section::decoded`] keeps the packed bytes for later pass-through, while
/// any mutation path ([`Section::decoded_mut`], [`Section::set_decoded`])
/// drops the packed cache so the next [`Section::packed`] re-encodes.
#[derive(Debug, Clone)]
pub struct Section {
    packed: Option<Vec<u8>>,
    value: Option<Value>,
}

impl Section {
    /// Wraps still-packed bytes without decoding them.
    pub fn from_packed(bytes: Vec<u8>) -> Self {
        Self {
            packed: Some(bytes),
            value: None,
        }
    }

    /// Wraps an already-decoded value.
    pub fn from_value(value: Value) -> Self {
        Self {
            packed: None,
            value: Some(value),
        }
    }

    /// True if the packed byte form is currently cached.
    pub fn is_packed(&self) -> bool {
        self.packed.is_some()
    }

    /// True if the decoded value form is currently cached.
    pub fn is_decoded(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the decoded value, decoding and caching it on first access.
    /// The packed form is retained, so a subsequent re-encode of an
    /// unmutated section is byte-identical for free.
    pub fn decoded(&mut self) -> Result<&Value> {
        if self.value.is_none() {
            let bytes = self
                .packed
                .as_deref()
                .ok_or_else(|| DocrepError::Codec("section holds neither form".into()))?;
            let mut cursor = bytes;
            let value = rmpv::decode::read_value(&mut cursor)
                .map_err(|e| DocrepError::Codec(format!("section decode failed: {e}")))?;
            self.value = Some(value);
        }
        // Invariant: value was just populated above if it was absent.
        self.value
            .as_ref()
            .ok_or_else(|| DocrepError::Codec("section decode produced no value".into()))
    }

    /// Returns the decoded value for mutation. The packed cache is
    /// invalidated, since the caller may change the value.
    pub fn decoded_mut(&mut self) -> Result<&mut Value> {
        self.decoded()?;
        self.packed = None;
        self.value
            .as_mut()
            .ok_or_else(|| DocrepError::Codec("section decode produced no value".into()))
    }

    /// Replaces the decoded value, invalidating the packed cache.
    pub fn set_decoded(&mut self, value: Value) {
        self.value = Some(value);
        self.packed = None;
    }

    /// Returns the packed bytes, encoding and caching them on first access.
    pub fn packed(&mut self) -> Result<&[u8]> {
        if self.packed.is_none() {
            let value = self
                .value
                .as_ref()
                .ok_or_else(|| DocrepError::Codec("section holds neither form".into()))?;
            let mut buf = Vec::new();
            rmpv::encode::write_value(&mut buf, value)
                .map_err(|e| DocrepError::Codec(format!("section encode failed: {e}")))?;
            self.packed = Some(buf);
        }
        self.packed
            .as_deref()
            .ok_or_else(|| DocrepError::Codec("section encode produced no bytes".into()))
    }
}

/// The lazy in-memory representation of one document frame.
///
/// Headers (`version`, `klasses`, `stores`) are plain mutable data; payload
/// sections stay packed until someone asks for their values. Frames hold no
/// cross-frame state and are consumed either by re-serialization or by being
/// dropped.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Wire format revision; 1 is implicit on the wire.
    pub version: u32,
    /// Class table; index 0 is the document's meta record type.
    pub klasses: Vec<ClassDef>,
    /// Store table, parallel to `store_payloads`.
    pub stores: Vec<StoreDef>,
    /// The document-level record, interpreted using `klasses[0]`.
    pub doc: Section,
    /// One payload section per store, in store order.
    pub store_payloads: Vec<Section>,
}

impl RawFrame {
    /// Synthesizes the minimal valid frame at the current revision: one
    /// empty `__meta__` class, no stores, an empty document record.
    pub fn empty() -> Self {
        Self {
            version: constants::CURRENT_VERSION,
            klasses: vec![ClassDef::new("__meta__")],
            stores: Vec::new(),
            doc: Section::from_value(Value::Map(Vec::new())),
            store_payloads: Vec::new(),
        }
    }

    /// Checks the header invariants: every store's `klass` indexes the
    /// class table, and every `POINTER_TO` trait indexes the store table.
    pub fn validate(&self) -> Result<()> {
        for store in &self.stores {
            if store.klass >= self.klasses.len() {
                return Err(DocrepError::MalformedHeader(format!(
                    "store {:?} references class {} but only {} classes are defined",
                    store.name,
                    store.klass,
                    self.klasses.len()
                )));
            }
        }
        for klass in &self.klasses {
            for field in &klass.fields {
                if let Some(target) = field.get(POINTER_TO) {
                    let in_range = target
                        .as_u64()
                        .and_then(|t| usize::try_from(t).ok())
                        .map(|t| t < self.stores.len())
                        .unwrap_or(false);
                    if !in_range {
                        return Err(DocrepError::MalformedHeader(format!(
                            "field {:?} in class {:?} points to invalid store {target}",
                            field.name(),
                            klass.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks that each store's declared `count` matches the number of
    /// items actually present in its payload. Decodes each store section.
    pub fn check_counts(&mut self) -> Result<()> {
        if self.stores.len() != self.store_payloads.len() {
            return Err(DocrepError::MalformedHeader(format!(
                "{} stores but {} payload sections",
                self.stores.len(),
                self.store_payloads.len()
            )));
        }
        for i in 0..self.stores.len() {
            let declared = self.stores[i].count;
            let actual = match self.store_payloads[i].decoded()? {
                // A lone map is one item encoded unwrapped.
                Value::Map(_) => 1,
                Value::Array(items) => items.len() as u64,
                other => {
                    return Err(DocrepError::Codec(format!(
                        "store payload must be a map or an array, got {other}"
                    )))
                }
            };
            if actual != declared {
                return Err(DocrepError::MalformedHeader(format!(
                    "store {:?} declares {declared} items but holds {actual}",
                    self.stores[i].name
                )));
            }
        }
        Ok(())
    }
}
