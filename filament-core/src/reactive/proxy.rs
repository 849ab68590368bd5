//! Reactive Objects
//!
//! [`Reactive`] wraps a JSON object or array and exposes it through accessor
//! methods with property-level reactivity:
//!
//! 1. Per-property signals: `get("a")` tracks only property `a`. The signal
//!    is created on the first tracked read, so memory grows with the
//!    properties actually observed, not with the size of the object.
//! 2. A structural signal: `keys()`, `has()` on a missing key and reads of
//!    missing keys track it, so adding or removing a property re-runs
//!    iteration-dependent effects.
//! 3. For arrays, `"length"` is a property with its own signal.
//!
//! Nested objects and arrays are promoted to child proxies the first time
//! they are read and cached in place, so repeated reads return the same
//! proxy until the property is overwritten.
//!
//! Every committed write also goes to the [`PropertyStore`] so coarse
//! listeners (see [`watch_property`](super::watch_property)) hear about it.
//!
//! [`DeepRef`] is a single reactive slot holding any JSON value; objects and
//! arrays stored in it are handed out as proxies.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::context::with_suspended_tracking;
use super::runtime::Runtime;
use super::signal::{register_signal_type, Readable, SignalCore};
use super::store::{PropertyStore, TargetId};
use crate::error::{ReactiveError, Result};
use crate::graph::SignalId;

/// The property name of an array's length.
pub const LENGTH: &str = "length";

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Canonical decimal index: `"3"` parses, `"03"` and `"-1"` do not.
fn parse_index(key: &str) -> Option<usize> {
    let index: usize = key.parse().ok()?;
    (index.to_string() == key).then_some(index)
}

// ----------------------------------------------------------------------------
// Storage
// ----------------------------------------------------------------------------

enum Slot {
    Raw(Value),
    Nested(Reactive),
}

impl Slot {
    /// Replace an object or array with a child proxy.
    fn promote(&mut self, frozen: bool) {
        let Slot::Raw(value) = self else {
            return;
        };
        if !(value.is_object() || value.is_array()) {
            return;
        }
        if let Some(shape) = Shape::from_value(value.take()) {
            *self = Slot::Nested(Reactive::from_shape(shape, frozen));
        }
    }

    fn field(&self) -> Field {
        match self {
            Slot::Raw(value) => Field::Value(value.clone()),
            Slot::Nested(child) => Field::Nested(child.clone()),
        }
    }

    /// Deep value. Only a nested proxy tracks, so callers promote first.
    fn value(&self) -> Value {
        match self {
            Slot::Raw(value) => value.clone(),
            Slot::Nested(child) => child.snapshot(),
        }
    }

    fn peek_value(&self) -> Value {
        match self {
            Slot::Raw(value) => value.clone(),
            Slot::Nested(child) => child.peek_snapshot(),
        }
    }
}

enum Shape {
    Object(IndexMap<String, Slot>),
    Array(Vec<Slot>),
}

impl Shape {
    /// Splits an object or array into slots; `None` for scalars.
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Shape::Object(
                map.into_iter().map(|(k, v)| (k, Slot::Raw(v))).collect(),
            )),
            Value::Array(items) => Some(Shape::Array(items.into_iter().map(Slot::Raw).collect())),
            _ => None,
        }
    }

    fn contains(&self, key: &str) -> bool {
        match self {
            Shape::Object(map) => map.contains_key(key),
            Shape::Array(items) => parse_index(key).is_some_and(|i| i < items.len()),
        }
    }

    fn keys(&self) -> Vec<String> {
        match self {
            Shape::Object(map) => map.keys().cloned().collect(),
            Shape::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Shape::Object(map) => map.len(),
            Shape::Array(items) => items.len(),
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Slot> {
        match self {
            Shape::Object(map) => map.get_mut(key),
            Shape::Array(items) => parse_index(key).and_then(|i| items.get_mut(i)),
        }
    }

    fn slots_mut(&mut self) -> Box<dyn Iterator<Item = &mut Slot> + '_> {
        match self {
            Shape::Object(map) => Box::new(map.values_mut()),
            Shape::Array(items) => Box::new(items.iter_mut()),
        }
    }
}

// ----------------------------------------------------------------------------
// Field
// ----------------------------------------------------------------------------

/// A property value read from a reactive object.
#[derive(Clone)]
pub enum Field {
    /// A scalar (or a value stored without promotion).
    Value(Value),
    /// A nested object or array, as its cached proxy.
    Nested(Reactive),
}

impl Field {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Field::Value(value) => Some(value),
            Field::Nested(_) => None,
        }
    }

    pub fn as_nested(&self) -> Option<&Reactive> {
        match self {
            Field::Value(_) => None,
            Field::Nested(child) => Some(child),
        }
    }

    /// The plain value. A nested proxy is snapshotted, tracking every
    /// property it reads.
    pub fn into_value(self) -> Value {
        match self {
            Field::Value(value) => value,
            Field::Nested(child) => child.snapshot(),
        }
    }
}

impl Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Field::Nested(child) => f.debug_tuple("Nested").field(child).finish(),
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Field::Value(value) => value.serialize(serializer),
            Field::Nested(child) => child.serialize(serializer),
        }
    }
}

// ----------------------------------------------------------------------------
// Reactive
// ----------------------------------------------------------------------------

struct ProxyInner {
    target: TargetId,
    shape: RefCell<Shape>,
    signals: RefCell<IndexMap<String, SignalCore>>,
    keys: SignalCore,
    frozen: Cell<bool>,
}

impl ProxyInner {
    /// The signal of `key`, created on demand.
    fn signal_for(&self, key: &str) -> SignalId {
        let mut signals = self.signals.borrow_mut();
        if let Some(core) = signals.get(key) {
            return core.id();
        }
        let core = SignalCore::new();
        let id = core.id();
        signals.insert(key.to_string(), core);
        id
    }

    fn existing_signal(&self, key: &str) -> Option<SignalId> {
        self.signals.borrow().get(key).map(SignalCore::id)
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        PropertyStore::remove_target(self.target);
    }
}

/// A reactive JSON object or array.
///
/// Cloning yields another handle to the same object.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{Computed, Reactive};
/// use serde_json::json;
///
/// let obj = Reactive::new(json!({ "a": 1 }));
///
/// let o = obj.clone();
/// let doubled = Computed::new(move |_| {
///     o.get_value("a").and_then(|v| v.as_i64()).unwrap_or(0) * 2
/// });
/// assert_eq!(doubled.get(), 2);
///
/// obj.set("a", 2).unwrap();
/// assert_eq!(doubled.get(), 4);
/// ```
#[derive(Clone)]
pub struct Reactive {
    inner: Rc<ProxyInner>,
}

impl Reactive {
    /// Wrap a JSON object or array.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not an object or array; see [`Reactive::try_new`].
    pub fn new(value: Value) -> Self {
        match Self::try_new(value) {
            Ok(reactive) => reactive,
            Err(err) => panic!("{err}"),
        }
    }

    /// Wrap a JSON object or array, failing with
    /// [`ReactiveError::NotProxyable`] for any other value.
    pub fn try_new(value: Value) -> Result<Self> {
        let kind = kind_of(&value);
        let shape = Shape::from_value(value).ok_or(ReactiveError::NotProxyable { kind })?;
        Ok(Self::from_shape(shape, false))
    }

    /// An empty reactive object.
    pub fn object() -> Self {
        Self::from_shape(Shape::Object(IndexMap::new()), false)
    }

    /// An empty reactive array.
    pub fn array() -> Self {
        Self::from_shape(Shape::Array(Vec::new()), false)
    }

    fn from_shape(shape: Shape, frozen: bool) -> Self {
        register_signal_type::<Reactive>();
        Self {
            inner: Rc::new(ProxyInner {
                target: TargetId::next(),
                shape: RefCell::new(shape),
                signals: RefCell::new(IndexMap::new()),
                keys: SignalCore::new(),
                frozen: Cell::new(frozen),
            }),
        }
    }

    /// Identity of this object in the property store.
    pub fn target_id(&self) -> TargetId {
        self.inner.target
    }

    pub fn is_array(&self) -> bool {
        matches!(*self.inner.shape.borrow(), Shape::Array(_))
    }

    /// Whether both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    fn track_property(&self, key: &str) {
        if Runtime::is_tracking() {
            Runtime::track(self.inner.signal_for(key));
        }
    }

    fn track_keys(&self) {
        self.inner.keys.track();
    }

    /// The signal of `key`, if one has been materialized.
    pub fn property_signal(&self, key: &str) -> Option<SignalId> {
        self.inner.existing_signal(key)
    }

    /// The structural signal, bumped when properties are added or removed.
    pub fn keys_signal(&self) -> SignalId {
        self.inner.keys.id()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read `key`, tracking it. A missing key tracks the structural signal
    /// and returns `None`.
    pub fn get(&self, key: &str) -> Option<Field> {
        if key == LENGTH && self.is_array() {
            self.track_property(LENGTH);
            let len = self.inner.shape.borrow().len();
            return Some(Field::Value(Value::from(len)));
        }

        if !self.inner.shape.borrow().contains(key) {
            self.track_keys();
            return None;
        }
        self.track_property(key);

        let frozen = self.inner.frozen.get();
        let mut shape = self.inner.shape.borrow_mut();
        let slot = shape.slot_mut(key)?;
        slot.promote(frozen);
        Some(slot.field())
    }

    /// Read `key` as a plain value (nested objects are snapshotted).
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key).map(Field::into_value)
    }

    /// Read `key` without tracking.
    pub fn peek(&self, key: &str) -> Option<Value> {
        with_suspended_tracking(|| self.get_value(key))
    }

    /// The nested proxy stored under `key`, if that property holds an
    /// object or array.
    pub fn child(&self, key: &str) -> Option<Reactive> {
        match self.get(key)? {
            Field::Nested(child) => Some(child),
            Field::Value(_) => None,
        }
    }

    /// Whether `key` exists.
    pub fn has(&self, key: &str) -> bool {
        if self.inner.shape.borrow().contains(key) {
            self.track_property(key);
            true
        } else {
            self.track_keys();
            false
        }
    }

    /// Property names (indices for arrays), tracking the structure.
    pub fn keys(&self) -> Vec<String> {
        self.track_keys();
        self.inner.shape.borrow().keys()
    }

    /// Number of properties or elements.
    pub fn len(&self) -> usize {
        if self.is_array() {
            self.track_property(LENGTH);
        } else {
            self.track_keys();
        }
        self.inner.shape.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole value, tracking every property read along the way.
    ///
    /// Under tracking, nested objects and arrays are promoted so the reader
    /// also links to their properties, at every depth.
    pub fn snapshot(&self) -> Value {
        if Runtime::is_tracking() {
            self.track_keys();
            if self.is_array() {
                self.track_property(LENGTH);
            }
            for key in self.inner.shape.borrow().keys() {
                self.track_property(&key);
            }

            let frozen = self.inner.frozen.get();
            for slot in self.inner.shape.borrow_mut().slots_mut() {
                slot.promote(frozen);
            }
        }

        // Raw slots left here are scalars, or nothing is tracking.
        let shape = self.inner.shape.borrow();
        match &*shape {
            Shape::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, slot)| (k.clone(), slot.value()))
                    .collect(),
            ),
            Shape::Array(items) => Value::Array(items.iter().map(Slot::value).collect()),
        }
    }

    /// The whole value without tracking.
    pub fn peek_snapshot(&self) -> Value {
        with_suspended_tracking(|| self.snapshot())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn ensure_mutable(&self, property: &str) -> Result<()> {
        if self.inner.frozen.get() {
            return Err(ReactiveError::Frozen {
                property: property.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_array(&self, operation: &'static str) -> Result<()> {
        if self.is_array() {
            Ok(())
        } else {
            Err(ReactiveError::NotAnArray { operation })
        }
    }

    /// Invalidate and forget the signal of `key`.
    fn invalidate(&self, key: &str) {
        let core = self.inner.signals.borrow_mut().shift_remove(key);
        if let Some(core) = core {
            core.invalidate();
        }
    }

    /// Notify the signals of `changed`, the structural signal if the shape
    /// changed, then the property store.
    fn commit(&self, changed: &[String], structural: bool) {
        for key in changed {
            if let Some(id) = self.inner.existing_signal(key) {
                Runtime::notify_signal_change(id);
            }
        }
        if structural {
            self.inner.keys.trigger();
        }
        PropertyStore::notify(self.inner.target, changed);
    }

    /// Write `key`.
    ///
    /// Returns `Ok(false)` if the stored value is already equal to `value`.
    /// On arrays, `key` must be an index or `"length"`; writing past the end
    /// pads with `null`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.ensure_mutable(key)?;

        if !self.is_array() {
            return Ok(self.set_property(key, value));
        }
        if key == LENGTH {
            let len = value.as_i64().ok_or_else(|| ReactiveError::InvalidValue {
                property: LENGTH.to_string(),
                expected: "an integer",
            })?;
            return self.set_len(len);
        }
        let index = parse_index(key).ok_or_else(|| ReactiveError::InvalidIndex {
            key: key.to_string(),
        })?;
        Ok(self.set_index(index, value))
    }

    fn set_property(&self, key: &str, value: Value) -> bool {
        let (added, _previous) = {
            let mut shape = self.inner.shape.borrow_mut();
            let Shape::Object(map) = &mut *shape else {
                return false;
            };
            match map.get_mut(key) {
                Some(slot) => {
                    if slot.peek_value() == value {
                        return false;
                    }
                    (false, Some(std::mem::replace(slot, Slot::Raw(value))))
                }
                None => {
                    map.insert(key.to_string(), Slot::Raw(value));
                    (true, None)
                }
            }
        };
        self.commit(&[key.to_string()], added);
        true
    }

    fn set_index(&self, index: usize, value: Value) -> bool {
        let (grew, _previous) = {
            let mut shape = self.inner.shape.borrow_mut();
            let Shape::Array(items) = &mut *shape else {
                return false;
            };
            if let Some(slot) = items.get_mut(index) {
                if slot.peek_value() == value {
                    return false;
                }
                (false, Some(std::mem::replace(slot, Slot::Raw(value))))
            } else {
                items.resize_with(index, || Slot::Raw(Value::Null));
                items.push(Slot::Raw(value));
                (true, None)
            }
        };

        let mut changed = vec![index.to_string()];
        if grew {
            changed.push(LENGTH.to_string());
        }
        self.commit(&changed, grew);
        true
    }

    /// Remove `key`. Its signal is invalidated: every effect that read it is
    /// unlinked and notified once.
    ///
    /// On arrays the element is reset to `null` and the length is kept.
    /// Returns `Ok(false)` if there was nothing to remove.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_mutable(key)?;

        let (removed, structural) = {
            let mut shape = self.inner.shape.borrow_mut();
            match &mut *shape {
                Shape::Object(map) => (map.shift_remove(key), true),
                Shape::Array(items) => {
                    let index = parse_index(key).ok_or_else(|| ReactiveError::InvalidIndex {
                        key: key.to_string(),
                    })?;
                    let removed = items
                        .get_mut(index)
                        .map(|slot| std::mem::replace(slot, Slot::Raw(Value::Null)));
                    (removed, false)
                }
            }
        };
        if removed.is_none() {
            return Ok(false);
        }

        if structural {
            self.inner.keys.trigger();
        }
        self.invalidate(key);
        PropertyStore::notify(self.inner.target, &[key.to_string()]);
        drop(removed);
        Ok(true)
    }

    /// Append to an array. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        self.ensure_array("push")?;
        self.ensure_mutable(LENGTH)?;

        let len = {
            let mut shape = self.inner.shape.borrow_mut();
            let Shape::Array(items) = &mut *shape else {
                return Err(ReactiveError::NotAnArray { operation: "push" });
            };
            items.push(Slot::Raw(value.into()));
            items.len()
        };
        self.commit(&[(len - 1).to_string(), LENGTH.to_string()], true);
        Ok(len)
    }

    /// Remove the last element of an array.
    pub fn pop(&self) -> Result<Option<Value>> {
        self.ensure_array("pop")?;
        self.ensure_mutable(LENGTH)?;

        let popped = {
            let mut shape = self.inner.shape.borrow_mut();
            let Shape::Array(items) = &mut *shape else {
                return Err(ReactiveError::NotAnArray { operation: "pop" });
            };
            items.pop().map(|slot| (items.len(), slot))
        };
        let Some((index, slot)) = popped else {
            return Ok(None);
        };

        let value = slot.peek_value();
        let key = index.to_string();
        self.invalidate(&key);
        self.commit(&[key, LENGTH.to_string()], true);
        Ok(Some(value))
    }

    /// Resize an array.
    ///
    /// Shrinking drops the removed elements and invalidates their signals
    /// before the length change is announced. Growing pads with `null`.
    /// Returns `Ok(false)` if the length is unchanged.
    pub fn set_len(&self, len: i64) -> Result<bool> {
        if len < 0 {
            return Err(ReactiveError::InvalidLength(len));
        }
        self.ensure_array("set_len")?;
        self.ensure_mutable(LENGTH)?;
        let new_len = usize::try_from(len).map_err(|_| ReactiveError::InvalidLength(len))?;

        let (old_len, _dropped) = {
            let mut shape = self.inner.shape.borrow_mut();
            let Shape::Array(items) = &mut *shape else {
                return Err(ReactiveError::NotAnArray { operation: "set_len" });
            };
            let old_len = items.len();
            if new_len < old_len {
                (old_len, items.split_off(new_len))
            } else {
                items.resize_with(new_len, || Slot::Raw(Value::Null));
                (old_len, Vec::new())
            }
        };
        if old_len == new_len {
            return Ok(false);
        }

        let mut changed: Vec<String> = (new_len..old_len).map(|i| i.to_string()).collect();
        for key in &changed {
            self.invalidate(key);
        }
        changed.push(LENGTH.to_string());
        self.commit(&changed, true);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Freezing
    // ------------------------------------------------------------------

    /// Refuse every further mutation of this object and of the objects
    /// nested in it.
    pub fn freeze(&self) {
        self.inner.frozen.set(true);
        let mut shape = self.inner.shape.borrow_mut();
        for slot in shape.slots_mut() {
            if let Slot::Nested(child) = slot {
                child.freeze();
            }
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }
}

impl TryFrom<Value> for Reactive {
    type Error = ReactiveError;

    fn try_from(value: Value) -> Result<Self> {
        Reactive::try_new(value)
    }
}

impl Serialize for Reactive {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.peek_snapshot().serialize(serializer)
    }
}

impl Debug for Reactive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.inner.target)
            .field("frozen", &self.inner.frozen.get())
            .field("value", &self.peek_snapshot())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// DeepRef
// ----------------------------------------------------------------------------

struct DeepRefInner {
    core: SignalCore,
    slot: RefCell<Slot>,
}

/// A reactive slot holding any JSON value. Objects and arrays are exposed
/// as [`Reactive`] proxies, built on first read and kept until the slot is
/// written again.
#[derive(Clone)]
pub struct DeepRef {
    inner: Rc<DeepRefInner>,
}

impl DeepRef {
    pub fn new(value: impl Into<Value>) -> Self {
        register_signal_type::<DeepRef>();
        Self {
            inner: Rc::new(DeepRefInner {
                core: SignalCore::new(),
                slot: RefCell::new(Slot::Raw(value.into())),
            }),
        }
    }

    pub fn id(&self) -> SignalId {
        self.inner.core.id()
    }

    /// Read the slot, tracking it.
    pub fn get(&self) -> Field {
        self.inner.core.track();
        let mut slot = self.inner.slot.borrow_mut();
        slot.promote(false);
        slot.field()
    }

    /// Read the slot as a plain value, tracking nested reads.
    pub fn get_value(&self) -> Value {
        self.get().into_value()
    }

    pub fn peek(&self) -> Value {
        with_suspended_tracking(|| self.get_value())
    }

    /// Write the slot. Returns `false` if the value is unchanged.
    pub fn set(&self, value: impl Into<Value>) -> bool {
        let value = value.into();
        let _previous = {
            let mut slot = self.inner.slot.borrow_mut();
            if slot.peek_value() == value {
                return false;
            }
            std::mem::replace(&mut *slot, Slot::Raw(value))
        };
        self.inner.core.trigger();
        true
    }

    pub fn version(&self) -> u64 {
        self.inner.core.version()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }
}

impl Readable for DeepRef {
    type Value = Value;

    fn read(&self) -> Value {
        self.get_value()
    }

    fn peek(&self) -> Value {
        DeepRef::peek(self)
    }

    fn signal_id(&self) -> SignalId {
        self.id()
    }
}

impl Serialize for DeepRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.peek().serialize(serializer)
    }
}

impl Debug for DeepRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepRef")
            .field("id", &self.id())
            .field("value", &self.peek())
            .finish()
    }
}
