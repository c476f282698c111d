//! Relation containers.
//!
//! `Related<T>` holds a single related record (belongs-to / has-one) and
//! `RelatedMany<T>` a collection (has-many / many-to-many). Both track
//! whether they have been loaded, so "not loaded" and "loaded, nothing
//! there" stay distinguishable. Loaders reach them type-erased through
//! [`RelationSlot`].

use crate::Result;
use crate::error::{Error, TypeError};
use crate::model::{Model, ModelType, Record, downcast_record};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// How freshly loaded records are combined with what a slot already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    /// Discard the current content.
    Replace,
    /// Keep the current content and add to it.
    Append,
    /// Only fill a slot that holds nothing yet.
    IfEmpty,
}

/// Type-erased access to a relation field.
pub trait RelationSlot: Send + Sync {
    /// Model type stored in the slot.
    fn target(&self) -> ModelType;

    /// Has a load (or join) filled this slot, possibly with nothing?
    fn is_loaded(&self) -> bool;

    /// Does the slot hold at least one record?
    fn is_populated(&self) -> bool;

    fn records(&self) -> Vec<&dyn Record>;

    fn records_mut(&mut self) -> Vec<&mut dyn Record>;

    /// Store records of the target type. Returns whether the slot changed.
    #[allow(clippy::result_large_err)]
    fn assign(&mut self, records: Vec<Box<dyn Record>>, mode: AssignMode) -> Result<bool>;

    /// Forget any loaded content.
    fn reset(&mut self);
}

#[allow(clippy::result_large_err)]
fn downcast_all<T: Model>(records: Vec<Box<dyn Record>>) -> Result<Vec<T>> {
    records
        .into_iter()
        .map(|record| {
            let actual = record.model_type().type_name;
            downcast_record::<T>(record).ok_or_else(|| {
                Error::Type(TypeError {
                    expected: std::any::type_name::<T>(),
                    actual: actual.to_string(),
                    column: None,
                    rust_type: None,
                })
            })
        })
        .collect()
}

/// A related single object (many-to-one or one-to-one).
///
/// The record is boxed so a model may relate to its own type.
pub struct Related<T: Model> {
    value: Option<Box<T>>,
    loaded: bool,
}

impl<T: Model> Related<T> {
    /// Create an unloaded relationship.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            value: None,
            loaded: false,
        }
    }

    /// Create with an already-loaded object.
    #[must_use]
    pub fn loaded(obj: T) -> Self {
        Self {
            value: Some(Box::new(obj)),
            loaded: true,
        }
    }

    /// Get the loaded object (None if not loaded or loaded as null).
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.value.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.value.as_deref_mut()
    }

    /// Check if the relationship has been loaded (including loaded-null).
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Set the loaded object, replacing anything already there.
    pub fn set(&mut self, obj: Option<T>) {
        self.value = obj.map(Box::new);
        self.loaded = true;
    }

    pub fn take(&mut self) -> Option<T> {
        self.loaded = false;
        self.value.take().map(|b| *b)
    }
}

impl<T: Model> RelationSlot for Related<T> {
    fn target(&self) -> ModelType {
        ModelType::of::<T>()
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn is_populated(&self) -> bool {
        self.value.is_some()
    }

    fn records(&self) -> Vec<&dyn Record> {
        self.value.iter().map(|v| &**v as &dyn Record).collect()
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.value
            .iter_mut()
            .map(|v| &mut **v as &mut dyn Record)
            .collect()
    }

    fn assign(&mut self, records: Vec<Box<dyn Record>>, mode: AssignMode) -> Result<bool> {
        if records.len() > 1 {
            tracing::debug!(
                target_model = std::any::type_name::<T>(),
                count = records.len(),
                "Single relation received several records, keeping the first"
            );
        }
        let mut incoming = downcast_all::<T>(records)?.into_iter();
        match mode {
            AssignMode::IfEmpty | AssignMode::Append if self.value.is_some() => Ok(false),
            _ => {
                self.value = incoming.next().map(Box::new);
                self.loaded = true;
                Ok(true)
            }
        }
    }

    fn reset(&mut self) {
        self.value = None;
        self.loaded = false;
    }
}

impl<T: Model> Default for Related<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Model> Clone for Related<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            loaded: self.loaded,
        }
    }
}

impl<T: Model> PartialEq for Related<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.loaded == other.loaded && self.value == other.value
    }
}

impl<T: Model> fmt::Debug for Related<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (self.loaded, self.value.is_some()) {
            (false, _) => "unloaded",
            (true, false) => "loaded-empty",
            (true, true) => "loaded",
        };
        f.debug_struct("Related")
            .field("state", &state)
            .field("value", &self.value)
            .finish()
    }
}

impl<T> Serialize for Related<T>
where
    T: Model + Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.value {
            Some(obj) => obj.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de, T> Deserialize<'de> for Related<T>
where
    T: Model + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let opt = Option::<T>::deserialize(deserializer)?;
        Ok(match opt {
            Some(obj) => Self::loaded(obj),
            None => Self::empty(),
        })
    }
}

/// A collection of related objects (one-to-many or many-to-many).
pub struct RelatedMany<T: Model> {
    items: Vec<T>,
    loaded: bool,
}

impl<T: Model> RelatedMany<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            loaded: false,
        }
    }

    #[must_use]
    pub fn loaded(items: Vec<T>) -> Self {
        Self {
            items,
            loaded: true,
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Loaded objects, or `None` before any load.
    #[must_use]
    pub fn get(&self) -> Option<&[T]> {
        self.loaded.then_some(self.items.as_slice())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Replace the collection.
    pub fn set(&mut self, items: Vec<T>) {
        self.items = items;
        self.loaded = true;
    }
}

impl<T: Model> RelationSlot for RelatedMany<T> {
    fn target(&self) -> ModelType {
        ModelType::of::<T>()
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn is_populated(&self) -> bool {
        !self.items.is_empty()
    }

    fn records(&self) -> Vec<&dyn Record> {
        self.items.iter().map(|v| v as &dyn Record).collect()
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.items.iter_mut().map(|v| v as &mut dyn Record).collect()
    }

    fn assign(&mut self, records: Vec<Box<dyn Record>>, mode: AssignMode) -> Result<bool> {
        let incoming = downcast_all::<T>(records)?;
        match mode {
            AssignMode::Replace => self.items = incoming,
            AssignMode::Append => self.items.extend(incoming),
            AssignMode::IfEmpty => {
                if !self.items.is_empty() {
                    return Ok(false);
                }
                self.items = incoming;
            }
        }
        self.loaded = true;
        Ok(true)
    }

    fn reset(&mut self) {
        self.items.clear();
        self.loaded = false;
    }
}

impl<T: Model> Default for RelatedMany<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Model> Clone for RelatedMany<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            loaded: self.loaded,
        }
    }
}

impl<T: Model> PartialEq for RelatedMany<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.loaded == other.loaded && self.items == other.items
    }
}

impl<T: Model> fmt::Debug for RelatedMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelatedMany")
            .field("loaded", &self.loaded)
            .field("items", &self.items)
            .finish()
    }
}

impl<T> Serialize for RelatedMany<T>
where
    T: Model + Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for RelatedMany<T>
where
    T: Model + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(Self::loaded)
    }
}

impl<'a, T: Model> IntoIterator for &'a RelatedMany<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
