//! Attribute values and instance records.
//!
//! An attribute holds a scalar, a reference to another instance by id, or a
//! nested aggregate of those. References are plain ids: no value ever borrows or
//! points into backend storage.

use serde::{Deserialize, Serialize};

use crate::id::InstanceId;
use crate::schema::TypeId;

/// One attribute value.
///
/// # Examples
///
/// ```
/// use spfstore::{InstanceId, Value};
///
/// let target = InstanceId::new(9).unwrap();
/// let v = Value::List(vec![Value::Ref(target), Value::Float(1.5)]);
/// assert_eq!(v.references().collect::<Vec<_>>(), vec![target]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// `$`: unset.
    Null,
    /// `*`: value derived in a subtype.
    Derived,
    /// `.T.` / `.F.` of a BOOLEAN attribute.
    Bool(bool),
    /// `.T.`, `.F.` or `.U.` (`None`).
    Logical(Option<bool>),
    /// INTEGER.
    Int(i64),
    /// REAL.
    Float(f64),
    /// STRING, already unescaped.
    String(String),
    /// Enumeration literal without the surrounding dots.
    Enum(String),
    /// `#id`.
    Ref(InstanceId),
    /// Aggregate, possibly nested.
    List(Vec<Value>),
}

impl Value {
    /// True for `$`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The id of a scalar reference.
    #[must_use]
    pub const fn as_ref_id(&self) -> Option<InstanceId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// The text of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The members of an aggregate.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Every instance referenced by this value, depth first, duplicates kept.
    pub fn references(&self) -> impl Iterator<Item = InstanceId> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            while let Some(v) = stack.pop() {
                match v {
                    Self::Ref(id) => return Some(*id),
                    Self::List(items) => stack.extend(items.iter().rev()),
                    _ => {}
                }
            }
            None
        })
    }

    /// Removes every reference to `target`: a scalar reference becomes `Null`,
    /// aggregate members are dropped. Returns how many references were removed.
    pub fn strip_references(&mut self, target: InstanceId) -> usize {
        match self {
            Self::Ref(id) if *id == target => {
                *self = Self::Null;
                1
            }
            Self::List(items) => {
                let before = items.len();
                items.retain(|v| v.as_ref_id() != Some(target));
                let mut removed = before - items.len();
                for item in items.iter_mut() {
                    removed += item.strip_references(target);
                }
                removed
            }
            _ => 0,
        }
    }
}

impl From<InstanceId> for Value {
    fn from(id: InstanceId) -> Self {
        Self::Ref(id)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// A typed record owned by the active backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// `#n` in the document.
    pub id: InstanceId,
    /// Declared type.
    pub type_id: TypeId,
    /// Attribute values in declaration order, inherited ones first.
    pub attributes: Vec<Value>,
}

impl Instance {
    /// An instance with `attribute_count` unset attributes.
    #[must_use]
    pub fn empty(id: InstanceId, type_id: TypeId, attribute_count: usize) -> Self {
        Self {
            id,
            type_id,
            attributes: vec![Value::Null; attribute_count],
        }
    }

    /// Attribute at `index`, if the record has one.
    #[must_use]
    pub fn attribute(&self, index: usize) -> Option<&Value> {
        self.attributes.get(index)
    }

    /// `(attribute position, referenced id)` for every outgoing reference.
    /// References inside aggregates report the position of the top-level
    /// attribute that holds the aggregate.
    pub fn references(&self) -> impl Iterator<Item = (u16, InstanceId)> + '_ {
        self.attributes.iter().enumerate().flat_map(|(index, value)| {
            #[allow(clippy::cast_possible_truncation)]
            let position = index as u16;
            value.references().map(move |target| (position, target))
        })
    }

    /// The GlobalId string in attribute 0, if that attribute holds a string.
    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        self.attributes.first().and_then(Value::as_str)
    }
}
