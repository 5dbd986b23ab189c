//! Type registry.
//!
//! The store classifies instances by declaration but does not interpret them.
//! This module is the small slice of an EXPRESS schema the store needs: named
//! entity declarations with single inheritance, their attribute lists and the
//! GlobalId-bearing root. Defined types (`TYPE ... END_TYPE`) can be declared
//! too: their instances are stored and found by id but stay out of the type
//! index.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dense index of a declaration within its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(u16);

impl TypeId {
    /// Wraps a raw declaration index.
    #[must_use]
    pub const fn from_index(index: u16) -> Self {
        Self(index)
    }

    /// The raw declaration index.
    #[must_use]
    pub const fn index(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while building a schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// A declaration name is not an EXPRESS identifier.
    #[error("'{0}' is not a valid EXPRESS identifier")]
    InvalidName(String),

    /// Two declarations share a name (case-insensitively).
    #[error("declaration '{0}' is declared twice")]
    DuplicateDeclaration(String),

    /// A supertype is unknown, declared later, or not an entity.
    #[error("declaration '{name}' names unknown supertype '{supertype}'")]
    UnknownSupertype {
        /// The declaration naming the supertype.
        name: String,
        /// The supertype as written.
        supertype: String,
    },

    /// The GlobalId root is not a declared entity.
    #[error("GlobalId root '{0}' is not declared")]
    UnknownGuidRoot(String),

    /// More declarations than a `TypeId` can index.
    #[error("schema has more than {} declarations", u16::MAX)]
    TooManyDeclarations,
}

/// What a declaration describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    /// An entity: its instances are listed in the type index.
    Entity,
    /// A defined type: its instances are kept by id only.
    Type,
}

/// One entity declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    id: TypeId,
    name: String,
    kind: DeclarationKind,
    supertype: Option<TypeId>,
    attributes: Vec<String>,
    carries_guid: bool,
}

impl Declaration {
    /// Index in the schema.
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// Declared name, as written in the schema.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity or defined type.
    #[must_use]
    pub const fn kind(&self) -> DeclarationKind {
        self.kind
    }

    /// Whether instances of this declaration belong in the type index.
    #[must_use]
    pub fn is_entity(&self) -> bool {
        self.kind == DeclarationKind::Entity
    }

    /// Direct supertype, if any.
    #[must_use]
    pub const fn supertype(&self) -> Option<TypeId> {
        self.supertype
    }

    /// All attribute names, inherited ones first.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Number of attributes an instance of this type has.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Position of an attribute by (case-insensitive) name.
    #[must_use]
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.eq_ignore_ascii_case(name))
    }

    /// Whether attribute 0 of instances of this type is a GlobalId.
    #[must_use]
    pub const fn carries_guid(&self) -> bool {
        self.carries_guid
    }
}

/// An immutable set of declarations.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    declarations: Vec<Declaration>,
    by_name: HashMap<String, TypeId>,
    subtypes: Vec<Vec<TypeId>>,
    fingerprint: String,
}

impl Schema {
    /// Starts a new schema.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            entries: Vec::new(),
            guid_root: None,
        }
    }

    /// Schema identifier (e.g. `IFC4X3`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable hash over every declaration. Two schemas with the same fingerprint
    /// assign the same `TypeId` to the same declaration.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// All declarations in index order.
    #[must_use]
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Declaration with this index.
    #[must_use]
    pub fn declaration(&self, id: TypeId) -> Option<&Declaration> {
        self.declarations.get(usize::from(id.0))
    }

    /// Case-insensitive lookup by name.
    #[must_use]
    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(&name.to_ascii_uppercase()).copied()
    }

    /// Whether `ty` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_subtype_of(&self, ty: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(ty);
        while let Some(t) = current {
            if t == ancestor {
                return true;
            }
            current = self.declaration(t).and_then(Declaration::supertype);
        }
        false
    }

    /// `ty` followed by every declaration deriving from it, in index order.
    #[must_use]
    pub fn subtypes_of(&self, ty: TypeId) -> &[TypeId] {
        self.subtypes
            .get(usize::from(ty.0))
            .map_or(&[], Vec::as_slice)
    }
}

struct PendingDeclaration {
    name: String,
    kind: DeclarationKind,
    supertype: Option<String>,
    attributes: Vec<String>,
}

/// Builder for [`Schema`]. Supertypes must be declared before their subtypes.
///
/// ```
/// use spfstore::Schema;
///
/// let schema = Schema::builder("IFC4")
///     .entity("IfcRoot", None, &["GlobalId", "OwnerHistory", "Name", "Description"])
///     .entity("IfcObject", Some("IfcRoot"), &["ObjectType"])
///     .guid_root("IfcRoot")
///     .build()
///     .unwrap();
///
/// let object = schema.type_id("IFCOBJECT").unwrap();
/// assert_eq!(schema.declaration(object).unwrap().attribute_count(), 5);
/// ```
pub struct SchemaBuilder {
    name: String,
    entries: Vec<PendingDeclaration>,
    guid_root: Option<String>,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("static pattern"))
}

impl SchemaBuilder {
    /// Declares an entity. `attributes` are the explicit attributes it adds on top
    /// of those inherited from `supertype`.
    #[must_use]
    pub fn entity(mut self, name: &str, supertype: Option<&str>, attributes: &[&str]) -> Self {
        self.entries.push(PendingDeclaration {
            name: name.to_string(),
            kind: DeclarationKind::Entity,
            supertype: supertype.map(str::to_string),
            attributes: attributes.iter().map(|a| (*a).to_string()).collect(),
        });
        self
    }

    /// Declares a defined type. Its instances hold `attributes` but never enter
    /// the type index, and it cannot be a supertype.
    #[must_use]
    pub fn defined_type(mut self, name: &str, attributes: &[&str]) -> Self {
        self.entries.push(PendingDeclaration {
            name: name.to_string(),
            kind: DeclarationKind::Type,
            supertype: None,
            attributes: attributes.iter().map(|a| (*a).to_string()).collect(),
        });
        self
    }

    /// Marks the declaration whose subtypes carry a GlobalId in attribute 0.
    #[must_use]
    pub fn guid_root(mut self, name: &str) -> Self {
        self.guid_root = Some(name.to_string());
        self
    }

    /// Validates and freezes the schema.
    ///
    /// # Errors
    /// Invalid or duplicate names, unknown supertypes or GlobalId root, or more
    /// declarations than fit in a `TypeId`.
    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.entries.len() > usize::from(u16::MAX) {
            return Err(SchemaError::TooManyDeclarations);
        }

        let mut declarations: Vec<Declaration> = Vec::with_capacity(self.entries.len());
        let mut by_name: HashMap<String, TypeId> = HashMap::with_capacity(self.entries.len());

        for (index, entry) in self.entries.into_iter().enumerate() {
            if !identifier_pattern().is_match(&entry.name) {
                return Err(SchemaError::InvalidName(entry.name));
            }
            let key = entry.name.to_ascii_uppercase();
            if by_name.contains_key(&key) {
                return Err(SchemaError::DuplicateDeclaration(entry.name));
            }

            let supertype = match entry.supertype {
                None => None,
                Some(sup) => match by_name.get(&sup.to_ascii_uppercase()) {
                    Some(id) if declarations[usize::from(id.0)].is_entity() => Some(*id),
                    _ => {
                        return Err(SchemaError::UnknownSupertype {
                            name: entry.name,
                            supertype: sup,
                        })
                    }
                },
            };

            let mut attributes = supertype
                .map(|s: TypeId| declarations[usize::from(s.0)].attributes.clone())
                .unwrap_or_default();
            attributes.extend(entry.attributes);

            #[allow(clippy::cast_possible_truncation)]
            let id = TypeId(index as u16);
            by_name.insert(key, id);
            declarations.push(Declaration {
                id,
                name: entry.name,
                kind: entry.kind,
                supertype,
                attributes,
                carries_guid: false,
            });
        }

        if let Some(root_name) = self.guid_root {
            let root = match by_name.get(&root_name.to_ascii_uppercase()) {
                Some(id) if declarations[usize::from(id.0)].is_entity() => *id,
                _ => return Err(SchemaError::UnknownGuidRoot(root_name)),
            };
            // Supertypes precede subtypes, so one pass in index order suffices.
            for i in 0..declarations.len() {
                let inherited = declarations[i]
                    .supertype
                    .is_some_and(|s| declarations[usize::from(s.0)].carries_guid);
                declarations[i].carries_guid = declarations[i].id == root || inherited;
            }
        }

        let mut subtypes: Vec<Vec<TypeId>> = declarations.iter().map(|d| vec![d.id]).collect();
        for decl in &declarations {
            let mut ancestor = decl.supertype;
            while let Some(a) = ancestor {
                subtypes[usize::from(a.0)].push(decl.id);
                ancestor = declarations[usize::from(a.0)].supertype;
            }
        }

        let fingerprint = fingerprint(&self.name, &declarations);

        Ok(Schema {
            name: self.name,
            declarations,
            by_name,
            subtypes,
            fingerprint,
        })
    }
}

fn fingerprint(name: &str, declarations: &[Declaration]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    for decl in declarations {
        hasher.update(&[0xff]);
        hasher.update(decl.name.as_bytes());
        hasher.update(&[u8::from(decl.is_entity())]);
        hasher.update(&decl.supertype.map_or(u16::MAX, TypeId::index).to_le_bytes());
        hasher.update(&[u8::from(decl.carries_guid)]);
        for attr in &decl.attributes {
            hasher.update(&[0x00]);
            hasher.update(attr.as_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::builder("IFC4")
            .entity("IfcRoot", None, &["GlobalId", "OwnerHistory", "Name", "Description"])
            .entity("IfcObject", Some("IfcRoot"), &["ObjectType"])
            .entity("IfcProduct", Some("IfcObject"), &["ObjectPlacement", "Representation"])
            .entity("IfcWall", Some("IfcProduct"), &["PredefinedType"])
            .entity("IfcCartesianPoint", None, &["Coordinates"])
            .defined_type("IfcLengthMeasure", &["Value"])
            .guid_root("IfcRoot")
            .build()
            .unwrap()
    }

    #[test]
    fn attributes_are_inherited() {
        let schema = sample();
        let wall = schema.declaration(schema.type_id("IfcWall").unwrap()).unwrap();
        assert_eq!(wall.attribute_count(), 8);
        assert_eq!(wall.attributes()[0], "GlobalId");
        assert_eq!(wall.attribute_index("predefinedtype"), Some(7));
    }

    #[test]
    fn guid_flag_follows_inheritance() {
        let schema = sample();
        let wall = schema.type_id("IfcWall").unwrap();
        let point = schema.type_id("IfcCartesianPoint").unwrap();
        assert!(schema.declaration(wall).unwrap().carries_guid());
        assert!(!schema.declaration(point).unwrap().carries_guid());
    }

    #[test]
    fn subtype_queries() {
        let schema = sample();
        let root = schema.type_id("IfcRoot").unwrap();
        let product = schema.type_id("IfcProduct").unwrap();
        let wall = schema.type_id("IfcWall").unwrap();
        let point = schema.type_id("IfcCartesianPoint").unwrap();

        assert!(schema.is_subtype_of(wall, root));
        assert!(schema.is_subtype_of(wall, wall));
        assert!(!schema.is_subtype_of(root, wall));
        assert!(!schema.is_subtype_of(point, root));

        assert_eq!(schema.subtypes_of(product), &[product, wall]);
        assert_eq!(schema.subtypes_of(point), &[point]);
        assert_eq!(schema.subtypes_of(root).len(), 4);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let schema = sample();
        assert_eq!(schema.type_id("ifcwall"), schema.type_id("IFCWALL"));
        assert!(schema.type_id("IfcDoor").is_none());
    }

    #[test]
    fn build_rejects_bad_input() {
        let err = Schema::builder("X").entity("1Bad", None, &[]).build().unwrap_err();
        assert_eq!(err, SchemaError::InvalidName("1Bad".into()));

        let err = Schema::builder("X")
            .entity("A", None, &[])
            .entity("a", None, &[])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateDeclaration(_)));

        let err = Schema::builder("X")
            .entity("B", Some("A"), &[])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownSupertype { .. }));

        let err = Schema::builder("X").guid_root("Nope").build().unwrap_err();
        assert!(matches!(err, SchemaError::UnknownGuidRoot(_)));
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        assert_eq!(sample().fingerprint(), sample().fingerprint());

        let other = Schema::builder("IFC4")
            .entity("IfcRoot", None, &["GlobalId"])
            .build()
            .unwrap();
        assert_ne!(sample().fingerprint(), other.fingerprint());

        let as_entity = Schema::builder("X").entity("Label", None, &["Value"]).build().unwrap();
        let as_type = Schema::builder("X").defined_type("Label", &["Value"]).build().unwrap();
        assert_ne!(as_entity.fingerprint(), as_type.fingerprint());
    }

    #[test]
    fn defined_types_are_not_entities() {
        let schema = sample();
        let measure = schema.type_id("IfcLengthMeasure").unwrap();
        let decl = schema.declaration(measure).unwrap();
        assert_eq!(decl.kind(), DeclarationKind::Type);
        assert!(!decl.carries_guid());
        assert_eq!(decl.attribute_count(), 1);

        let err = Schema::builder("X")
            .defined_type("Label", &["Value"])
            .entity("Tag", Some("Label"), &[])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownSupertype { .. }));
        let err = Schema::builder("X")
            .defined_type("Label", &["Value"])
            .guid_root("Label")
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownGuidRoot(_)));
    }
}
