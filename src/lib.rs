//! # spfstore - Entity storage for STEP Physical Files
//!
//! spfstore holds the instances of an exchange-structure document (ISO 10303-21,
//! IFC models and friends) together with the indices needed to work with them:
//! by id, by type (optionally including subtypes), by GlobalId, and by who
//! references whom.
//!
//! ## Core Concepts
//!
//! - **Instance**: a typed record of attribute [`Value`]s identified by `#n`
//! - **Schema**: the declarations instances conform to, with single inheritance
//! - **Inverse index**: for every target, the instances that reference it and
//!   from which attribute
//! - **Backend**: resident ([`MemoryBackend`]) or on disk (`PersistentBackend`,
//!   feature `persistent`); both answer every query identically
//!
//! ## Usage
//!
//! ```rust
//! use spfstore::{EntityStore, InstanceId, Schema, Value};
//!
//! let schema = Schema::builder("IFC_MINI")
//!     .entity("IfcRoot", None, &["GlobalId", "Name"])
//!     .entity("IfcProfileDef", Some("IfcRoot"), &[])
//!     .entity("IfcExtrudedAreaSolid", None, &["SweptArea", "Depth"])
//!     .guid_root("IfcRoot")
//!     .build()
//!     .unwrap();
//! let profile_ty = schema.type_id("IfcProfileDef").unwrap();
//! let solid_ty = schema.type_id("IfcExtrudedAreaSolid").unwrap();
//!
//! let mut store = EntityStore::in_memory(schema);
//!
//! // Decoder order: the solid arrives before the profile it references.
//! let solid = InstanceId::new(10).unwrap();
//! let profile = InstanceId::new(4).unwrap();
//! store.load(solid, solid_ty, vec![Value::Ref(profile), Value::Float(2.5)]).unwrap();
//! store.load(profile, profile_ty, vec![spfstore::new_guid().as_str().into(), Value::Null]).unwrap();
//! store.finish_load().unwrap();
//!
//! let users = store.referencing_instances(profile, None, None).unwrap();
//! assert_eq!(users.collect_ids().unwrap(), vec![solid]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod guid;
pub mod id;
pub mod schema;
pub mod value;

// Storage and the store facade
pub mod cursor;
pub mod options;
pub mod storage;
pub mod store;
pub mod unresolved;

pub use cursor::{IdCursor, TypeCursor};
pub use error::{OpenError, Result, StoreError};
pub use guid::new_guid;
pub use id::{IdAllocator, InstanceId};
pub use options::{BackendChoice, BackendKind, StoreOptions};
pub use schema::{Declaration, DeclarationKind, Schema, SchemaBuilder, SchemaError, TypeId};
pub use storage::{IndexOp, InverseKey, MemoryBackend, StorageBackend, WriteBatch};
#[cfg(feature = "persistent")]
pub use storage::PersistentBackend;
pub use store::{EntityStore, InstancesOfType};
pub use unresolved::{PendingReference, UnresolvedReferences};
pub use value::{Instance, Value};
