//! Identifiers, entities and entity references.
//!
//! Entities are value-identified: two entities are equal when their primary
//! identifiers are equal. Identifier sets are frozen at construction; adding an
//! identifier yields a new entity.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::correlation;
use crate::error::{KernelError, KernelResult};
use crate::version::{FieldDescriptor, TypeDescriptor, Versioned};

/// Name given to generated and mixed-name combined identifiers.
pub const IDENTIFIER_ID: &str = "id";

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// Immutable (name, value) pair naming an entity within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawIdentifier")]
pub struct Identifier {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct RawIdentifier {
    name: String,
    value: String,
}

impl TryFrom<RawIdentifier> for Identifier {
    type Error = KernelError;

    fn try_from(raw: RawIdentifier) -> KernelResult<Self> {
        Identifier::new(raw.name, raw.value)
    }
}

impl Identifier {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> KernelResult<Self> {
        let name = name.into();
        let value = value.into();
        if name.trim().is_empty() {
            return Err(KernelError::invalid_argument("identifier name is required"));
        }
        if value.trim().is_empty() {
            return Err(KernelError::invalid_argument(format!(
                "identifier value is required (name: {name})"
            )));
        }
        Ok(Self { name, value })
    }

    /// Fresh unique identifier, optionally salted.
    pub fn generate(salt: Option<&str>) -> Self {
        Self {
            name: IDENTIFIER_ID.to_string(),
            value: correlation::generate(salt),
        }
    }

    /// Combine several identifiers into one by concatenating their values in the
    /// given order. The shared name is kept when all components agree on it.
    pub fn combine<'a>(ids: impl IntoIterator<Item = &'a Identifier>) -> KernelResult<Self> {
        let mut value = String::new();
        let mut shared_name: Option<&str> = None;
        let mut mixed = false;

        for id in ids {
            value.push_str(&id.value);
            match shared_name {
                None => shared_name = Some(&id.name),
                Some(name) if name != id.name => mixed = true,
                Some(_) => {}
            }
        }

        let name = match shared_name {
            None => {
                return Err(KernelError::invalid_argument(
                    "at least one identifier is required to combine",
                ))
            }
            Some(_) if mixed => IDENTIFIER_ID,
            Some(name) => name,
        };

        // Component values are non-empty, so the concatenation is too.
        Ok(Self {
            name: name.to_string(),
            value,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

static IDENTIFIER_TYPE: TypeDescriptor = TypeDescriptor::root(
    "Identifier",
    &[
        FieldDescriptor::new("name", "String"),
        FieldDescriptor::new("value", "String"),
    ],
);

impl Versioned for Identifier {
    fn descriptor() -> &'static TypeDescriptor {
        &IDENTIFIER_TYPE
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An object owning a non-empty set of unique identifiers and a creation time.
///
/// Identifiers are kept sorted so the combined primary identifier does not
/// depend on insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawEntity")]
pub struct Entity {
    identifiers: Vec<Identifier>,
    #[serde(skip_serializing)]
    primary: Identifier,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawEntity {
    identifiers: Vec<Identifier>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RawEntity> for Entity {
    type Error = KernelError;

    fn try_from(raw: RawEntity) -> KernelResult<Self> {
        Entity::restore(raw.identifiers, raw.created_at)
    }
}

impl Entity {
    /// Entity identified by a single identifier, created now.
    pub fn new(id: Identifier) -> Self {
        Self {
            primary: id.clone(),
            identifiers: vec![id],
            created_at: Utc::now(),
        }
    }

    /// Entity identified by a composite set of identifiers, created now.
    pub fn from_identifiers(ids: impl IntoIterator<Item = Identifier>) -> KernelResult<Self> {
        Self::restore(ids, Utc::now())
    }

    /// Rebuild an entity with a known creation time.
    pub fn restore(
        ids: impl IntoIterator<Item = Identifier>,
        created_at: DateTime<Utc>,
    ) -> KernelResult<Self> {
        let mut identifiers: Vec<Identifier> = ids.into_iter().collect();
        if identifiers.is_empty() {
            return Err(KernelError::invalid_argument(
                "an entity requires at least one identifier",
            ));
        }

        let mut seen = HashSet::with_capacity(identifiers.len());
        for id in &identifiers {
            if !seen.insert(id) {
                return Err(KernelError::invalid_argument(format!(
                    "duplicate identifier {id}"
                )));
            }
        }

        identifiers.sort();
        let primary = match identifiers.as_slice() {
            [only] => only.clone(),
            many => Identifier::combine(many)?,
        };

        Ok(Self {
            identifiers,
            primary,
            created_at,
        })
    }

    /// Read-only view of the identifier set.
    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Primary identifier: the single identifier, or the combination of all of them.
    pub fn identified(&self) -> &Identifier {
        &self.primary
    }

    /// Deep, independent copy of this entity.
    pub fn immutable(&self) -> KernelResult<Self> {
        Self::restore(self.identifiers.iter().cloned(), self.created_at)
            .map_err(|e| KernelError::ImmutabilityFailure(e.to_string()))
    }

    /// New entity carrying one more identifier. The creation time is kept.
    pub fn with_identifier(&self, id: Identifier) -> KernelResult<Self> {
        let mut ids = self.identifiers.clone();
        ids.push(id);
        Self::restore(ids, self.created_at)
    }

    /// Back-reference to this entity, without ownership.
    pub fn reference(&self, entity_type: &str) -> KernelResult<EntityReference> {
        EntityReference::new(self.primary.clone(), entity_type)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.primary == other.primary
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary.hash(state);
    }
}

static ENTITY_TYPE: TypeDescriptor = TypeDescriptor::root(
    "Entity",
    &[
        FieldDescriptor::new("identifiers", "Vec<Identifier>"),
        FieldDescriptor::new("created_at", "DateTime<Utc>"),
    ],
);

impl Versioned for Entity {
    fn descriptor() -> &'static TypeDescriptor {
        &ENTITY_TYPE
    }
}

// ---------------------------------------------------------------------------
// EntityReference
// ---------------------------------------------------------------------------

/// Weak link from a fact to the entity it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    entity_id: Identifier,
    entity_type: String,
    referenced_at: DateTime<Utc>,
}

impl EntityReference {
    pub fn new(entity_id: Identifier, entity_type: impl Into<String>) -> KernelResult<Self> {
        let entity_type = entity_type.into();
        if entity_type.trim().is_empty() {
            return Err(KernelError::invalid_argument(
                "entity reference requires an entity type name",
            ));
        }
        Ok(Self {
            entity_id,
            entity_type,
            referenced_at: Utc::now(),
        })
    }

    pub fn entity_id(&self) -> &Identifier {
        &self.entity_id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn referenced_at(&self) -> DateTime<Utc> {
        self.referenced_at
    }
}

static ENTITY_REFERENCE_TYPE: TypeDescriptor = TypeDescriptor::root(
    "EntityReference",
    &[
        FieldDescriptor::new("entity_id", "Identifier"),
        FieldDescriptor::new("entity_type", "String"),
        FieldDescriptor::new("referenced_at", "DateTime<Utc>"),
    ],
);

impl Versioned for EntityReference {
    fn descriptor() -> &'static TypeDescriptor {
        &ENTITY_REFERENCE_TYPE
    }
}
