//! Content-addressable structural version hashes.
//!
//! A versioned type declares its own fields plus an explicit link to its
//! parent's descriptor. The hash walks that chain, so a structural change
//! anywhere in the ancestry changes the digest of every descendant. Only the
//! shape is hashed, never field values.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept in the short-form hash (hex-encoded to twice as many chars).
pub const VERSION_HASH_BYTES: usize = 16;

/// One declared field: its name and the textual signature of its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub type_signature: &'static str,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, type_signature: &'static str) -> Self {
        Self {
            name,
            type_signature,
        }
    }
}

/// Declared structure of a type, linked to its parent's declaration.
#[derive(Debug)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub fields: &'static [FieldDescriptor],
    pub parent: Option<&'static TypeDescriptor>,
}

impl TypeDescriptor {
    pub const fn root(name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self {
            name,
            fields,
            parent: None,
        }
    }

    pub const fn extending(
        name: &'static str,
        parent: &'static TypeDescriptor,
        fields: &'static [FieldDescriptor],
    ) -> Self {
        Self {
            name,
            fields,
            parent: Some(parent),
        }
    }

    /// Declared fields of this type and all of its ancestors, ancestors first.
    pub fn all_fields(&self) -> Vec<FieldDescriptor> {
        let mut fields = match self.parent {
            Some(parent) => parent.all_fields(),
            None => Vec::new(),
        };
        fields.extend_from_slice(self.fields);
        fields
    }

    /// Ancestry chain starting with this type.
    pub fn lineage(&self) -> Vec<&'static str> {
        let mut names = vec![self.name];
        let mut current = self.parent;
        while let Some(parent) = current {
            names.push(parent.name);
            current = parent.parent;
        }
        names
    }

    /// Textual form fed to the digest: `Name{a:T;b:U}` with fields sorted by name.
    pub fn canonical_form(&self) -> String {
        let mut fields = self.all_fields();
        fields.sort();

        let body = fields
            .iter()
            .map(|f| format!("{}:{}", f.name, f.type_signature))
            .collect::<Vec<_>>()
            .join(";");

        format!("{}{{{}}}", self.name, body)
    }

    pub fn version_hash(&self) -> String {
        version_hash(self)
    }
}

/// SHA-256 over the canonical form, truncated and hex-encoded.
pub fn version_hash(descriptor: &TypeDescriptor) -> String {
    let digest = Sha256::digest(descriptor.canonical_form().as_bytes());
    hex::encode(&digest[..VERSION_HASH_BYTES])
}

/// Types whose structural version can be computed from a declared descriptor.
pub trait Versioned {
    fn descriptor() -> &'static TypeDescriptor;

    fn version_hash() -> String {
        Self::descriptor().version_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static BASE: TypeDescriptor = TypeDescriptor::root(
        "Sample",
        &[
            FieldDescriptor::new("name", "String"),
            FieldDescriptor::new("created_at", "DateTime<Utc>"),
        ],
    );

    static BASE_REORDERED: TypeDescriptor = TypeDescriptor::root(
        "Sample",
        &[
            FieldDescriptor::new("created_at", "DateTime<Utc>"),
            FieldDescriptor::new("name", "String"),
        ],
    );

    static BASE_RETYPED: TypeDescriptor = TypeDescriptor::root(
        "Sample",
        &[
            FieldDescriptor::new("name", "Option<String>"),
            FieldDescriptor::new("created_at", "DateTime<Utc>"),
        ],
    );

    static CHILD: TypeDescriptor =
        TypeDescriptor::extending("Sample", &BASE, &[FieldDescriptor::new("owner", "String")]);

    static EMPTY_CHILD: TypeDescriptor = TypeDescriptor::extending("SampleChild", &BASE, &[]);

    static BASE_WITH_OWNER: TypeDescriptor = TypeDescriptor::root(
        "SampleChild",
        &[
            FieldDescriptor::new("name", "String"),
            FieldDescriptor::new("created_at", "DateTime<Utc>"),
            FieldDescriptor::new("owner", "String"),
        ],
    );

    static GRANDCHILD: TypeDescriptor = TypeDescriptor::extending("Leaf", &CHILD, &[]);

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(BASE.version_hash(), BASE.version_hash());
        assert_eq!(BASE.version_hash().len(), VERSION_HASH_BYTES * 2);
    }

    #[test]
    fn field_order_does_not_matter() {
        assert_eq!(BASE.version_hash(), BASE_REORDERED.version_hash());
    }

    #[test]
    fn field_type_change_changes_hash() {
        assert_ne!(BASE.version_hash(), BASE_RETYPED.version_hash());
    }

    #[test]
    fn subtype_adding_a_field_changes_hash() {
        assert_ne!(BASE.version_hash(), CHILD.version_hash());
    }

    #[test]
    fn inherited_fields_contribute_like_declared_ones() {
        static CHILD_WITH_OWNER: TypeDescriptor = TypeDescriptor::extending(
            "SampleChild",
            &BASE,
            &[FieldDescriptor::new("owner", "String")],
        );
        assert_eq!(
            CHILD_WITH_OWNER.version_hash(),
            BASE_WITH_OWNER.version_hash()
        );
        assert_ne!(EMPTY_CHILD.version_hash(), BASE_WITH_OWNER.version_hash());
    }

    #[test]
    fn canonical_form_walks_the_whole_chain() {
        assert_eq!(
            GRANDCHILD.canonical_form(),
            "Leaf{created_at:DateTime<Utc>;name:String;owner:String}"
        );
        assert_eq!(GRANDCHILD.lineage(), vec!["Leaf", "Sample", "Sample"]);
    }
}
