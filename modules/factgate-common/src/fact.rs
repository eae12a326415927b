//! Immutable fact envelopes: commands and domain events.
//!
//! A fact is built once and never mutated. The `append_*` methods return a new
//! fact so that readers holding the original keep a consistent view.
//! Facts serialize to `serde_json::Value` for channels and the event store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::correlation::{self, CORRELATION_ID};
use crate::error::{KernelError, KernelResult};
use crate::identity::{Entity, EntityReference, Identifier};
use crate::version::{FieldDescriptor, TypeDescriptor, Versioned};

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Named string value attached to a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAttribute")]
pub struct Attribute {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct RawAttribute {
    name: String,
    value: String,
}

impl TryFrom<RawAttribute> for Attribute {
    type Error = KernelError;

    fn try_from(raw: RawAttribute) -> KernelResult<Self> {
        Attribute::new(raw.name, raw.value)
    }
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> KernelResult<Self> {
        let name = name.into();
        let value = value.into();
        if name.trim().is_empty() {
            return Err(KernelError::invalid_argument("attribute name is required"));
        }
        if value.is_empty() {
            return Err(KernelError::invalid_argument(format!(
                "attribute value is required (name: {name})"
            )));
        }
        Ok(Self { name, value })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Ordered attribute set with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Attribute>", into = "Vec<Attribute>")]
pub struct Attributes(Vec<Attribute>);

impl TryFrom<Vec<Attribute>> for Attributes {
    type Error = KernelError;

    fn try_from(attributes: Vec<Attribute>) -> KernelResult<Self> {
        Attributes::from_attributes(attributes)
    }
}

impl From<Attributes> for Vec<Attribute> {
    fn from(attributes: Attributes) -> Self {
        attributes.0
    }
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, failing on the first repeated name.
    pub fn from_attributes(attributes: impl IntoIterator<Item = Attribute>) -> KernelResult<Self> {
        let mut set: Vec<Attribute> = Vec::new();
        for attribute in attributes {
            if set.iter().any(|a| a.name == attribute.name) {
                return Err(KernelError::DuplicateAttribute(attribute.name));
            }
            set.push(attribute);
        }
        Ok(Self(set))
    }

    /// New set with one more attribute. Re-adding an identical attribute is a
    /// no-op; reusing a name with another value fails.
    pub fn with(&self, attribute: Attribute) -> KernelResult<Self> {
        match self.get(&attribute.name) {
            Some(existing) if existing == &attribute => Ok(self.clone()),
            Some(_) => Err(KernelError::DuplicateAttribute(attribute.name)),
            None => {
                let mut set = self.0.clone();
                set.push(attribute);
                Ok(Self(set))
            }
        }
    }

    /// New set where `attribute` takes the place of any attribute of the
    /// same name.
    pub fn replacing(&self, attribute: Attribute) -> Self {
        let mut set = self.0.clone();
        match set.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => set.push(attribute),
        }
        Self(set)
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.0.iter().find(|a| a.name == name)
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.0.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.find(name).map(Attribute::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Event type
// ---------------------------------------------------------------------------

/// Type discriminator of a fact: a name plus an optional version.
///
/// Deserialization is lenient so that malformed facts arriving on a channel
/// can still be inspected and reported; `resolvable_name` is the gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

impl EventType {
    pub fn new(name: impl Into<String>) -> KernelResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(KernelError::invalid_argument("event type name is required"));
        }
        Ok(Self {
            name,
            version: None,
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The type name exactly as carried, when it is usable for dispatch.
    /// Surrounding whitespace is kept so routing and filtering agree.
    pub fn resolvable_name(&self) -> Option<&str> {
        (!self.name.trim().is_empty()).then_some(self.name.as_str())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// Closed set of fact type names owned by one domain.
pub trait FactKind: Copy + Sized + 'static {
    const ALL: &'static [Self];

    fn name(&self) -> &'static str;

    fn event_type(&self) -> EventType {
        EventType {
            name: self.name().to_string(),
            version: None,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Content shared by commands and domain events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactEnvelope {
    identified_by: Entity,
    fact_type: EventType,
    #[serde(default)]
    specification: Attributes,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    routing_paths: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prior: Option<EntityReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<EntityReference>,
    occurred_at: DateTime<Utc>,
}

static FACT_ENVELOPE_TYPE: TypeDescriptor = TypeDescriptor::root(
    "FactEnvelope",
    &[
        FieldDescriptor::new("identified_by", "Entity"),
        FieldDescriptor::new("fact_type", "EventType"),
        FieldDescriptor::new("specification", "Attributes"),
        FieldDescriptor::new("routing_paths", "Attributes"),
        FieldDescriptor::new("correlation_id", "Option<String>"),
        FieldDescriptor::new("prior", "Option<EntityReference>"),
        FieldDescriptor::new("subject", "Option<EntityReference>"),
        FieldDescriptor::new("occurred_at", "DateTime<Utc>"),
    ],
);

/// Structural version of commands.
pub static COMMAND_TYPE: TypeDescriptor =
    TypeDescriptor::extending("Command", &FACT_ENVELOPE_TYPE, &[]);

/// Structural version of domain events; specialised events extend this one.
pub static DOMAIN_EVENT_TYPE: TypeDescriptor =
    TypeDescriptor::extending("DomainEvent", &FACT_ENVELOPE_TYPE, &[]);

impl Versioned for FactEnvelope {
    fn descriptor() -> &'static TypeDescriptor {
        &FACT_ENVELOPE_TYPE
    }
}

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// A command requests a change; a domain event records that one occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "envelope", rename_all = "snake_case")]
pub enum Fact {
    Command(FactEnvelope),
    DomainEvent(FactEnvelope),
}

impl Fact {
    pub fn command(event_type: EventType) -> FactBuilder {
        FactBuilder::new(FactTag::Command, event_type)
    }

    pub fn domain_event(event_type: EventType) -> FactBuilder {
        FactBuilder::new(FactTag::DomainEvent, event_type)
    }

    /// Decode a fact from its wire/stored JSON form.
    pub fn from_payload(payload: &serde_json::Value) -> KernelResult<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }

    pub fn to_payload(&self) -> KernelResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn envelope(&self) -> &FactEnvelope {
        match self {
            Fact::Command(e) | Fact::DomainEvent(e) => e,
        }
    }

    fn rewrap(&self, envelope: FactEnvelope) -> Self {
        match self {
            Fact::Command(_) => Fact::Command(envelope),
            Fact::DomainEvent(_) => Fact::DomainEvent(envelope),
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Fact::Command(_))
    }

    pub fn identified_by(&self) -> &Entity {
        &self.envelope().identified_by
    }

    pub fn identified(&self) -> &Identifier {
        self.envelope().identified_by.identified()
    }

    pub fn fact_type(&self) -> &EventType {
        &self.envelope().fact_type
    }

    /// Dispatchable type name, `None` when the fact carries no usable type.
    pub fn type_name(&self) -> Option<&str> {
        self.envelope().fact_type.resolvable_name()
    }

    pub fn specification(&self) -> &Attributes {
        &self.envelope().specification
    }

    pub fn routing_paths(&self) -> &Attributes {
        &self.envelope().routing_paths
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.envelope().correlation_id.as_deref()
    }

    /// The correlation id as an attribute, for publication alongside a specification.
    pub fn correlation_attribute(&self) -> Option<Attribute> {
        self.correlation_id()
            .and_then(|c| Attribute::new(CORRELATION_ID, c).ok())
    }

    /// Reference to the fact that caused this one.
    pub fn prior(&self) -> Option<&EntityReference> {
        self.envelope().prior.as_ref()
    }

    /// Reference to the entity this fact concerns.
    pub fn subject(&self) -> Option<&EntityReference> {
        self.envelope().subject.as_ref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.envelope().occurred_at
    }

    /// Root of a correlation chain: no causing fact.
    pub fn is_chain_root(&self) -> bool {
        self.envelope().prior.is_none()
    }

    /// Back-reference to this fact, typed by its kind.
    pub fn reference(&self) -> KernelResult<EntityReference> {
        EntityReference::new(self.identified().clone(), self.kind_name())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Fact::Command(_) => "Command",
            Fact::DomainEvent(_) => "DomainEvent",
        }
    }

    /// New fact with one more specification attribute.
    pub fn append_specification(&self, attribute: Attribute) -> KernelResult<Self> {
        let mut envelope = self.envelope().clone();
        envelope.specification = envelope.specification.with(attribute)?;
        Ok(self.rewrap(envelope))
    }

    /// New fact with one more routing path (event type name → channel name).
    pub fn append_event_routing_path(&self, attribute: Attribute) -> KernelResult<Self> {
        let mut envelope = self.envelope().clone();
        envelope.routing_paths = envelope.routing_paths.with(attribute)?;
        Ok(self.rewrap(envelope))
    }

    /// New fact routed along `attribute`, overriding any earlier path for
    /// the same event type.
    pub fn with_event_routing_path(&self, attribute: Attribute) -> Self {
        let mut envelope = self.envelope().clone();
        envelope.routing_paths = envelope.routing_paths.replacing(attribute);
        self.rewrap(envelope)
    }

    /// Deep, independent copy of this fact.
    pub fn immutable(&self) -> KernelResult<Self> {
        let mut envelope = self.envelope().clone();
        envelope.identified_by = envelope.identified_by.immutable()?;
        Ok(self.rewrap(envelope))
    }

    /// Structural version of the fact's kind.
    pub fn type_version(&self) -> String {
        match self {
            Fact::Command(_) => COMMAND_TYPE.version_hash(),
            Fact::DomainEvent(_) => DOMAIN_EVENT_TYPE.version_hash(),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum FactTag {
    Command,
    DomainEvent,
}

/// Builder for facts. Validation happens in `build`.
#[derive(Debug, Clone)]
pub struct FactBuilder {
    tag: FactTag,
    identified_by: Option<Entity>,
    fact_type: EventType,
    specification: Vec<Attribute>,
    routing_paths: Vec<Attribute>,
    correlation_id: Option<String>,
    prior: Option<EntityReference>,
    prior_correlation: Option<String>,
    subject: Option<EntityReference>,
    occurred_at: Option<DateTime<Utc>>,
}

impl FactBuilder {
    fn new(tag: FactTag, fact_type: EventType) -> Self {
        Self {
            tag,
            identified_by: None,
            fact_type,
            specification: Vec::new(),
            routing_paths: Vec::new(),
            correlation_id: None,
            prior: None,
            prior_correlation: None,
            subject: None,
            occurred_at: None,
        }
    }

    pub fn identified_by(mut self, entity: Entity) -> Self {
        self.identified_by = Some(entity);
        self
    }

    pub fn identifier(self, id: Identifier) -> Self {
        self.identified_by(Entity::new(id))
    }

    pub fn specification(mut self, attribute: Attribute) -> Self {
        self.specification.push(attribute);
        self
    }

    pub fn routing_path(mut self, attribute: Attribute) -> Self {
        self.routing_paths.push(attribute);
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Chain this fact to its cause. The cause's correlation id is inherited
    /// unless one is set explicitly.
    pub fn caused_by(mut self, cause: &Fact) -> KernelResult<Self> {
        self.prior = Some(cause.reference()?);
        self.prior_correlation = Some(match cause.correlation_id() {
            Some(c) => c.to_string(),
            None => correlation::generate(Some(cause.identified().value())),
        });
        Ok(self)
    }

    pub fn prior(mut self, reference: EntityReference) -> Self {
        self.prior = Some(reference);
        self
    }

    pub fn subject(mut self, reference: EntityReference) -> Self {
        self.subject = Some(reference);
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn build(self) -> KernelResult<Fact> {
        if self.fact_type.resolvable_name().is_none() {
            return Err(KernelError::invalid_argument("fact type name is required"));
        }
        if matches!(&self.correlation_id, Some(c) if c.is_empty()) {
            return Err(KernelError::invalid_argument(
                "correlation id must not be empty when set",
            ));
        }

        let envelope = FactEnvelope {
            identified_by: self
                .identified_by
                .unwrap_or_else(|| Entity::new(Identifier::generate(None))),
            fact_type: self.fact_type,
            specification: Attributes::from_attributes(self.specification)?,
            routing_paths: Attributes::from_attributes(self.routing_paths)?,
            correlation_id: self.correlation_id.or(self.prior_correlation),
            prior: self.prior,
            subject: self.subject,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        };

        Ok(match self.tag {
            FactTag::Command => Fact::Command(envelope),
            FactTag::DomainEvent => Fact::DomainEvent(envelope),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str, value: &str) -> Attribute {
        Attribute::new(name, value).unwrap()
    }

    fn sample_event() -> Fact {
        Fact::domain_event(EventType::new("SAMPLE_AGGREGATE_CREATED").unwrap())
            .specification(attr("SERVICE_NAME", "accounts"))
            .build()
            .unwrap()
    }

    #[test]
    fn duplicate_attribute_keys_fail_at_construction() {
        let result = Fact::command(EventType::new("CREATE").unwrap())
            .specification(attr("a", "1"))
            .specification(attr("a", "2"))
            .build();
        assert!(matches!(result, Err(KernelError::DuplicateAttribute(name)) if name == "a"));
    }

    #[test]
    fn duplicate_attributes_rejected_on_deserialization() {
        let raw = serde_json::json!([
            {"name": "a", "value": "1"},
            {"name": "a", "value": "2"}
        ]);
        assert!(serde_json::from_value::<Attributes>(raw).is_err());
    }

    #[test]
    fn append_specification_returns_a_new_fact() {
        let original = sample_event();
        let extended = original
            .append_specification(attr("PRESENCE_STATUS", "ACTIVE"))
            .unwrap();

        assert_eq!(original.specification().len(), 1);
        assert_eq!(extended.specification().len(), 2);
        assert_eq!(extended.identified(), original.identified());
        assert!(matches!(extended, Fact::DomainEvent(_)));
    }

    #[test]
    fn append_identical_attribute_is_a_no_op_but_conflict_fails() {
        let original = sample_event();
        let same = original
            .append_specification(attr("SERVICE_NAME", "accounts"))
            .unwrap();
        assert_eq!(same.specification().len(), 1);

        assert!(original
            .append_specification(attr("SERVICE_NAME", "billing"))
            .is_err());
    }

    #[test]
    fn append_routing_path_leaves_original_untouched() {
        let original = sample_event();
        let routed = original
            .append_event_routing_path(attr("CREATE_ACCOUNT", "accounts_in"))
            .unwrap();
        assert!(original.routing_paths().is_empty());
        assert_eq!(
            routed.routing_paths().value_of("CREATE_ACCOUNT"),
            Some("accounts_in")
        );
    }

    #[test]
    fn with_routing_path_overrides_an_earlier_path() {
        let stamped = sample_event()
            .append_event_routing_path(attr("CREATE_ACCOUNT", "old_in"))
            .unwrap();
        let rerouted = stamped.with_event_routing_path(attr("CREATE_ACCOUNT", "accounts_in"));

        assert_eq!(rerouted.routing_paths().len(), 1);
        assert_eq!(
            rerouted.routing_paths().value_of("CREATE_ACCOUNT"),
            Some("accounts_in")
        );
        assert_eq!(stamped.routing_paths().value_of("CREATE_ACCOUNT"), Some("old_in"));
    }

    #[test]
    fn type_name_is_not_trimmed() {
        let fact = Fact::command(EventType::new(" CREATE").unwrap())
            .build()
            .unwrap();
        assert_eq!(fact.type_name(), Some(" CREATE"));
    }

    #[test]
    fn find_is_case_insensitive() {
        let fact = sample_event();
        assert!(fact.specification().get("service_name").is_none());
        assert_eq!(
            fact.specification().value_of("service_name"),
            Some("accounts")
        );
    }

    #[test]
    fn caused_by_inherits_correlation_and_links_prior() {
        let root = Fact::command(EventType::new("CREATE").unwrap())
            .correlation_id("chain-1")
            .build()
            .unwrap();
        assert!(root.is_chain_root());

        let child = Fact::domain_event(EventType::new("CREATED").unwrap())
            .caused_by(&root)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(child.correlation_id(), Some("chain-1"));
        assert_eq!(child.prior().unwrap().entity_id(), root.identified());
        assert_eq!(child.prior().unwrap().entity_type(), "Command");
        assert!(!child.is_chain_root());
    }

    #[test]
    fn uncorrelated_cause_derives_a_salted_correlation() {
        let root = Fact::command(EventType::new("CREATE").unwrap())
            .build()
            .unwrap();
        let child = Fact::domain_event(EventType::new("CREATED").unwrap())
            .caused_by(&root)
            .unwrap()
            .build()
            .unwrap();

        let correlation_id = child.correlation_id().unwrap();
        assert!(correlation::is_salted_with(
            correlation_id,
            root.identified().value()
        ));
    }

    #[test]
    fn payload_round_trip_preserves_the_fact() {
        let fact = sample_event()
            .append_event_routing_path(attr("CREATE_ACCOUNT", "accounts_in"))
            .unwrap();
        let payload = fact.to_payload().unwrap();
        assert_eq!(payload["kind"], "domain_event");

        let decoded = Fact::from_payload(&payload).unwrap();
        assert_eq!(decoded, fact);
        assert_eq!(decoded.specification(), fact.specification());
    }

    #[test]
    fn blank_type_is_rejected_by_builder_but_readable_from_the_wire() {
        let raw = serde_json::json!({
            "kind": "domain_event",
            "envelope": {
                "identified_by": {
                    "identifiers": [{"name": "id", "value": "x-1"}],
                    "created_at": "2024-01-01T00:00:00Z"
                },
                "fact_type": {"name": "  "},
                "occurred_at": "2024-01-01T00:00:00Z"
            }
        });
        let fact = Fact::from_payload(&raw).unwrap();
        assert_eq!(fact.type_name(), None);

        let built = Fact::domain_event(fact.fact_type().clone()).build();
        assert!(matches!(built, Err(KernelError::InvalidArgument(_))));
    }

    #[test]
    fn command_and_event_versions_differ() {
        let command = Fact::command(EventType::new("X").unwrap()).build().unwrap();
        let event = Fact::domain_event(EventType::new("X").unwrap())
            .build()
            .unwrap();
        assert_ne!(command.type_version(), event.type_version());
    }
}
