//! Presence announcements published by processing units (PUs).
//!
//! An announcement is a `DomainEvent` of type
//! `PROCESSING_UNIT_PRESENCE_ANNOUNCED` whose routing paths map each
//! supported event type to the channel the PU listens on.

use std::fmt;

use serde::{Deserialize, Serialize};

use factgate_common::correlation;
use factgate_common::{Attribute, Fact, FactKind, Identifier, KernelError, KernelResult};

pub const SERVICE_NAME: &str = "SERVICE_NAME";
pub const PRESENCE_STATUS: &str = "PRESENCE_STATUS";
pub const SOURCE_CHANNEL_NAME: &str = "SOURCE_CHANNEL_NAME";
pub const ROUTING_PLAN_VERSION: &str = "ROUTING_PLAN_VERSION";

/// Fact types exchanged between PUs and gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollaborationEventType {
    PresenceAnnounced,
    /// A gateway asks every PU to re-announce its routes.
    PresenceAnnounceRequested,
    RoutingPathsRegistered,
}

impl FactKind for CollaborationEventType {
    const ALL: &'static [Self] = &[
        CollaborationEventType::PresenceAnnounced,
        CollaborationEventType::PresenceAnnounceRequested,
        CollaborationEventType::RoutingPathsRegistered,
    ];

    fn name(&self) -> &'static str {
        match self {
            CollaborationEventType::PresenceAnnounced => "PROCESSING_UNIT_PRESENCE_ANNOUNCED",
            CollaborationEventType::PresenceAnnounceRequested => {
                "PROCESSING_UNIT_PRESENCE_ANNOUNCE_REQUESTED"
            }
            CollaborationEventType::RoutingPathsRegistered => {
                "PROCESSING_UNIT_ROUTING_PATHS_REGISTERED"
            }
        }
    }
}

/// Lifecycle of a PU's registration for one event type.
///
/// `UNKNOWN → ANNOUNCING → ACTIVE ⇄ DEGRADED → WITHDRAWN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceState {
    Unknown,
    Announcing,
    Active,
    Degraded,
    Withdrawn,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Unknown => "UNKNOWN",
            PresenceState::Announcing => "ANNOUNCING",
            PresenceState::Active => "ACTIVE",
            PresenceState::Degraded => "DEGRADED",
            PresenceState::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNKNOWN" => Some(PresenceState::Unknown),
            "ANNOUNCING" => Some(PresenceState::Announcing),
            "ACTIVE" => Some(PresenceState::Active),
            "DEGRADED" => Some(PresenceState::Degraded),
            "WITHDRAWN" => Some(PresenceState::Withdrawn),
            _ => None,
        }
    }

    /// ANNOUNCING is always accepted: it starts a fresh registration, even
    /// after WITHDRAWN. Nothing else leaves WITHDRAWN or UNKNOWN.
    pub fn can_transition_to(&self, next: PresenceState) -> bool {
        use PresenceState::*;
        match (self, next) {
            (_, Announcing) => true,
            (_, Unknown) => false,
            (Unknown, _) | (Withdrawn, _) => false,
            (Announcing | Active | Degraded, Active | Degraded | Withdrawn) => true,
        }
    }

    /// Whether an entry in this state may receive new dispatches.
    pub fn is_routable(&self) -> bool {
        matches!(
            self,
            PresenceState::Announcing | PresenceState::Active | PresenceState::Degraded
        )
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (event type, channel) claim of an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutePath {
    pub event_type: String,
    pub channel: String,
}

fn validate_path(event_type: &str, channel: &str) -> KernelResult<()> {
    if event_type.trim().is_empty() {
        return Err(KernelError::InvalidAnnouncement(format!(
            "blank event type for channel '{channel}'"
        )));
    }
    if channel.trim().is_empty() {
        return Err(KernelError::InvalidAnnouncement(format!(
            "blank channel for event type '{event_type}'"
        )));
    }
    Ok(())
}

/// Typed view over a presence-announcement fact.
#[derive(Debug, Clone)]
pub struct PresenceAnnouncement {
    fact: Fact,
    service_name: String,
    state: PresenceState,
    routes: Vec<RoutePath>,
}

impl PresenceAnnouncement {
    /// Build a publishable announcement. Stamps a fresh identity and a
    /// correlation id salted by it; `cause` becomes the prior reference.
    pub fn build<T, C>(
        service_name: &str,
        state: PresenceState,
        routes: impl IntoIterator<Item = (T, C)>,
        cause: Option<&Fact>,
    ) -> KernelResult<Self>
    where
        T: Into<String>,
        C: Into<String>,
    {
        if service_name.trim().is_empty() {
            return Err(KernelError::InvalidAnnouncement(
                "service name is required".into(),
            ));
        }
        if state == PresenceState::Unknown {
            return Err(KernelError::InvalidAnnouncement(
                "UNKNOWN cannot be announced".into(),
            ));
        }

        let routes: Vec<RoutePath> = routes
            .into_iter()
            .map(|(t, c)| RoutePath {
                event_type: t.into(),
                channel: c.into(),
            })
            .collect();
        if routes.is_empty() {
            return Err(KernelError::InvalidAnnouncement(
                "event type to channel map is empty".into(),
            ));
        }

        let id = Identifier::generate(None);
        let correlation_id = correlation::generate(Some(id.value()));

        let mut builder = Fact::domain_event(CollaborationEventType::PresenceAnnounced.event_type())
            .identifier(id)
            .correlation_id(correlation_id)
            .specification(Attribute::new(SERVICE_NAME, service_name)?)
            .specification(Attribute::new(PRESENCE_STATUS, state.as_str())?);
        for path in &routes {
            validate_path(&path.event_type, &path.channel)?;
            builder = builder.routing_path(
                Attribute::new(path.event_type.as_str(), path.channel.as_str())
                    .map_err(|e| KernelError::InvalidAnnouncement(e.to_string()))?,
            );
        }
        if let Some(cause) = cause {
            builder = builder.prior(cause.reference()?);
        }

        let fact = builder.build().map_err(|e| match e {
            KernelError::DuplicateAttribute(name) => {
                KernelError::InvalidAnnouncement(format!("event type '{name}' listed twice"))
            }
            other => other,
        })?;

        Ok(Self {
            fact,
            service_name: service_name.to_string(),
            state,
            routes,
        })
    }

    /// Interpret a fact observed on the presence channel.
    pub fn from_fact(fact: &Fact) -> KernelResult<Self> {
        if fact.is_command()
            || fact.type_name() != Some(CollaborationEventType::PresenceAnnounced.name())
        {
            return Err(KernelError::InvalidAnnouncement(format!(
                "{} of type {:?} is not a presence announcement",
                fact.kind_name(),
                fact.type_name()
            )));
        }

        let spec = fact.specification();
        let service_name = spec
            .value_of(SERVICE_NAME)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| KernelError::InvalidAnnouncement("missing SERVICE_NAME".into()))?
            .to_string();
        let status = spec
            .value_of(PRESENCE_STATUS)
            .ok_or_else(|| KernelError::InvalidAnnouncement("missing PRESENCE_STATUS".into()))?;
        let state = PresenceState::parse(status)
            .filter(|s| *s != PresenceState::Unknown)
            .ok_or_else(|| {
                KernelError::InvalidAnnouncement(format!("unusable PRESENCE_STATUS '{status}'"))
            })?;

        let routes: Vec<RoutePath> = fact
            .routing_paths()
            .iter()
            .map(|a| RoutePath {
                event_type: a.name().to_string(),
                channel: a.value().to_string(),
            })
            .collect();
        if routes.is_empty() {
            return Err(KernelError::InvalidAnnouncement(
                "event type to channel map is empty".into(),
            ));
        }
        for path in &routes {
            validate_path(&path.event_type, &path.channel)?;
        }

        Ok(Self {
            fact: fact.clone(),
            service_name,
            state,
            routes,
        })
    }

    pub fn fact(&self) -> &Fact {
        &self.fact
    }

    pub fn into_fact(self) -> Fact {
        self.fact
    }

    pub fn identified(&self) -> &Identifier {
        self.fact.identified()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.fact.correlation_id()
    }

    /// Announcement this one follows, if the PU chained it.
    pub fn predecessor(&self) -> Option<&Identifier> {
        self.fact.prior().map(|p| p.entity_id())
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn routes(&self) -> &[RoutePath] {
        &self.routes
    }
}
