//! Capability routing table.
//!
//! Readers load an immutable [`RoutingPlan`] snapshot without locking. The
//! single writer (the routing-table updater) builds a new plan per applied
//! announcement and swaps it in whole.
//!
//! Conflicts between PUs are resolved last-write-wins by processing order.
//! Two PUs may both believe they own a type; only the latest claim routes.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use factgate_common::{Identifier, KernelError, KernelResult};

use crate::presence::{PresenceAnnouncement, PresenceState};

/// Result of a lookup. A miss is an ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Channel(String),
    NoRoute,
}

impl Route {
    pub fn channel(&self) -> Option<&str> {
        match self {
            Route::Channel(c) => Some(c),
            Route::NoRoute => None,
        }
    }

    pub fn is_routed(&self) -> bool {
        matches!(self, Route::Channel(_))
    }
}

/// Registration of one event type to a PU channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingEntry {
    pub event_type: String,
    pub channel: String,
    pub service_name: String,
    pub state: PresenceState,
    pub announcement_id: Identifier,
    pub correlation_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RoutingEntry {
    fn owned_by(&self, service_name: &str, channel: &str) -> bool {
        self.service_name == service_name && self.channel == channel
    }
}

/// Immutable snapshot of the whole table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingPlan {
    version: u64,
    entries: BTreeMap<String, RoutingEntry>,
}

impl RoutingPlan {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entry(&self, event_type: &str) -> Option<&RoutingEntry> {
        self.entries.get(event_type)
    }

    /// All entries, including WITHDRAWN ones kept for audit.
    pub fn entries(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.values()
    }

    pub fn route_for(&self, event_type: &str) -> Route {
        match self.entries.get(event_type) {
            Some(entry) if entry.state.is_routable() => Route::Channel(entry.channel.clone()),
            _ => Route::NoRoute,
        }
    }

    /// Event types that currently route somewhere, sorted.
    pub fn supported_event_types(&self) -> Vec<&str> {
        self.entries
            .values()
            .filter(|e| e.state.is_routable())
            .map(|e| e.event_type.as_str())
            .collect()
    }

    pub fn routes_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state.is_routable())
            .count()
    }
}

/// How one (event type, channel) claim affected the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum RouteChange {
    /// A type with no routable entry now routes.
    Defined,
    /// A routable type now routes to a different channel or PU.
    Reassigned { from_channel: String, from_service: String },
    /// Nothing changed: an identical claim, or a claim that did not apply.
    Unchanged,
    Withdrawn,
    /// An existing entry was marked ACTIVE.
    Confirmed,
    /// An existing entry was marked DEGRADED.
    Degraded,
}

impl RouteChange {
    /// Whether the type → channel mapping changed.
    pub fn changes_routes(&self) -> bool {
        matches!(
            self,
            RouteChange::Defined | RouteChange::Reassigned { .. } | RouteChange::Withdrawn
        )
    }
}

/// One applied transition, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub event_type: String,
    pub channel: String,
    pub service_name: String,
    pub from: PresenceState,
    pub to: PresenceState,
    pub change: RouteChange,
    pub announcement_id: Identifier,
    pub plan_version: u64,
    pub at: DateTime<Utc>,
}

/// Outcome of applying one announcement.
#[derive(Debug, Clone)]
pub struct Registration {
    pub changes: Vec<(String, RouteChange)>,
    pub plan_version: u64,
    /// True when the plan version moved.
    pub plan_changed: bool,
    /// True when the announcement was ignored as a duplicate or as stale.
    pub ignored: bool,
}

/// Announcement ids remembered per PU for duplicate and staleness checks.
const RECENT_ANNOUNCEMENTS_PER_SERVICE: usize = 32;

/// Recently applied announcements of one PU, plus the predecessors they
/// named. Oldest ids are forgotten first.
#[derive(Default)]
struct RecentAnnouncements {
    ids: VecDeque<Identifier>,
}

impl RecentAnnouncements {
    fn contains(&self, id: &Identifier) -> bool {
        self.ids.contains(id)
    }

    fn remember(&mut self, id: Identifier) {
        if self.contains(&id) {
            return;
        }
        if self.ids.len() == RECENT_ANNOUNCEMENTS_PER_SERVICE {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
    }
}

#[derive(Default)]
struct WriterState {
    recent: HashMap<String, RecentAnnouncements>,
    transitions: Vec<Transition>,
}

/// Routing table shared between the updater and dispatch paths.
pub struct RoutingTable {
    plan: ArcSwap<RoutingPlan>,
    writer: Mutex<WriterState>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            plan: ArcSwap::new(Arc::new(RoutingPlan::default())),
            writer: Mutex::new(WriterState::default()),
        }
    }

    /// Consistent snapshot of the current plan.
    pub fn snapshot(&self) -> Arc<RoutingPlan> {
        self.plan.load_full()
    }

    pub fn route_for(&self, event_type: &str) -> Route {
        self.plan.load().route_for(event_type)
    }

    pub fn current_routing_plan_version(&self) -> u64 {
        self.plan.load().version
    }

    /// Every applied transition, oldest first.
    pub fn transitions(&self) -> Vec<Transition> {
        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .transitions
            .clone()
    }

    /// Apply an announcement.
    ///
    /// Re-delivered announcements and announcements a later one already
    /// succeeded are ignored. Each claim is then applied in order:
    /// ANNOUNCING defines or takes over the type, ACTIVE and DEGRADED mark
    /// the claimant's own entry, WITHDRAWN retires it but keeps the record.
    pub fn register_or_update(
        &self,
        announcement: &PresenceAnnouncement,
    ) -> KernelResult<Registration> {
        validate(announcement)?;

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.plan.load_full();
        let id = announcement.identified();

        let seen = writer
            .recent
            .get(announcement.service_name())
            .is_some_and(|recent| recent.contains(id));
        if seen {
            debug!(
                announcement = %id,
                service = announcement.service_name(),
                "Ignoring duplicate or superseded presence announcement"
            );
            return Ok(Registration {
                changes: Vec::new(),
                plan_version: current.version,
                plan_changed: false,
                ignored: true,
            });
        }

        let mut entries = current.entries.clone();
        let mut changes = Vec::with_capacity(announcement.routes().len());
        let mut pending = Vec::new();
        let now = Utc::now();
        let state = announcement.state();
        let service = announcement.service_name();

        for path in announcement.routes() {
            let existing = entries.get(&path.event_type);
            let from = existing.map(|e| e.state).unwrap_or(PresenceState::Unknown);

            let change = match state {
                PresenceState::Announcing => match existing {
                    Some(e) if e.state.is_routable() && e.owned_by(service, &path.channel) => {
                        RouteChange::Unchanged
                    }
                    Some(e) if e.state.is_routable() => RouteChange::Reassigned {
                        from_channel: e.channel.clone(),
                        from_service: e.service_name.clone(),
                    },
                    _ => RouteChange::Defined,
                },
                PresenceState::Active | PresenceState::Degraded | PresenceState::Withdrawn => {
                    match existing {
                        Some(e)
                            if e.owned_by(service, &path.channel)
                                && e.state.can_transition_to(state) =>
                        {
                            match state {
                                _ if e.state == state => RouteChange::Unchanged,
                                PresenceState::Active => RouteChange::Confirmed,
                                PresenceState::Degraded => RouteChange::Degraded,
                                _ => RouteChange::Withdrawn,
                            }
                        }
                        _ => {
                            warn!(
                                event_type = path.event_type.as_str(),
                                channel = path.channel.as_str(),
                                service,
                                state = %state,
                                "Presence claim does not match a live entry of this PU, ignored"
                            );
                            RouteChange::Unchanged
                        }
                    }
                }
                PresenceState::Unknown => RouteChange::Unchanged,
            };

            let applies = match (&change, state) {
                (RouteChange::Unchanged, PresenceState::Announcing) => true,
                (RouteChange::Unchanged, _) => false,
                _ => true,
            };
            if applies {
                let kept_state = match (&change, existing) {
                    // An identical re-announcement refreshes the entry without demoting it.
                    (RouteChange::Unchanged, Some(e)) => e.state,
                    _ => state,
                };
                entries.insert(
                    path.event_type.clone(),
                    RoutingEntry {
                        event_type: path.event_type.clone(),
                        channel: path.channel.clone(),
                        service_name: service.to_string(),
                        state: kept_state,
                        announcement_id: id.clone(),
                        correlation_id: announcement.correlation_id().map(str::to_string),
                        updated_at: now,
                    },
                );
            }
            if change != RouteChange::Unchanged {
                pending.push((path, from, change.clone()));
            }
            changes.push((path.event_type.clone(), change));
        }

        let plan_changed = changes.iter().any(|(_, c)| c.changes_routes());
        let version = if plan_changed {
            current.version + 1
        } else {
            current.version
        };

        for (path, from, change) in pending {
            writer.transitions.push(Transition {
                event_type: path.event_type.clone(),
                channel: path.channel.clone(),
                service_name: service.to_string(),
                from,
                to: state,
                change,
                announcement_id: id.clone(),
                plan_version: version,
                at: now,
            });
        }

        let recent = writer.recent.entry(service.to_string()).or_default();
        if let Some(predecessor) = announcement.predecessor() {
            recent.remember(predecessor.clone());
        }
        recent.remember(id.clone());

        self.plan.store(Arc::new(RoutingPlan { version, entries }));

        if plan_changed {
            info!(
                service,
                state = %state,
                plan_version = version,
                "Routing plan updated"
            );
        }

        Ok(Registration {
            changes,
            plan_version: version,
            plan_changed,
            ignored: false,
        })
    }
}

fn validate(announcement: &PresenceAnnouncement) -> KernelResult<()> {
    if announcement.routes().is_empty() {
        return Err(KernelError::InvalidAnnouncement(
            "event type to channel map is empty".into(),
        ));
    }
    if let Some(path) = announcement
        .routes()
        .iter()
        .find(|p| p.event_type.trim().is_empty() || p.channel.trim().is_empty())
    {
        return Err(KernelError::InvalidAnnouncement(format!(
            "malformed route {:?} -> {:?}",
            path.event_type, path.channel
        )));
    }
    if announcement.state() == PresenceState::Unknown {
        return Err(KernelError::InvalidAnnouncement(
            "UNKNOWN cannot be announced".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announce(service: &str, state: PresenceState, routes: &[(&str, &str)]) -> PresenceAnnouncement {
        PresenceAnnouncement::build(service, state, routes.iter().copied(), None).unwrap()
    }

    #[test]
    fn empty_table_has_no_route() {
        let table = RoutingTable::new();
        assert_eq!(table.route_for("X"), Route::NoRoute);
        assert_eq!(table.current_routing_plan_version(), 0);
    }

    #[test]
    fn identical_reannouncement_is_not_a_plan_change() {
        let table = RoutingTable::new();
        table
            .register_or_update(&announce("pu", PresenceState::Announcing, &[("X", "c1")]))
            .unwrap();
        let again = table
            .register_or_update(&announce("pu", PresenceState::Announcing, &[("X", "c1")]))
            .unwrap();

        assert!(!again.plan_changed);
        assert_eq!(again.changes, vec![("X".to_string(), RouteChange::Unchanged)]);
        assert_eq!(table.current_routing_plan_version(), 1);
    }

    #[test]
    fn active_confirms_without_moving_the_version() {
        let table = RoutingTable::new();
        table
            .register_or_update(&announce("pu", PresenceState::Announcing, &[("X", "c1")]))
            .unwrap();
        let confirmed = table
            .register_or_update(&announce("pu", PresenceState::Active, &[("X", "c1")]))
            .unwrap();

        assert_eq!(confirmed.changes[0].1, RouteChange::Confirmed);
        assert!(!confirmed.plan_changed);
        assert_eq!(table.snapshot().entry("X").unwrap().state, PresenceState::Active);
        assert_eq!(table.route_for("X"), Route::Channel("c1".into()));
    }

    #[test]
    fn active_from_a_stranger_is_ignored() {
        let table = RoutingTable::new();
        table
            .register_or_update(&announce("pu-a", PresenceState::Announcing, &[("X", "c1")]))
            .unwrap();
        let outcome = table
            .register_or_update(&announce("pu-b", PresenceState::Active, &[("X", "c2")]))
            .unwrap();

        assert_eq!(outcome.changes[0].1, RouteChange::Unchanged);
        assert_eq!(table.route_for("X"), Route::Channel("c1".into()));
    }

    #[test]
    fn degraded_entries_still_route() {
        let table = RoutingTable::new();
        table
            .register_or_update(&announce("pu", PresenceState::Announcing, &[("X", "c1")]))
            .unwrap();
        table
            .register_or_update(&announce("pu", PresenceState::Degraded, &[("X", "c1")]))
            .unwrap();
        assert_eq!(table.route_for("X"), Route::Channel("c1".into()));

        let back = table
            .register_or_update(&announce("pu", PresenceState::Active, &[("X", "c1")]))
            .unwrap();
        assert_eq!(back.changes[0].1, RouteChange::Confirmed);
    }

    #[test]
    fn supported_types_exclude_withdrawn_entries() {
        let table = RoutingTable::new();
        table
            .register_or_update(&announce(
                "pu",
                PresenceState::Announcing,
                &[("X", "c1"), ("Y", "c1")],
            ))
            .unwrap();
        table
            .register_or_update(&announce("pu", PresenceState::Withdrawn, &[("Y", "c1")]))
            .unwrap();

        let plan = table.snapshot();
        assert_eq!(plan.supported_event_types(), vec!["X"]);
        assert_eq!(plan.routes_count(), 1);
        assert_eq!(plan.entries().count(), 2);
    }

    #[test]
    fn remembered_announcements_are_bounded_per_service() {
        let table = RoutingTable::new();
        let first = announce("pu", PresenceState::Announcing, &[("X", "c1")]);
        table.register_or_update(&first).unwrap();

        let mut previous = first.fact().clone();
        for _ in 0..100 {
            let next = PresenceAnnouncement::build(
                "pu",
                PresenceState::Announcing,
                [("X", "c1")],
                Some(&previous),
            )
            .unwrap();
            table.register_or_update(&next).unwrap();
            previous = next.into_fact();
        }

        let writer = table.writer.lock().unwrap();
        assert_eq!(writer.recent.len(), 1);
        assert_eq!(writer.recent["pu"].ids.len(), RECENT_ANNOUNCEMENTS_PER_SERVICE);
    }

    #[test]
    fn recent_redelivery_is_still_ignored() {
        let table = RoutingTable::new();
        let a = announce("pu-a", PresenceState::Announcing, &[("X", "c1")]);
        table.register_or_update(&a).unwrap();
        for i in 0..40 {
            let channel = format!("c{i}");
            table
                .register_or_update(&announce("pu-b", PresenceState::Announcing, &[("Y", channel.as_str())]))
                .unwrap();
        }

        assert!(table.register_or_update(&a).unwrap().ignored);
    }

    #[test]
    fn snapshots_are_not_affected_by_later_updates() {
        let table = RoutingTable::new();
        table
            .register_or_update(&announce("pu", PresenceState::Announcing, &[("X", "c1")]))
            .unwrap();
        let before = table.snapshot();

        table
            .register_or_update(&announce("pu", PresenceState::Announcing, &[("X", "c2")]))
            .unwrap();

        assert_eq!(before.route_for("X"), Route::Channel("c1".into()));
        assert_eq!(table.route_for("X"), Route::Channel("c2".into()));
    }
}
