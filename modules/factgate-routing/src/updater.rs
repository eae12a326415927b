//! Routing-table updater: the only writer of the routing table.
//!
//! Owns one subscription to the presence channel. Each announcement is
//! recorded in the event store, applied to the table, and, when the plan
//! version moved, followed by a notification on the evolution channel.
//! On start it asks PUs to re-announce, so a restarted gateway rebuilds its
//! table from live PUs.

use std::sync::Arc;

use anyhow::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use factgate_common::{Attribute, Entity, Fact, FactKind, Identifier, KernelError};
use factgate_events::EventStore;

use crate::channel::Channel;
use crate::filter::InterestFilter;
use crate::presence::{
    CollaborationEventType, PresenceAnnouncement, ROUTING_PLAN_VERSION, SERVICE_NAME,
    SOURCE_CHANNEL_NAME,
};
use crate::table::RoutingTable;

pub struct RoutingTableUpdater {
    service_name: String,
    table: Arc<RoutingTable>,
    store: EventStore,
    presence: Arc<dyn Channel>,
    evolution: Arc<dyn Channel>,
    filter: Arc<InterestFilter>,
}

impl RoutingTableUpdater {
    pub fn new(
        service_name: impl Into<String>,
        table: Arc<RoutingTable>,
        store: EventStore,
        presence: Arc<dyn Channel>,
        evolution: Arc<dyn Channel>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            table,
            store,
            presence,
            evolution,
            filter: Arc::new(InterestFilter::for_kinds(&[
                CollaborationEventType::PresenceAnnounced,
            ])),
        }
    }

    /// The filter guarding the presence subscription.
    pub fn filter(&self) -> Arc<InterestFilter> {
        self.filter.clone()
    }

    /// Subscribe now, request a presence renewal, and process announcements
    /// on a background task until the channel closes or the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        let stream = self.presence.subscribe(self.filter.clone());
        info!(
            channel = self.presence.name(),
            service = self.service_name.as_str(),
            "Routing table updater subscribed"
        );
        tokio::spawn(async move {
            if let Err(e) = self.request_presence().await {
                warn!(error = %e, "Failed to request presence renewal");
            }
            self.run(stream).await
        })
    }

    /// Ask every PU listening on the evolution channel to announce its
    /// routes again. The request is recorded before it is published.
    pub async fn request_presence(&self) -> Result<Fact> {
        let request = Fact::domain_event(CollaborationEventType::PresenceAnnounceRequested.event_type())
            .identifier(Identifier::generate(None))
            .specification(Attribute::new(SERVICE_NAME, self.service_name.as_str())?)
            .specification(Attribute::new(SOURCE_CHANNEL_NAME, self.presence.name())?)
            .build()?;

        let handle = self.store.append(request).await?;
        self.evolution.publish(handle.fact()).await?;
        info!(
            channel = self.evolution.name(),
            service = self.service_name.as_str(),
            "Requested presence renewal"
        );
        Ok(handle.fact().clone())
    }

    async fn run(self, mut stream: BoxStream<'static, Fact>) {
        while let Some(fact) = stream.next().await {
            if let Err(e) = self.handle(&fact).await {
                error!(error = %e, fact = %fact.identified(), "Failed to process presence fact");
            }
        }
        info!(channel = self.presence.name(), "Presence channel closed, updater stopping");
    }

    /// Process one presence fact. Returns the evolution notification when
    /// one was published.
    ///
    /// Malformed announcements are logged and leave the table untouched.
    pub async fn handle(&self, fact: &Fact) -> Result<Option<Fact>> {
        let announcement = match PresenceAnnouncement::from_fact(fact) {
            Ok(a) => a,
            Err(e @ KernelError::InvalidAnnouncement(_)) => {
                warn!(error = %e, fact = %fact.identified(), "Rejected presence announcement");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let handle = self.store.append(announcement.fact().clone()).await?;

        let registration = match self.table.register_or_update(&announcement) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, fact = %fact.identified(), "Rejected presence announcement");
                return Ok(None);
            }
        };
        if !registration.plan_changed {
            return Ok(None);
        }

        let notification = Fact::domain_event(CollaborationEventType::RoutingPathsRegistered.event_type())
            .identified_by(Entity::from_identifiers([
                Identifier::generate(None),
                announcement.identified().clone(),
            ])?)
            .specification(Attribute::new(SERVICE_NAME, self.service_name.as_str())?)
            .specification(Attribute::new(SOURCE_CHANNEL_NAME, self.presence.name())?)
            .specification(Attribute::new(
                ROUTING_PLAN_VERSION,
                registration.plan_version.to_string(),
            )?);

        let recorded = handle.append(notification).await?;
        self.evolution.publish(recorded.fact()).await?;

        info!(
            plan_version = registration.plan_version,
            channel = self.evolution.name(),
            origin = %announcement.identified(),
            "Published routing plan evolution"
        );
        Ok(Some(recorded.fact().clone()))
    }
}
