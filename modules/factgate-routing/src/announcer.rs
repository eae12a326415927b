//! PU-side presence publishing and the collaboration loop with gateways.
//!
//! A PU announces ANNOUNCING, waits for a gateway to register its routes,
//! then confirms with the state it wants to be in. When a gateway asks for
//! a renewal the PU announces its routes again, caused by the request.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use factgate_common::{Fact, FactKind};

use crate::channel::Channel;
use crate::filter::InterestFilter;
use crate::presence::{
    CollaborationEventType, PresenceAnnouncement, PresenceState, RoutePath, ROUTING_PLAN_VERSION,
};

#[derive(Default)]
struct Announced {
    last: Option<Fact>,
    last_state: Option<PresenceState>,
    /// State to confirm once a gateway registers an ANNOUNCING claim.
    target: Option<PresenceState>,
}

/// Publishes a PU's announcements on the presence channel, chaining each
/// one to the previous so gateways can discard stale deliveries.
pub struct PresenceAnnouncer {
    service_name: String,
    routes: Vec<RoutePath>,
    presence: Arc<dyn Channel>,
    announced: Mutex<Announced>,
}

impl PresenceAnnouncer {
    pub fn new<T, C>(
        service_name: impl Into<String>,
        routes: impl IntoIterator<Item = (T, C)>,
        presence: Arc<dyn Channel>,
    ) -> Self
    where
        T: Into<String>,
        C: Into<String>,
    {
        Self {
            service_name: service_name.into(),
            routes: routes
                .into_iter()
                .map(|(t, c)| RoutePath {
                    event_type: t.into(),
                    channel: c.into(),
                })
                .collect(),
            presence,
            announced: Mutex::new(Announced::default()),
        }
    }

    pub async fn announce(&self, state: PresenceState) -> Result<PresenceAnnouncement> {
        let mut announced = self.announced.lock().await;
        announced.target = Some(match state {
            PresenceState::Announcing => PresenceState::Active,
            other => other,
        });
        let cause = announced.last.clone();
        self.publish(&mut announced, state, cause.as_ref()).await
    }

    pub async fn withdraw(&self) -> Result<PresenceAnnouncement> {
        self.announce(PresenceState::Withdrawn).await
    }

    /// The state of the latest announcement, `UNKNOWN` before the first.
    pub async fn current_state(&self) -> PresenceState {
        self.announced
            .lock()
            .await
            .last_state
            .unwrap_or(PresenceState::Unknown)
    }

    async fn publish(
        &self,
        announced: &mut Announced,
        state: PresenceState,
        cause: Option<&Fact>,
    ) -> Result<PresenceAnnouncement> {
        let announcement = PresenceAnnouncement::build(
            &self.service_name,
            state,
            self.routes
                .iter()
                .map(|r| (r.event_type.as_str(), r.channel.as_str())),
            cause,
        )?;

        self.presence.publish(announcement.fact()).await?;
        info!(
            service = self.service_name.as_str(),
            state = %state,
            routes = self.routes.len(),
            "Presence announced"
        );

        announced.last = Some(announcement.fact().clone());
        announced.last_state = Some(state);
        Ok(announcement)
    }

    /// React to one fact from a gateway's evolution channel. Returns the
    /// announcement published in response, if any.
    pub async fn handle(&self, fact: &Fact) -> Result<Option<PresenceAnnouncement>> {
        match fact.type_name().and_then(CollaborationEventType::parse) {
            Some(CollaborationEventType::PresenceAnnounceRequested) => self.renew(fact).await,
            Some(CollaborationEventType::RoutingPathsRegistered) => self.acknowledge(fact).await,
            _ => Ok(None),
        }
    }

    async fn renew(&self, request: &Fact) -> Result<Option<PresenceAnnouncement>> {
        let mut announced = self.announced.lock().await;
        match announced.last_state {
            None | Some(PresenceState::Withdrawn) => {
                debug!(
                    service = self.service_name.as_str(),
                    "Presence renewal requested while not present, ignored"
                );
                Ok(None)
            }
            Some(_) => {
                info!(
                    service = self.service_name.as_str(),
                    request = %request.identified(),
                    "Presence renewal requested"
                );
                self.publish(&mut announced, PresenceState::Announcing, Some(request))
                    .await
                    .map(Some)
            }
        }
    }

    async fn acknowledge(&self, notification: &Fact) -> Result<Option<PresenceAnnouncement>> {
        let mut announced = self.announced.lock().await;
        let Some(last) = announced.last.clone() else {
            return Ok(None);
        };
        let ours = notification
            .prior()
            .is_some_and(|p| p.entity_id() == last.identified());
        if !ours || announced.last_state != Some(PresenceState::Announcing) {
            return Ok(None);
        }

        info!(
            service = self.service_name.as_str(),
            plan_version = ?notification.specification().value_of(ROUTING_PLAN_VERSION),
            "Routing paths registered"
        );
        let target = announced.target;
        match target {
            Some(state @ (PresenceState::Active | PresenceState::Degraded)) => self
                .publish(&mut announced, state, Some(&last))
                .await
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Subscribe to a gateway's evolution channel now and answer renewal
    /// requests and registrations on a background task.
    pub fn observe(self: Arc<Self>, evolution: Arc<dyn Channel>) -> JoinHandle<()> {
        let mut stream = evolution.subscribe(Arc::new(InterestFilter::for_kinds(&[
            CollaborationEventType::PresenceAnnounceRequested,
            CollaborationEventType::RoutingPathsRegistered,
        ])));
        debug!(
            channel = evolution.name(),
            service = self.service_name.as_str(),
            "Observing routing plan evolution"
        );

        tokio::spawn(async move {
            while let Some(fact) = stream.next().await {
                if let Err(e) = self.handle(&fact).await {
                    error!(error = %e, fact = %fact.identified(), "Failed to answer gateway");
                }
            }
        })
    }
}
