//! Gateway dispatch: route facts to PU channels, holding what cannot be routed yet.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use factgate_common::{Attribute, ConformityViolation, Fact};

use crate::channel::{Channel, ChannelProvider};
use crate::filter::InterestFilter;
use crate::presence::CollaborationEventType;
use crate::table::{Route, RoutingTable};

/// What happened to a dispatched fact.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Published on the routed channel.
    Sent { channel: String },
    /// Held in the backlog for a later retry: no route yet, or the routed
    /// channel refused it.
    Held,
    /// The fact carries no type, or it cannot be held because the backlog
    /// is full. The fact is handed back.
    Rejected(Box<Fact>),
}

enum Attempt {
    Sent(String),
    NoRoute,
    Failed(anyhow::Error),
}

struct Backlog {
    facts: VecDeque<Fact>,
    /// Facts taken out by a retry in progress. They still count against the limit.
    in_flight: usize,
    /// Plan version at the last retry; retries are skipped until it moves.
    retried_at_version: Option<u64>,
}

impl Backlog {
    fn occupied(&self) -> usize {
        self.facts.len() + self.in_flight
    }
}

pub struct Dispatcher {
    table: Arc<RoutingTable>,
    channels: Arc<dyn ChannelProvider>,
    backlog: Mutex<Backlog>,
    backlog_limit: usize,
}

impl Dispatcher {
    pub fn new(
        table: Arc<RoutingTable>,
        channels: Arc<dyn ChannelProvider>,
        backlog_limit: usize,
    ) -> Self {
        Self {
            table,
            channels,
            backlog: Mutex::new(Backlog {
                facts: VecDeque::new(),
                in_flight: 0,
                retried_at_version: None,
            }),
            backlog_limit,
        }
    }

    /// Route a fact. The published copy carries the routing path it took,
    /// replacing any path the fact already had for its type.
    pub async fn dispatch(&self, fact: Fact) -> Dispatch {
        if fact.type_name().is_none() {
            warn!(
                violation = ConformityViolation::UnidentifiedEventType.code(),
                fact = %fact.identified(),
                "Cannot dispatch a fact without a type"
            );
            return Dispatch::Rejected(Box::new(fact));
        }

        match self.try_send(&fact).await {
            Attempt::Sent(channel) => Dispatch::Sent { channel },
            Attempt::NoRoute => self.hold(fact),
            Attempt::Failed(e) => {
                warn!(error = %e, fact = %fact.identified(), "Dispatch failed, holding fact");
                self.hold(fact)
            }
        }
    }

    async fn try_send(&self, fact: &Fact) -> Attempt {
        let Some(event_type) = fact.type_name() else {
            return Attempt::NoRoute;
        };
        let Route::Channel(channel) = self.table.route_for(event_type) else {
            return Attempt::NoRoute;
        };

        match self.publish(fact, event_type, &channel).await {
            Ok(()) => {
                debug!(event_type, channel = channel.as_str(), "Dispatched fact");
                Attempt::Sent(channel)
            }
            Err(e) => Attempt::Failed(e),
        }
    }

    async fn publish(&self, fact: &Fact, event_type: &str, channel: &str) -> Result<()> {
        let routed = fact.with_event_routing_path(Attribute::new(event_type, channel)?);
        self.channels.channel(channel).publish(&routed).await
    }

    fn hold(&self, fact: Fact) -> Dispatch {
        let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
        if backlog.occupied() >= self.backlog_limit {
            warn!(
                fact = %fact.identified(),
                limit = self.backlog_limit,
                "Backlog full, fact rejected"
            );
            return Dispatch::Rejected(Box::new(fact));
        }
        debug!(fact = %fact.identified(), event_type = ?fact.type_name(), "No route, fact held");
        backlog.facts.push_back(fact);
        Dispatch::Held
    }

    /// Facts currently held, including any taken out by a retry in progress.
    pub fn backlog_len(&self) -> usize {
        self.backlog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .occupied()
    }

    /// Re-dispatch held facts in arrival order. Does nothing until the plan
    /// version has moved since the last retry, unless a send failed last
    /// time. Returns how many were sent.
    pub async fn retry_backlog(&self) -> usize {
        let version = self.table.current_routing_plan_version();
        let held: Vec<Fact> = {
            let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
            if backlog.facts.is_empty() || backlog.retried_at_version == Some(version) {
                return 0;
            }
            backlog.retried_at_version = Some(version);
            let held: Vec<Fact> = backlog.facts.drain(..).collect();
            backlog.in_flight += held.len();
            held
        };
        let taken = held.len();

        let mut sent = 0;
        let mut failed = 0;
        let mut still_held = Vec::new();
        for fact in held {
            match self.try_send(&fact).await {
                Attempt::Sent(_) => sent += 1,
                Attempt::NoRoute => still_held.push(fact),
                Attempt::Failed(e) => {
                    warn!(error = %e, fact = %fact.identified(), "Retry failed, fact stays held");
                    failed += 1;
                    still_held.push(fact);
                }
            }
        }

        {
            let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
            backlog.in_flight -= taken;
            // Facts held while retrying arrived later; keep them behind the survivors.
            for fact in still_held.into_iter().rev() {
                backlog.facts.push_front(fact);
            }
            if failed > 0 {
                backlog.retried_at_version = None;
            }
        }

        if sent > 0 || failed > 0 {
            info!(
                sent,
                failed,
                remaining = self.backlog_len(),
                plan_version = version,
                "Backlog retried"
            );
        }
        sent
    }

    /// Dispatch every typed fact arriving on `inbound` on a background task.
    pub fn serve(self: Arc<Self>, inbound: Arc<dyn Channel>) -> JoinHandle<()> {
        let mut facts = inbound.subscribe(Arc::new(InterestFilter::any()));
        info!(channel = inbound.name(), "Dispatching inbound facts");

        tokio::spawn(async move {
            while let Some(fact) = facts.next().await {
                if let Dispatch::Rejected(fact) = self.dispatch(fact).await {
                    warn!(fact = %fact.identified(), "Inbound fact dropped");
                }
            }
        })
    }

    /// Retry the backlog whenever the routing plan evolves.
    pub fn follow_plan(self: Arc<Self>, evolution: Arc<dyn Channel>) -> JoinHandle<()> {
        let mut evolutions = evolution.subscribe(Arc::new(InterestFilter::for_kinds(&[
            CollaborationEventType::RoutingPathsRegistered,
        ])));

        tokio::spawn(async move {
            while evolutions.next().await.is_some() {
                self.retry_backlog().await;
            }
        })
    }
}
