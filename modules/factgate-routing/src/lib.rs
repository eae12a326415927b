//! Presence protocol and capability routing.
//!
//! Processing units announce which fact types they handle and on which
//! channel. The gateway folds those announcements into a [`RoutingTable`]
//! and dispatches facts by type.

pub mod announcer;
pub mod channel;
pub mod dispatcher;
pub mod filter;
pub mod presence;
pub mod table;
pub mod updater;

pub use announcer::PresenceAnnouncer;
pub use channel::{Channel, ChannelProvider, MemoryBus, MemoryChannel};
pub use dispatcher::{Dispatch, Dispatcher};
pub use filter::{is_of_interest, InterestFilter};
pub use presence::{CollaborationEventType, PresenceAnnouncement, PresenceState, RoutePath};
pub use table::{Registration, Route, RouteChange, RoutingEntry, RoutingPlan, RoutingTable, Transition};
pub use updater::RoutingTableUpdater;
