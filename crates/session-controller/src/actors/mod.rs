//! Actor hierarchy for media room management.
//!
//! `RoomManagerActor` supervises one `RoomActor` per active channel. All
//! room state is owned by the actor tasks; the rest of the service talks
//! to them through cloneable handles.

pub mod manager;
pub mod messages;
pub mod metrics;
pub mod room;

pub use manager::RoomManagerHandle;
pub use messages::{JoinResponse, LeaveOutcome, ManagerStatus, RoomStats};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use room::RoomActorHandle;
