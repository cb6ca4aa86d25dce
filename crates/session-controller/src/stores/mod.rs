//! In-memory state services for the signaling core.
//!
//! Each store owns its mapping from typed keys to entities behind a single
//! async mutex, and is injected into handlers through `AppState`. Mutations
//! hold the lock across the whole check-then-write sequence so concurrent
//! callers cannot interleave between the check and the write.

pub mod exchange;
pub mod guest_sessions;
pub mod key_bundles;
pub mod meetings;

pub use exchange::KeybundleExchangeGateway;
pub use guest_sessions::GuestSessionRegistry;
pub use key_bundles::KeyBundleStore;
pub use meetings::MeetingStore;
