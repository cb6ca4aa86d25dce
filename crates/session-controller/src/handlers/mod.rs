//! HTTP request handlers.

pub mod admission;
pub mod guest_sessions;
pub mod health;
pub mod keys;
pub mod meetings;

pub use admission::{admit_guest, decline_guest, request_admission};
pub use guest_sessions::{
    delete_session, get_guest_keys, join_with_token, register_guest, update_session,
};
pub use health::health_check;
pub use keys::{
    consume_pre_key, count_pre_keys, delete_device_keys, distribute_sender_key,
    drain_queued_sender_keys, get_guest_keybundle, get_participant_keybundle, replenish_pre_keys,
    rotate_sender_key, store_sender_key, upload_device_keys,
};
pub use meetings::{create_invitation, create_meeting};
