pub mod commands;
pub mod events;
pub mod types;

pub use commands::UiCommand;
pub use events::SyncEvent;
pub use types::{
    DeliveryStatus, LocalIdentity, Message, MessageKey, Provenance, User, UserId, ViewSnapshot,
};
