pub mod client;
pub mod engine;
pub mod history;
pub mod view;

pub use client::SyncClient;
