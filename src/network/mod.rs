pub mod api;
pub mod connection;
pub mod protocol;
pub mod transport;

pub use api::{ApiClient, ChatApi, HistoryRecord};
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionState};
pub use transport::WebSocketConnector;
