pub mod api;
pub mod config;
pub mod connection;
pub mod drafts;
pub mod error;
pub mod history;
pub mod render;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod transport;

pub use error::{ChatError, ChatResult};
pub use session::{
    ChatClient, ClientOptions, SessionEvent, SessionPhase, SessionTicket, SessionUpdate,
};
