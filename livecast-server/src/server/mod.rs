//! Client session server.

pub mod access;
pub mod housekeeping;
pub mod listener;
pub mod registry;
pub mod session;

pub use access::AllowedHosts;
pub use housekeeping::{Housekeeper, TickReport, CHANNEL_DEBOUNCE};
pub use listener::{Server, ServerConfig, ServerError, ACCEPT_TIMEOUT};
pub use registry::{ClientSession, SessionRegistry};
pub use session::Session;
