pub mod contact;
pub mod credentials;
pub mod cursor;
pub mod events;
pub mod message;
pub mod state;

pub use contact::{Contact, ContactChange};
pub use credentials::{BaseRequest, Credentials};
pub use cursor::SyncCursor;
pub use events::{Event, EventPayload, LoginStatus};
pub use message::{InboundMessage, MessageKind, RawMessage};
pub use state::SessionState;
