//! Direct message use cases: send, fetch, delete, and the contact sidebar.
mod service;

pub use service::{MessageService, SendMessageRequest, SendOutcome, SidebarUser};
