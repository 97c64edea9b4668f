//! Credential, session, and token-secret models shared by the executor and event channel.

pub mod credential;
pub mod secret;
pub mod session;

pub use credential::*;
pub use secret::*;
pub use session::*;
