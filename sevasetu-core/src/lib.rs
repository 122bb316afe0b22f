pub mod config;
pub mod conversation;
pub mod diagnostics;
pub mod identity;
pub mod protocol;
pub mod ui;

// Keep the public surface small and intentional.
pub use config::*;
pub use conversation::*;
pub use diagnostics::*;
pub use identity::*;
pub use protocol::*;
pub use ui::*;
