//! Text protocol parsing and request dispatch (§4.16).

pub mod dispatcher;
pub mod parser;

pub use dispatcher::Dispatcher;
pub use parser::{Command, SimMode};
