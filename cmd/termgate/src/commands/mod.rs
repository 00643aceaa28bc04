//! CLI commands module.

mod key;
mod lane;
mod run;
mod util;

pub use key::KeyCommand;
pub use lane::LaneCommand;
pub use run::RunCommand;

pub(crate) use util::*;
