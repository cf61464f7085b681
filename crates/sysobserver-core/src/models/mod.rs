//! Data models for sysobserver

mod decision;
mod metric;
mod state;
mod status;

pub use decision::*;
pub use metric::*;
pub use state::*;
pub use status::*;
