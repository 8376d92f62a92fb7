//! MUSH Core - Fundamental types shared by the server crates

mod error;
mod types;

pub use error::*;
pub use types::*;
