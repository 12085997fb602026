pub mod config;
pub mod evaluation;
pub mod questions;
pub mod sessions;

pub use self::config::*;
pub use evaluation::*;
pub use questions::*;
pub use sessions::*;
