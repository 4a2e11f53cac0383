pub mod codec;
pub mod config;
pub mod error;
pub mod framer;
pub mod message;
pub mod record;
pub mod sift4;
pub mod url_util;

pub use error::{CoreError, Result};
