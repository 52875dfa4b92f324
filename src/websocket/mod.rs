pub mod handler;
pub mod message;

pub use message::{ClientFrame, ServerFrame};
