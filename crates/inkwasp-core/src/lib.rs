pub mod engine;
pub mod prompt;

pub use engine::{CaptureEngine, EngineError};
pub use prompt::{help_reply, menu_reply, suggested_fields};
