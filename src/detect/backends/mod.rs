pub mod scripted;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{ScriptStep, ScriptedBackend};
pub use stub::NullBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
