mod backend;
pub mod backends;
mod result;
mod suppress;

pub use backend::{detect_shared, shared, DetectorBackend, SharedDetector};
pub use backends::{NullBackend, ScriptStep, ScriptedBackend};
pub use result::{coco, Detection};
pub use suppress::{suppress_duplicates, DUPLICATE_IOU_THRESHOLD};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
