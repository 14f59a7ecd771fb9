mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{DetectorBackend, SharedDetector};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::StubBackend;
pub use registry::{available_backends, build_registry, BackendRegistry};
pub use result::{RawDetection, RipenessLabel};
