mod backend;
mod backends;
mod overlay;
mod result;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::{PrelabeledBackend, TextBackend};
pub(crate) use backends::text::{
    frame_header_count, is_box_line, is_buffer_timeout, is_detection_line,
};
pub use overlay::OverlayConfig;
pub use result::{BoundingBox, Centroid, Detection};
