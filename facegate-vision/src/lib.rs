pub mod face;
pub mod model;
pub mod pipeline;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use face::{Detection, EMBEDDING_DIM};
pub use model::ModelPaths;
pub use pipeline::{Detector, Pipeline};
pub use video::Camera;
