//! Text pipelines

pub mod segmentation;

pub use segmentation::Segmentation;
