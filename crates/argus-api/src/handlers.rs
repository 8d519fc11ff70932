//! HTTP handlers.

pub mod health;
pub mod predict;
pub mod weights;

pub use health::health;
pub use predict::predict;
pub use weights::{list_weights, upload_weight};
