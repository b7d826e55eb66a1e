pub mod classifier;
pub mod config;
mod error;
pub mod model;
pub mod server;

pub use classifier::{ImageClassifier, Prediction};
pub use error::{ClassifierError, Result};
