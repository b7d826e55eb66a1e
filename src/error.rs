use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Empty image upload")]
    EmptyImage,

    #[error("Could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Unexpected model output: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
