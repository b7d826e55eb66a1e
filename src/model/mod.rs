mod conv_norm;
pub mod imagenet;
mod inverted_residual;
pub mod mobilenetv2;
#[cfg(feature = "pretrained")]
pub mod weights;
