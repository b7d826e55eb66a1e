/// Pre-trained weights metadata.
pub struct Weights {
    pub(super) url: &'static str,
    pub(super) num_classes: usize,
}

#[cfg(feature = "pretrained")]
mod downloader {
    use super::*;
    use burn::data::network::downloader;
    use std::fs::{create_dir_all, File};
    use std::io::{self, Write};
    use std::path::PathBuf;

    impl Weights {
        /// Download the pre-trained weights to the local cache directory.
        ///
        /// The file is fetched once and reused on subsequent calls.
        pub fn download(&self) -> Result<PathBuf, io::Error> {
            // Model cache directory
            let model_dir = dirs::home_dir()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "Could not locate home directory.")
                })?
                .join(".cache")
                .join("mobilenetv2-classifier");

            if !model_dir.exists() {
                create_dir_all(&model_dir)?;
            }

            let file_base_name = self.file_name()?;
            let file_name = model_dir.join(file_base_name);
            if file_name.exists() {
                tracing::debug!(path = %file_name.display(), "Using cached weights");
                return Ok(file_name);
            }

            tracing::info!(url = self.url, "Downloading pre-trained weights");
            let bytes = downloader::download_file_as_bytes(self.url, file_base_name);

            let mut output_file = File::create(&file_name)?;
            output_file.write_all(&bytes)?;

            Ok(file_name)
        }

        fn file_name(&self) -> Result<&'static str, io::Error> {
            match self.url.rsplit_once('/') {
                Some((_, name)) if !name.is_empty() => Ok(name),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Weights URL has no file name: {}", self.url),
                )),
            }
        }
    }

}

pub trait WeightsMeta {
    fn weights(&self) -> Weights;
}

/// MobileNetV2 pre-trained weights.
pub enum MobileNetV2 {
    /// These weights improve upon the results of the original paper with a new training
    /// [recipe](https://pytorch.org/blog/how-to-train-state-of-the-art-models-using-torchvision-latest-primitives).
    /// Top-1 accuracy: 72.154%.
    /// Top-5 accuracy: 90.822%.
    ImageNet1kV2,
}

impl WeightsMeta for MobileNetV2 {
    fn weights(&self) -> Weights {
        let url = match *self {
            MobileNetV2::ImageNet1kV2 => {
                "https://download.pytorch.org/models/mobilenet_v2-7ebf99e0.pth"
            }
        };
        Weights {
            url,
            num_classes: 1000,
        }
    }
}
