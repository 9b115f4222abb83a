// Decode, fingerprint and mutate images
pub mod codec;
pub mod mutate;
pub mod perceptual;

pub use codec::{
    decode_and_normalize, save_payload, write_image_for_path, CanonicalImage, JPEG_QUALITY,
};
pub use mutate::Mutation;
pub use perceptual::{compute_fingerprint, fingerprint_image, Fingerprint, ImageHash};
