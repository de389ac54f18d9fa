//! Model persistence
//!
//! - Enveloped bincode files for any serde object
//! - The preprocessor + model bundle written by the training stage

mod bundle;
mod serializer;

pub use bundle::{ModelBundle, ModelMetadata};
pub use serializer::{from_bytes, load_object, save_object, to_bytes};
