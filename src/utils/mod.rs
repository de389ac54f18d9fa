//! Utility functions

pub mod data_loader;

pub use data_loader::{
    load_numeric_array, read_npy, save_numpy_array, split_features_target, write_npy, DataLoader,
};
