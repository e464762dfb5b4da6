//! Input and batch-file processors

pub mod batch;
pub mod text;
