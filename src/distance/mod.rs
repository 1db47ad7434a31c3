pub mod cache;
pub mod matrix;
pub mod providers;

pub use cache::MatrixCache;
pub use matrix::{obtain_matrix, DistanceMatrix};
