#![forbid(unsafe_code)]

pub mod cloud;

pub use cloud::PointCloud;

/// A 3×3 symmetric positive-semidefinite covariance of one point.
pub type Covariance = nalgebra::Matrix3<f64>;
