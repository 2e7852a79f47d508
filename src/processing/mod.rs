//! Numeric processing module - statistics, smoothing and differentiation
//! shared by the cleaning and feature-engineering stages.

pub mod savgol;
pub mod smoother;
pub mod stats;

pub use savgol::savgol_derivative;
pub use smoother::rts_smooth;
