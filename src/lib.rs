//! Блочное умножение матриц через широкие слова шины с программной проверкой

pub mod accelerator;
pub mod config;
pub mod error;
pub mod harness;
pub mod matrix;
pub mod utils;

// Реэкспорт основных типов для удобства
pub use config::RunConfig;
pub use error::{MatmulError, Result};
pub use harness::{run, Outcome, Phase, RunReport};
pub use matrix::{Matrix, MatrixType, WideWord};
