//! Модуль для работы с матрицами
//!
//! Предоставляет:
//! - Типы матриц
//! - Упаковку в широкие слова шины
//! - Блочное ядро умножения и эталонную CPU реализацию

mod types;
pub mod codec;
pub mod operations;
pub mod kernels;

pub use types::{Matrix, MatrixType};
pub use codec::{pack_words, unpack_words, WideWord};
pub use operations::{cpu_matrix_multiply, compare_results, initialize_matrices, Mismatch};
pub use kernels::{multiply_tiled, wide_matmul, TileEngine, KERNEL_NAME};
