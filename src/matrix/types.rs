//! Типы матриц и связанные структуры

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{MatmulError, Result};

/// Тип входных матриц для прогона
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MatrixType {
    /// Обе матрицы заполнены случайными числами из [0, 255)
    #[default]
    Random,
    /// A единичная, B случайная
    Identity,
    /// A нулевая, B случайная
    Zeros,
    /// Матрицы заполненные 1 и 2
    OnesAndTwos,
}

/// Квадратная матрица 32-битных беззнаковых чисел, хранение по строкам
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix(Array2<u32>);

impl Matrix {
    pub fn zeros(size: usize) -> Self {
        Self(Array2::zeros((size, size)))
    }

    pub fn identity(size: usize) -> Self {
        Self(Array2::from_shape_fn((size, size), |(i, j)| u32::from(i == j)))
    }

    pub fn filled(size: usize, value: u32) -> Self {
        Self(Array2::from_elem((size, size), value))
    }

    pub fn from_fn(size: usize, f: impl FnMut((usize, usize)) -> u32) -> Self {
        Self(Array2::from_shape_fn((size, size), f))
    }

    /// Строит матрицу из плоского массива по строкам
    pub fn from_row_major(size: usize, values: Vec<u32>) -> Result<Self> {
        Array2::from_shape_vec((size, size), values)
            .map(Self)
            .map_err(|e| MatmulError::config(format!("cannot shape {size}x{size} matrix: {e}")))
    }

    pub fn size(&self) -> usize {
        self.0.nrows()
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.0[[row, col]]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u32) {
        self.0[[row, col]] = value;
    }

    /// Элементы по строкам
    pub fn to_row_major(&self) -> Vec<u32> {
        self.0.iter().copied().collect()
    }

    /// Элементы по столбцам: так B лежит в буфере устройства
    pub fn to_column_major(&self) -> Vec<u32> {
        self.0.t().iter().copied().collect()
    }

    pub fn as_array(&self) -> &Array2<u32> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_major_is_transpose() {
        let m = Matrix::from_row_major(2, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(m.to_row_major(), vec![1, 2, 3, 4]);
        assert_eq!(m.to_column_major(), vec![1, 3, 2, 4]);
    }

    #[test]
    fn from_row_major_checks_length() {
        assert!(Matrix::from_row_major(3, vec![0; 8]).is_err());
    }

    #[test]
    fn identity_has_unit_diagonal() {
        let m = Matrix::identity(3);
        assert_eq!(m.get(1, 1), 1);
        assert_eq!(m.get(1, 2), 0);
    }
}
