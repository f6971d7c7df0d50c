//! Операции над матрицами

use rand::Rng;
use serde::Serialize;

use super::types::{Matrix, MatrixType};

/// Инициализирует матрицы заданного типа и размера
pub fn initialize_matrices<R: Rng>(matrix_type: MatrixType, size: usize, rng: &mut R) -> (Matrix, Matrix) {
    let random = |rng: &mut R| Matrix::from_fn(size, |_| rng.gen_range(0..255));
    match matrix_type {
        MatrixType::Random => {
            let a = random(rng);
            let b = random(rng);
            (a, b)
        }
        MatrixType::Identity => (Matrix::identity(size), random(rng)),
        MatrixType::Zeros => (Matrix::zeros(size), random(rng)),
        MatrixType::OnesAndTwos => (Matrix::filled(size, 1), Matrix::filled(size, 2)),
    }
}

/// CPU реализация матричного умножения, эталон для проверки
///
/// Тройной цикл с накоплением в `u32` по модулю 2^32, как в ядре.
pub fn cpu_matrix_multiply(a: &Matrix, b: &Matrix) -> Matrix {
    let size = a.size();
    let mut c = Matrix::zeros(size);
    for i in 0..size {
        for j in 0..size {
            let mut sum = 0u32;
            for k in 0..size {
                sum = sum.wrapping_add(a.get(i, k).wrapping_mul(b.get(k, j)));
            }
            c.set(i, j, sum);
        }
    }
    c
}

/// Первое расхождение между результатом устройства и эталоном
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Позиция в плоском массиве по строкам
    pub index: usize,
    pub hardware: u32,
    pub software: u32,
}

/// Сравнивает результаты устройства и CPU, останавливается на первом расхождении
pub fn compare_results(hardware: &Matrix, software: &Matrix) -> Option<Mismatch> {
    hardware
        .as_array()
        .iter()
        .zip(software.as_array().iter())
        .enumerate()
        .find(|(_, (hw, sw))| hw != sw)
        .map(|(index, (&hardware, &software))| Mismatch {
            index,
            hardware,
            software,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn reference_matches_hand_computed_product() {
        let a = Matrix::from_row_major(2, vec![1, 2, 3, 4]).unwrap();
        let b = Matrix::from_row_major(2, vec![5, 6, 7, 8]).unwrap();
        let c = cpu_matrix_multiply(&a, &b);
        assert_eq!(c.to_row_major(), vec![19, 22, 43, 50]);
    }

    #[test]
    fn reference_is_repeatable() {
        let mut rng = StdRng::seed_from_u64(7);
        let (a, b) = initialize_matrices(MatrixType::Random, 8, &mut rng);
        assert_eq!(cpu_matrix_multiply(&a, &b), cpu_matrix_multiply(&a, &b));
    }

    #[test]
    fn reference_wraps_on_overflow() {
        let a = Matrix::filled(2, u32::MAX);
        let b = Matrix::filled(2, 2);
        let c = cpu_matrix_multiply(&a, &b);
        assert_eq!(c.get(0, 0), u32::MAX.wrapping_mul(2).wrapping_mul(2));
    }

    #[test]
    fn random_inputs_stay_below_255() {
        let mut rng = StdRng::seed_from_u64(1);
        let (a, b) = initialize_matrices(MatrixType::Random, 16, &mut rng);
        assert!(a.to_row_major().iter().chain(b.to_row_major().iter()).all(|&v| v < 255));
    }

    #[test]
    fn same_seed_gives_same_inputs() {
        let (a1, b1) = initialize_matrices(MatrixType::Random, 4, &mut StdRng::seed_from_u64(3));
        let (a2, b2) = initialize_matrices(MatrixType::Random, 4, &mut StdRng::seed_from_u64(3));
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
    }

    #[test]
    fn compare_reports_first_divergence() {
        let sw = Matrix::from_row_major(2, vec![1, 2, 3, 4]).unwrap();
        let hw = Matrix::from_row_major(2, vec![1, 9, 3, 8]).unwrap();
        assert_eq!(
            compare_results(&hw, &sw),
            Some(Mismatch {
                index: 1,
                hardware: 9,
                software: 2
            })
        );
        assert_eq!(compare_results(&sw, &sw), None);
    }
}
