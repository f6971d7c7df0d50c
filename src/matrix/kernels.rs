//! Ядро блочного умножения матриц
//!
//! Ядро работает над буферами из широких слов:
//! - `in1`: A по строкам, слово `r * blocks + kb` содержит `A[r][kb*m .. kb*m + m]`
//! - `in2`: B по столбцам, слово `c * blocks + kb` содержит `B[kb*m .. kb*m + m][c]`
//! - `out`: C по строкам, раскладка как у `in1`
//!
//! где `m` ширина слова (размер тайла), `blocks = N / m`.

use super::codec::{pack_words, unpack_words, WideWord};
use super::types::Matrix;
use crate::error::{MatmulError, Result};

/// Имя единственного ядра, которое знает устройство
pub const KERNEL_NAME: &str = "wide_matmul";

/// Блочный умножитель с двумя тайлами локальной памяти
#[derive(Debug, Clone)]
pub struct TileEngine {
    tile: usize,
    /// `a_tile[i * m + k]`
    a_tile: Vec<u32>,
    /// `b_tile[k * m + j]`
    b_tile: Vec<u32>,
}

impl TileEngine {
    pub fn new(tile: usize) -> Result<Self> {
        if tile == 0 {
            return Err(MatmulError::config("tile size must be positive"));
        }
        Ok(Self {
            tile,
            a_tile: vec![0; tile * tile],
            b_tile: vec![0; tile * tile],
        })
    }

    pub fn tile_size(&self) -> usize {
        self.tile
    }

    /// Умножает тайл A (m строк) на тайл B (m столбцов) и возвращает m строк C
    pub fn multiply_tile(&mut self, a_rows: &[WideWord], b_cols: &[WideWord]) -> Result<Vec<WideWord>> {
        let mut acc = vec![0u32; self.tile * self.tile];
        self.accumulate_tile(a_rows, b_cols, &mut acc)?;
        pack_words(&acc, self.tile)
    }

    /// Прибавляет произведение тайлов к `acc` (m*m, по строкам)
    ///
    /// B загружается целиком до первой строки A: каждой строке результата нужен весь тайл B.
    /// Строка A загружается и сразу же даёт строку результата.
    pub fn accumulate_tile(&mut self, a_rows: &[WideWord], b_cols: &[WideWord], acc: &mut [u32]) -> Result<()> {
        let m = self.tile;
        self.check_shape(a_rows, "A")?;
        self.check_shape(b_cols, "B")?;
        if acc.len() != m * m {
            return Err(MatmulError::config(format!(
                "accumulator holds {} values, tile needs {}",
                acc.len(),
                m * m
            )));
        }

        for (j, col) in b_cols.iter().enumerate() {
            for k in 0..m {
                self.b_tile[k * m + j] = col.lane(k);
            }
        }

        for (i, row) in a_rows.iter().enumerate() {
            self.a_tile[i * m..(i + 1) * m].copy_from_slice(row.lanes());
            let a_row = &self.a_tile[i * m..(i + 1) * m];
            for j in 0..m {
                let mut sum = 0u32;
                for (k, &a) in a_row.iter().enumerate() {
                    sum = sum.wrapping_add(a.wrapping_mul(self.b_tile[k * m + j]));
                }
                acc[i * m + j] = acc[i * m + j].wrapping_add(sum);
            }
        }
        Ok(())
    }

    fn check_shape(&self, words: &[WideWord], name: &str) -> Result<()> {
        if words.len() != self.tile || words.iter().any(|w| w.width() != self.tile) {
            return Err(MatmulError::config(format!(
                "tile {name} must be {m} words of {m} lanes",
                m = self.tile
            )));
        }
        Ok(())
    }
}

/// Проверяет, что матрица N×N делится на тайлы m×m
pub fn check_dimensions(size: usize, tile: usize) -> Result<()> {
    if tile == 0 || size == 0 {
        return Err(MatmulError::config(format!(
            "matrix size {size} and tile size {tile} must be positive"
        )));
    }
    if size % tile != 0 {
        return Err(MatmulError::config(format!(
            "matrix size {size} is not a multiple of tile size {tile}"
        )));
    }
    Ok(())
}

/// Ядро устройства: `out = in1 * in2` для матриц `size`×`size`
pub fn wide_matmul(
    engine: &mut TileEngine,
    in1: &[WideWord],
    in2: &[WideWord],
    out: &mut [WideWord],
    size: usize,
) -> Result<()> {
    let m = engine.tile_size();
    check_dimensions(size, m)?;
    let blocks = size / m;
    let words = size * blocks;
    for (name, len) in [("in1", in1.len()), ("in2", in2.len()), ("out", out.len())] {
        if len != words {
            return Err(MatmulError::config(format!(
                "buffer {name} holds {len} words, {size}x{size} matrix needs {words}"
            )));
        }
    }

    let mut a_rows = Vec::with_capacity(m);
    let mut b_cols = Vec::with_capacity(m);
    let mut acc = vec![0u32; m * m];
    for ti in 0..blocks {
        for tj in 0..blocks {
            acc.fill(0);
            for tk in 0..blocks {
                a_rows.clear();
                b_cols.clear();
                for r in 0..m {
                    a_rows.push(in1[(ti * m + r) * blocks + tk].clone());
                    b_cols.push(in2[(tj * m + r) * blocks + tk].clone());
                }
                engine.accumulate_tile(&a_rows, &b_cols, &mut acc)?;
            }
            for (r, row) in acc.chunks_exact(m).enumerate() {
                out[(ti * m + r) * blocks + tj] = WideWord::pack(row);
            }
        }
    }
    Ok(())
}

/// Блочное умножение на стороне хоста: упаковка, ядро, распаковка
pub fn multiply_tiled(a: &Matrix, b: &Matrix, tile: usize) -> Result<Matrix> {
    let size = a.size();
    if b.size() != size {
        return Err(MatmulError::config(format!(
            "cannot multiply {size}x{size} by {n}x{n}",
            n = b.size()
        )));
    }
    check_dimensions(size, tile)?;
    let mut engine = TileEngine::new(tile)?;
    let in1 = pack_words(&a.to_row_major(), tile)?;
    let in2 = pack_words(&b.to_column_major(), tile)?;
    let mut out = vec![WideWord::zeroed(tile); in1.len()];
    wide_matmul(&mut engine, &in1, &in2, &mut out, size)?;
    Matrix::from_row_major(size, unpack_words(&out))
}
