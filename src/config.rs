//! Параметры прогона

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MatmulError, Result};
use crate::matrix::codec::DEFAULT_LANES;
use crate::matrix::kernels::check_dimensions;
use crate::matrix::MatrixType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    /// Сторона тайла и ширина слова шины в 32-битных полях
    pub tile_size: usize,
    /// Сторона квадратной матрицы N
    pub matrix_size: usize,
    pub seed: u64,
    /// Предел ожидания завершения операции устройства
    pub timeout_ms: u64,
    pub matrix_type: MatrixType,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_LANES,
            matrix_size: DEFAULT_LANES,
            seed: 42,
            timeout_ms: 5_000,
            matrix_type: MatrixType::Random,
        }
    }
}

impl RunConfig {
    /// Читает конфигурацию из JSON файла; отсутствующие поля берутся по умолчанию
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MatmulError::config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| MatmulError::config(format!("cannot parse {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        check_dimensions(self.matrix_size, self.tile_size)?;
        if u32::try_from(self.matrix_size).is_err() {
            return Err(MatmulError::config(format!(
                "matrix size {} does not fit the 32-bit size argument",
                self.matrix_size
            )));
        }
        self.buffer_bytes()?;
        if self.timeout_ms == 0 {
            return Err(MatmulError::config("timeout must be positive"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Размер одного буфера матрицы в байтах
    pub fn buffer_bytes(&self) -> Result<usize> {
        self.matrix_size
            .checked_mul(self.matrix_size)
            .and_then(|v| v.checked_mul(std::mem::size_of::<u32>()))
            .ok_or_else(|| {
                MatmulError::config(format!(
                    "{n}x{n} matrix buffer does not fit in memory",
                    n = self.matrix_size
                ))
            })
    }
}
