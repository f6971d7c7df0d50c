//! Ошибки конвейера умножения матриц

use std::time::Duration;
use thiserror::Error;

use crate::accelerator::types::{BufferHandle, BufferState};

/// Ошибки, которые конвейер возвращает вызывающему коду
#[derive(Debug, Error)]
pub enum MatmulError {
    /// Неверное соотношение размеров тайла, матрицы или буфера
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Отказ на границе устройства: выделение, привязка аргументов, запуск
    #[error("accelerator error: {0}")]
    Accelerator(String),

    /// Операция над буфером, который сейчас отображён или занят устройством
    #[error("buffer {buffer} is {state:?}, cannot {operation}")]
    InvalidBufferState {
        buffer: BufferHandle,
        state: BufferState,
        operation: &'static str,
    },

    /// Ожидание завершения превысило заданный лимит
    #[error("device did not signal completion within {0:?}")]
    DeviceTimeout(Duration),
}

impl MatmulError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn accelerator(msg: impl Into<String>) -> Self {
        Self::Accelerator(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MatmulError>;
