//! Упаковка строк и столбцов в широкие слова шины
//!
//! Широкое слово содержит `m` 32-битных полей. Поле `j` занимает биты
//! `32*j .. 32*j + 31`, младшее поле идёт первым.

use crate::error::{MatmulError, Result};

/// Ширина шины данных в битах при тайле 16
pub const DATA_WIDTH_BITS: usize = 512;

/// Число 32-битных полей в слове шириной `DATA_WIDTH_BITS`
pub const DEFAULT_LANES: usize = DATA_WIDTH_BITS / 32;

/// Широкое слово фиксированной ширины
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideWord {
    lanes: Box<[u32]>,
}

impl WideWord {
    /// Слово из `width` нулевых полей
    pub fn zeroed(width: usize) -> Self {
        Self {
            lanes: vec![0u32; width].into_boxed_slice(),
        }
    }

    /// Упаковывает последовательность: элемент `j` ложится в поле `j`
    pub fn pack(values: &[u32]) -> Self {
        Self {
            lanes: values.into(),
        }
    }

    /// Обратная операция к `pack`
    pub fn unpack(&self) -> Vec<u32> {
        self.lanes.to_vec()
    }

    pub fn width(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane(&self, j: usize) -> u32 {
        self.lanes[j]
    }

    pub fn set_lane(&mut self, j: usize, value: u32) {
        self.lanes[j] = value;
    }

    pub fn lanes(&self) -> &[u32] {
        &self.lanes
    }

    /// Байтовое представление слова в порядке передачи по шине
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.lanes.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Собирает слово из байтов шины; длина должна быть ровно `4 * width`
    pub fn from_le_bytes(bytes: &[u8], width: usize) -> Result<Self> {
        if bytes.len() != width * 4 {
            return Err(MatmulError::config(format!(
                "wide word of {} lanes needs {} bytes, got {}",
                width,
                width * 4,
                bytes.len()
            )));
        }
        let lanes = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect::<Vec<_>>();
        Ok(Self {
            lanes: lanes.into_boxed_slice(),
        })
    }
}

/// Размер слова шириной `width` полей в байтах
pub fn word_bytes(width: usize) -> usize {
    width * std::mem::size_of::<u32>()
}

/// Режет плоский массив на слова по `width` элементов
pub fn pack_words(values: &[u32], width: usize) -> Result<Vec<WideWord>> {
    if width == 0 || values.len() % width != 0 {
        return Err(MatmulError::config(format!(
            "{} values do not split into words of {} lanes",
            values.len(),
            width
        )));
    }
    Ok(values.chunks_exact(width).map(WideWord::pack).collect())
}

/// Склеивает слова обратно в плоский массив
pub fn unpack_words(words: &[WideWord]) -> Vec<u32> {
    words.iter().flat_map(|w| w.lanes().iter().copied()).collect()
}
