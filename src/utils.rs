//! Вспомогательные функции и утилиты

use std::time::{Duration, Instant};

/// Измеряет время выполнения функции
pub fn measure_time<F, T>(f: F) -> (T, std::time::Duration)
where
    F: FnOnce() -> T
{
    let start = Instant::now();
    let result = f();
    let duration = start.elapsed();
    (result, duration)
}

/// Таймер событий: каждая запись меряет интервал от `add` до следующего `add` или `finish`
#[derive(Debug)]
pub struct EventTimer<K> {
    events: Vec<(K, Duration)>,
    open: Option<(K, Instant)>,
}

impl<K> Default for EventTimer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> EventTimer<K> {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            open: None,
        }
    }

    /// Закрывает текущее событие и начинает новое
    pub fn add(&mut self, key: K) {
        self.finish();
        self.open = Some((key, Instant::now()));
    }

    /// Закрывает текущее событие, если оно есть
    pub fn finish(&mut self) {
        if let Some((key, start)) = self.open.take() {
            self.events.push((key, start.elapsed()));
        }
    }

    pub fn current(&self) -> Option<&K> {
        self.open.as_ref().map(|(key, _)| key)
    }

    pub fn events(&self) -> &[(K, Duration)] {
        &self.events
    }

    /// Закрывает открытое событие и отдаёт все замеры
    pub fn into_events(mut self) -> Vec<(K, Duration)> {
        self.finish();
        self.events
    }
}
