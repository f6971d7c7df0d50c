//! Типы данных сессии ускорителя

use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Режим доступа ядра к буферу
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Режим отображения буфера в память хоста
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    Read,
    Write,
    ReadWrite,
}

impl MapAccess {
    pub fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Состояние буфера
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Выделен, устройство его не трогает
    Idle,
    /// Отображён в память хоста
    Mapped,
    /// Участвует в незавершённой миграции или запуске ядра
    InFlight,
    /// Последняя операция устройства над ним завершена
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferHandle(pub(crate) usize);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelHandle {
    pub(crate) id: usize,
    pub(crate) name: String,
}

impl KernelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Аргумент ядра
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    Buffer(BufferHandle),
    Scalar(u32),
}

/// Окно хоста в буфер устройства
///
/// Запись в окно попадает в буфер только после `unmap`.
#[derive(Debug)]
pub struct MappedView {
    pub(crate) buffer: BufferHandle,
    pub(crate) access: MapAccess,
    pub(crate) data: Vec<u32>,
}

impl MappedView {
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn access(&self) -> MapAccess {
        self.access
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        &mut self.data
    }
}

/// Незавершённая асинхронная операция устройства
///
/// Расходуется ровно одним вызовом `await_completion`.
#[derive(Debug)]
pub struct CompletionToken {
    pub(crate) id: usize,
    pub(crate) buffers: Vec<BufferHandle>,
    /// Буферы, в которые пишет устройство
    pub(crate) written: Vec<BufferHandle>,
    pub(crate) task: tokio::task::JoinHandle<Result<()>>,
}

impl CompletionToken {
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Точка, в которой симулятор устройства откажет
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Allocate,
    Bind,
    Migrate,
    Submit,
    /// Ядро не сигналит о завершении дольше заданного времени
    Hang(Duration),
}

/// Параметры симулируемого устройства
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Число 32-битных полей в слове шины
    pub word_lanes: usize,
    /// Предел ожидания в `await_completion`
    pub timeout: Duration,
    pub fault: Option<Fault>,
}
