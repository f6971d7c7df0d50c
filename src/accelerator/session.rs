//! Интерфейс сессии ускорителя
//!
//! Конвейер работает с устройством только через этот трейт, типы рантайма
//! производителя наружу не выходят.

use super::types::*;
use crate::error::Result;

pub trait AcceleratorSession {
    /// Ширина слова шины в 32-битных полях
    fn word_lanes(&self) -> usize;

    fn create_kernel(&mut self, name: &str) -> Result<KernelHandle>;

    /// Выделяет буфер; размер должен быть положительным и кратным слову шины
    fn allocate(&mut self, size_bytes: usize, access: AccessMode) -> Result<BufferHandle>;

    fn bind_argument(&mut self, kernel: &KernelHandle, index: u32, arg: KernelArg) -> Result<()>;

    fn map(&mut self, buffer: BufferHandle, access: MapAccess) -> Result<MappedView>;

    fn unmap(&mut self, buffer: BufferHandle, view: MappedView) -> Result<()>;

    /// Ставит в очередь перенос буферов на устройство и сразу возвращается
    fn migrate_to_device(&mut self, buffers: &[BufferHandle]) -> Result<CompletionToken>;

    /// Ставит ядро в очередь и сразу возвращается
    fn submit(&mut self, kernel: &KernelHandle) -> Result<CompletionToken>;

    /// Блокирует поток до завершения операции или истечения таймаута
    fn await_completion(&mut self, token: CompletionToken) -> Result<()>;

    /// Освобождает буфер; занятый устройством буфер освободить нельзя
    fn release(&mut self, buffer: BufferHandle) -> Result<()>;
}
