//! Модуль для работы с ускорителем
//!
//! Содержит интерфейс сессии устройства и его программную модель

pub mod session;
pub mod simulated;
pub mod types;

pub use session::AcceleratorSession;
pub use simulated::SimulatedAccelerator;
pub use types::{AccessMode, BufferHandle, BufferState, DeviceConfig, Fault, KernelArg, KernelHandle, MapAccess};
