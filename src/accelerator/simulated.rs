//! Программная модель ускорителя
//!
//! Память устройства хранится словами шины, ядро выполняется на собственном
//! рантайме tokio, асинхронно относительно управляющего потока.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use super::session::AcceleratorSession;
use super::types::*;
use crate::error::{MatmulError, Result};
use crate::matrix::codec::{pack_words, unpack_words, word_bytes, WideWord};
use crate::matrix::kernels::{check_dimensions, wide_matmul, TileEngine, KERNEL_NAME};

/// Позиции аргументов ядра: (in1, in2, out, size)
const ARG_IN1: u32 = 0;
const ARG_IN2: u32 = 1;
const ARG_OUT: u32 = 2;
const ARG_SIZE: u32 = 3;

type DeviceMemory = Arc<Mutex<Vec<WideWord>>>;

struct DeviceBuffer {
    access: AccessMode,
    size_bytes: usize,
    host: Vec<u32>,
    device: DeviceMemory,
    /// Устройство записало данные, которых ещё нет у хоста
    device_newer: bool,
    state: BufferState,
}

struct KernelSlot {
    name: String,
    args: BTreeMap<u32, KernelArg>,
}

pub struct SimulatedAccelerator {
    config: DeviceConfig,
    runtime: Option<Runtime>,
    buffers: Vec<Option<DeviceBuffer>>,
    kernels: Vec<KernelSlot>,
    next_token: usize,
}

impl SimulatedAccelerator {
    /// Создаёт устройство. Вызывать вне рантайма tokio: ожидание блокирует поток.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        if config.word_lanes == 0 {
            return Err(MatmulError::config("device word must have at least one lane"));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sim-device")
            .enable_all()
            .build()
            .map_err(|e| MatmulError::accelerator(format!("failed to start device runtime: {e}")))?;
        info!(
            "simulated device ready: {} lanes ({} bits per word), timeout {:?}",
            config.word_lanes,
            config.word_lanes * 32,
            config.timeout
        );
        Ok(Self {
            config,
            runtime: Some(runtime),
            buffers: Vec::new(),
            kernels: Vec::new(),
            next_token: 0,
        })
    }

    /// Состояние буфера, `None` для освобождённого или чужого дескриптора
    pub fn buffer_state(&self, buffer: BufferHandle) -> Option<BufferState> {
        self.buffers.get(buffer.0)?.as_ref().map(|b| b.state)
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| MatmulError::accelerator("device runtime is shut down"))
    }

    fn fail_if(&self, fault: Fault, what: &str) -> Result<()> {
        if self.config.fault == Some(fault) {
            warn!("injected fault: {what}");
            return Err(MatmulError::accelerator(format!("injected {what} failure")));
        }
        Ok(())
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&DeviceBuffer> {
        self.buffers
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| MatmulError::accelerator(format!("unknown buffer {handle}")))
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut DeviceBuffer> {
        self.buffers
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| MatmulError::accelerator(format!("unknown buffer {handle}")))
    }

    fn kernel(&self, kernel: &KernelHandle) -> Result<&KernelSlot> {
        self.kernels
            .get(kernel.id)
            .filter(|k| k.name == kernel.name)
            .ok_or_else(|| MatmulError::accelerator(format!("unknown kernel {}", kernel.name)))
    }

    /// Буфер свободен для новой операции устройства
    fn ensure_settled(&self, handle: BufferHandle, operation: &'static str) -> Result<()> {
        let state = self.buffer(handle)?.state;
        if matches!(state, BufferState::Mapped | BufferState::InFlight) {
            return Err(MatmulError::InvalidBufferState {
                buffer: handle,
                state,
                operation,
            });
        }
        Ok(())
    }

    fn buffer_arg(&self, slot: &KernelSlot, index: u32) -> Result<BufferHandle> {
        match slot.args.get(&index) {
            Some(KernelArg::Buffer(handle)) => Ok(*handle),
            Some(KernelArg::Scalar(_)) => Err(MatmulError::accelerator(format!(
                "kernel argument {index} must be a buffer"
            ))),
            None => Err(MatmulError::accelerator(format!("kernel argument {index} is not bound"))),
        }
    }

    fn spawn_device_work<F>(&mut self, delay: Option<Duration>, work: F) -> Result<(usize, JoinHandle<Result<()>>)>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let task = self.runtime()?.spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match tokio::task::spawn_blocking(work).await {
                Ok(result) => result,
                Err(e) => Err(MatmulError::accelerator(format!("device task aborted: {e}"))),
            }
        });
        let id = self.next_token;
        self.next_token += 1;
        Ok((id, task))
    }
}

fn poisoned<T>(_: T) -> MatmulError {
    MatmulError::accelerator("device memory lock poisoned")
}

impl AcceleratorSession for SimulatedAccelerator {
    fn word_lanes(&self) -> usize {
        self.config.word_lanes
    }

    fn create_kernel(&mut self, name: &str) -> Result<KernelHandle> {
        if name != KERNEL_NAME {
            return Err(MatmulError::accelerator(format!("kernel {name} is not in the device image")));
        }
        let id = self.kernels.len();
        self.kernels.push(KernelSlot {
            name: name.to_string(),
            args: BTreeMap::new(),
        });
        Ok(KernelHandle {
            id,
            name: name.to_string(),
        })
    }

    fn allocate(&mut self, size_bytes: usize, access: AccessMode) -> Result<BufferHandle> {
        self.fail_if(Fault::Allocate, "allocation")?;
        let lanes = self.config.word_lanes;
        let unit = word_bytes(lanes);
        if size_bytes == 0 || size_bytes % unit != 0 {
            return Err(MatmulError::config(format!(
                "buffer of {size_bytes} bytes is not a whole number of {unit}-byte words"
            )));
        }
        let out_of_memory = |e: std::collections::TryReserveError| MatmulError::accelerator(format!("cannot allocate {size_bytes} bytes: {e}"));
        let mut host = Vec::new();
        host.try_reserve_exact(size_bytes / 4).map_err(out_of_memory)?;
        host.resize(size_bytes / 4, 0);
        let mut device = Vec::new();
        device.try_reserve_exact(size_bytes / unit).map_err(out_of_memory)?;
        device.resize(size_bytes / unit, WideWord::zeroed(lanes));

        let handle = BufferHandle(self.buffers.len());
        self.buffers.push(Some(DeviceBuffer {
            access,
            size_bytes,
            host,
            device: Arc::new(Mutex::new(device)),
            device_newer: false,
            state: BufferState::Idle,
        }));
        debug!("allocated buffer {handle}: {size_bytes} bytes, {access:?}");
        Ok(handle)
    }

    fn bind_argument(&mut self, kernel: &KernelHandle, index: u32, arg: KernelArg) -> Result<()> {
        self.fail_if(Fault::Bind, "argument binding")?;
        self.kernel(kernel)?;
        if index > ARG_SIZE {
            return Err(MatmulError::accelerator(format!(
                "kernel {} has no argument {index}",
                kernel.name
            )));
        }
        if let KernelArg::Buffer(handle) = arg {
            self.buffer(handle)?;
        }
        self.kernels[kernel.id].args.insert(index, arg);
        debug!("bound argument {index} of {}: {arg:?}", kernel.name);
        Ok(())
    }

    fn map(&mut self, buffer: BufferHandle, access: MapAccess) -> Result<MappedView> {
        self.ensure_settled(buffer, "map")?;
        let buf = self.buffer_mut(buffer)?;
        if access.reads() && buf.device_newer {
            let words = buf.device.lock().map_err(poisoned)?;
            buf.host = unpack_words(&words);
            drop(words);
            buf.device_newer = false;
        }
        buf.state = BufferState::Mapped;
        Ok(MappedView {
            buffer,
            access,
            data: buf.host.clone(),
        })
    }

    fn unmap(&mut self, buffer: BufferHandle, view: MappedView) -> Result<()> {
        if view.buffer != buffer {
            return Err(MatmulError::accelerator(format!(
                "view of buffer {} cannot unmap buffer {buffer}",
                view.buffer
            )));
        }
        let buf = self.buffer_mut(buffer)?;
        if buf.state != BufferState::Mapped {
            return Err(MatmulError::InvalidBufferState {
                buffer,
                state: buf.state,
                operation: "unmap",
            });
        }
        if view.access.writes() {
            if view.data.len() != buf.host.len() {
                return Err(MatmulError::config(format!(
                    "view of {} values cannot commit into buffer of {} values",
                    view.data.len(),
                    buf.host.len()
                )));
            }
            buf.host = view.data;
            // теперь актуальна копия хоста
            buf.device_newer = false;
        }
        buf.state = BufferState::Idle;
        Ok(())
    }

    fn migrate_to_device(&mut self, buffers: &[BufferHandle]) -> Result<CompletionToken> {
        self.fail_if(Fault::Migrate, "migration")?;
        let lanes = self.config.word_lanes;
        let mut transfers = Vec::with_capacity(buffers.len());
        for &handle in buffers {
            self.ensure_settled(handle, "migrate")?;
            let buf = self.buffer(handle)?;
            transfers.push((Arc::clone(&buf.device), pack_words(&buf.host, lanes)?));
        }
        for &handle in buffers {
            self.buffer_mut(handle)?.state = BufferState::InFlight;
        }
        let (id, task) = self.spawn_device_work(None, move || {
            for (device, words) in transfers {
                *device.lock().map_err(poisoned)? = words;
            }
            Ok(())
        })?;
        debug!("migration #{id} queued for {} buffers", buffers.len());
        Ok(CompletionToken {
            id,
            buffers: buffers.to_vec(),
            written: Vec::new(),
            task,
        })
    }

    fn submit(&mut self, kernel: &KernelHandle) -> Result<CompletionToken> {
        self.fail_if(Fault::Submit, "kernel submission")?;
        let slot = self.kernel(kernel)?;
        let in1 = self.buffer_arg(slot, ARG_IN1)?;
        let in2 = self.buffer_arg(slot, ARG_IN2)?;
        let out = self.buffer_arg(slot, ARG_OUT)?;
        let size = match slot.args.get(&ARG_SIZE) {
            Some(KernelArg::Scalar(size)) => *size as usize,
            _ => return Err(MatmulError::accelerator("kernel argument 3 must be the size scalar")),
        };

        let lanes = self.config.word_lanes;
        check_dimensions(size, lanes)?;
        let expected = size
            .checked_mul(size)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| MatmulError::config(format!("{size}x{size} matrix does not fit in memory")))?;
        for handle in [in1, in2, out] {
            self.ensure_settled(handle, "submit")?;
            let buf = self.buffer(handle)?;
            if buf.size_bytes != expected {
                return Err(MatmulError::config(format!(
                    "buffer {handle} holds {} bytes, {size}x{size} matrix needs {expected}",
                    buf.size_bytes
                )));
            }
        }
        for (handle, forbidden) in [(in1, AccessMode::WriteOnly), (in2, AccessMode::WriteOnly), (out, AccessMode::ReadOnly)] {
            if self.buffer(handle)?.access == forbidden {
                return Err(MatmulError::accelerator(format!(
                    "buffer {handle} is {forbidden:?} and cannot serve as this kernel argument"
                )));
            }
        }

        let a = Arc::clone(&self.buffer(in1)?.device);
        let b = Arc::clone(&self.buffer(in2)?.device);
        let c = Arc::clone(&self.buffer(out)?.device);
        let mut touched = vec![in1, in2, out];
        touched.sort_unstable();
        touched.dedup();
        for &handle in &touched {
            self.buffer_mut(handle)?.state = BufferState::InFlight;
        }

        let delay = match self.config.fault {
            Some(Fault::Hang(d)) => Some(d),
            _ => None,
        };
        let (id, task) = self.spawn_device_work(delay, move || {
            let a = a.lock().map_err(poisoned)?.clone();
            let b = b.lock().map_err(poisoned)?.clone();
            let mut engine = TileEngine::new(lanes)?;
            let mut c = c.lock().map_err(poisoned)?;
            wide_matmul(&mut engine, &a, &b, &mut c, size)
        })?;
        info!("kernel {} submitted as #{id}, size {size}", kernel.name);
        Ok(CompletionToken {
            id,
            buffers: touched,
            written: vec![out],
            task,
        })
    }

    /// После таймаута буферы операции остаются `InFlight` до конца сессии:
    /// устройство может ещё писать в них, поэтому `map`, `release` и новые
    /// запуски с ними отклоняются.
    fn await_completion(&mut self, token: CompletionToken) -> Result<()> {
        let timeout = self.config.timeout;
        let CompletionToken {
            id,
            buffers,
            written,
            task,
        } = token;
        let outcome = self
            .runtime()?
            .block_on(async move { tokio::time::timeout(timeout, task).await });

        let result = match outcome {
            Err(_) => {
                warn!("operation #{id} did not complete within {timeout:?}");
                return Err(MatmulError::DeviceTimeout(timeout));
            }
            Ok(Err(e)) => Err(MatmulError::accelerator(format!("device task #{id} failed: {e}"))),
            Ok(Ok(result)) => result,
        };

        let settled = if result.is_ok() { BufferState::Ready } else { BufferState::Idle };
        for handle in buffers {
            let buf = self.buffer_mut(handle)?;
            buf.state = settled;
            buf.device_newer = result.is_ok() && written.contains(&handle);
        }
        debug!("operation #{id} completed: {}", if result.is_ok() { "ok" } else { "error" });
        result
    }

    fn release(&mut self, buffer: BufferHandle) -> Result<()> {
        self.ensure_settled(buffer, "release")?;
        if let Some(slot) = self.buffers.get_mut(buffer.0) {
            *slot = None;
        }
        Ok(())
    }
}

impl Drop for SimulatedAccelerator {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(lanes: usize, fault: Option<Fault>) -> SimulatedAccelerator {
        SimulatedAccelerator::new(DeviceConfig {
            word_lanes: lanes,
            timeout: Duration::from_secs(5),
            fault,
        })
        .unwrap()
    }

    #[test]
    fn allocate_rejects_partial_words() {
        let mut dev = device(4, None);
        assert!(matches!(
            dev.allocate(20, AccessMode::ReadOnly),
            Err(MatmulError::Configuration(_))
        ));
        assert!(matches!(dev.allocate(0, AccessMode::ReadOnly), Err(MatmulError::Configuration(_))));
        assert!(dev.allocate(32, AccessMode::ReadOnly).is_ok());
    }

    #[test]
    fn unsatisfiable_allocation_is_an_accelerator_error() {
        let mut dev = device(16, None);
        assert!(matches!(
            dev.allocate(1usize << 50, AccessMode::ReadOnly),
            Err(MatmulError::Accelerator(_))
        ));
        assert!(dev.allocate(64, AccessMode::ReadOnly).is_ok());
    }

    #[test]
    fn unknown_kernel_is_an_accelerator_error() {
        let mut dev = device(4, None);
        assert!(matches!(dev.create_kernel("vadd"), Err(MatmulError::Accelerator(_))));
    }

    #[test]
    fn mapped_buffer_cannot_be_mapped_or_migrated() {
        let mut dev = device(4, None);
        let buf = dev.allocate(64, AccessMode::ReadOnly).unwrap();
        let view = dev.map(buf, MapAccess::Write).unwrap();
        assert!(matches!(
            dev.map(buf, MapAccess::Read),
            Err(MatmulError::InvalidBufferState { state: BufferState::Mapped, .. })
        ));
        assert!(dev.migrate_to_device(&[buf]).is_err());
        dev.unmap(buf, view).unwrap();
        assert_eq!(dev.buffer_state(buf), Some(BufferState::Idle));
    }

    #[test]
    fn in_flight_buffer_rejects_operations_until_awaited() {
        let mut dev = device(4, None);
        let buf = dev.allocate(64, AccessMode::ReadOnly).unwrap();
        let token = dev.migrate_to_device(&[buf]).unwrap();
        assert_eq!(dev.buffer_state(buf), Some(BufferState::InFlight));
        assert!(matches!(
            dev.map(buf, MapAccess::Write),
            Err(MatmulError::InvalidBufferState { state: BufferState::InFlight, .. })
        ));
        assert!(dev.release(buf).is_err());
        dev.await_completion(token).unwrap();
        assert_eq!(dev.buffer_state(buf), Some(BufferState::Ready));
        dev.release(buf).unwrap();
        assert_eq!(dev.buffer_state(buf), None);
    }

    #[test]
    fn unmap_without_map_is_rejected() {
        let mut dev = device(4, None);
        let buf = dev.allocate(64, AccessMode::ReadWrite).unwrap();
        let view = MappedView {
            buffer: buf,
            access: MapAccess::Write,
            data: vec![0; 16],
        };
        assert!(dev.unmap(buf, view).is_err());
    }

    #[test]
    fn kernel_runs_end_to_end() {
        let mut dev = device(2, None);
        let kernel = dev.create_kernel(KERNEL_NAME).unwrap();
        let a = dev.allocate(16, AccessMode::ReadOnly).unwrap();
        let b = dev.allocate(16, AccessMode::ReadOnly).unwrap();
        let c = dev.allocate(16, AccessMode::ReadWrite).unwrap();
        for (i, arg) in [KernelArg::Buffer(a), KernelArg::Buffer(b), KernelArg::Buffer(c), KernelArg::Scalar(2)]
            .into_iter()
            .enumerate()
        {
            dev.bind_argument(&kernel, i as u32, arg).unwrap();
        }

        let mut view = dev.map(a, MapAccess::Write).unwrap();
        view.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
        dev.unmap(a, view).unwrap();
        // B = [[5,6],[7,8]] по столбцам
        let mut view = dev.map(b, MapAccess::Write).unwrap();
        view.as_mut_slice().copy_from_slice(&[5, 7, 6, 8]);
        dev.unmap(b, view).unwrap();

        let token = dev.migrate_to_device(&[a, b]).unwrap();
        dev.await_completion(token).unwrap();
        let token = dev.submit(&kernel).unwrap();
        dev.await_completion(token).unwrap();

        let view = dev.map(c, MapAccess::Read).unwrap();
        assert_eq!(view.as_slice(), &[19, 22, 43, 50]);
        dev.unmap(c, view).unwrap();
    }

    fn bound_kernel(dev: &mut SimulatedAccelerator, a: BufferHandle, b: BufferHandle, c: BufferHandle, size: u32) -> KernelHandle {
        let kernel = dev.create_kernel(KERNEL_NAME).unwrap();
        for (i, arg) in [KernelArg::Buffer(a), KernelArg::Buffer(b), KernelArg::Buffer(c), KernelArg::Scalar(size)]
            .into_iter()
            .enumerate()
        {
            dev.bind_argument(&kernel, i as u32, arg).unwrap();
        }
        kernel
    }

    #[test]
    fn host_write_after_kernel_wins_over_device_copy() {
        let mut dev = device(2, None);
        let a = dev.allocate(16, AccessMode::ReadOnly).unwrap();
        let c = dev.allocate(16, AccessMode::ReadWrite).unwrap();
        let kernel = bound_kernel(&mut dev, a, a, c, 2);
        let token = dev.submit(&kernel).unwrap();
        dev.await_completion(token).unwrap();

        let mut view = dev.map(c, MapAccess::Write).unwrap();
        view.as_mut_slice().copy_from_slice(&[7, 7, 7, 7]);
        dev.unmap(c, view).unwrap();

        let view = dev.map(c, MapAccess::Read).unwrap();
        assert_eq!(view.as_slice(), &[7, 7, 7, 7]);
        dev.unmap(c, view).unwrap();
    }

    #[test]
    fn output_aliasing_an_input_is_tracked_once() {
        let mut dev = device(2, None);
        let a = dev.allocate(16, AccessMode::ReadWrite).unwrap();
        let b = dev.allocate(16, AccessMode::ReadOnly).unwrap();
        let kernel = bound_kernel(&mut dev, a, b, a, 2);
        let token = dev.submit(&kernel).unwrap();
        assert_eq!(token.buffers, vec![a, b]);
        assert_eq!(token.written, vec![a]);
        dev.await_completion(token).unwrap();
        assert_eq!(dev.buffer_state(a), Some(BufferState::Ready));
        assert_eq!(dev.buffer_state(b), Some(BufferState::Ready));
    }

    #[test]
    fn oversized_size_scalar_is_a_configuration_error() {
        let mut dev = device(16, None);
        let a = dev.allocate(64, AccessMode::ReadOnly).unwrap();
        let c = dev.allocate(64, AccessMode::ReadWrite).unwrap();
        let kernel = bound_kernel(&mut dev, a, a, c, 4_294_967_280);
        assert!(matches!(dev.submit(&kernel), Err(MatmulError::Configuration(_))));
    }

    #[test]
    fn submit_checks_buffer_sizes_against_scalar() {
        let mut dev = device(2, None);
        let kernel = dev.create_kernel(KERNEL_NAME).unwrap();
        let a = dev.allocate(16, AccessMode::ReadOnly).unwrap();
        let c = dev.allocate(16, AccessMode::ReadWrite).unwrap();
        dev.bind_argument(&kernel, 0, KernelArg::Buffer(a)).unwrap();
        dev.bind_argument(&kernel, 1, KernelArg::Buffer(a)).unwrap();
        dev.bind_argument(&kernel, 2, KernelArg::Buffer(c)).unwrap();
        dev.bind_argument(&kernel, 3, KernelArg::Scalar(4)).unwrap();
        assert!(matches!(dev.submit(&kernel), Err(MatmulError::Configuration(_))));
    }

    #[test]
    fn submit_requires_all_arguments() {
        let mut dev = device(2, None);
        let kernel = dev.create_kernel(KERNEL_NAME).unwrap();
        assert!(matches!(dev.submit(&kernel), Err(MatmulError::Accelerator(_))));
        assert!(dev.bind_argument(&kernel, 4, KernelArg::Scalar(1)).is_err());
    }

    #[test]
    fn injected_submit_fault_surfaces_as_error() {
        let mut dev = device(2, Some(Fault::Submit));
        let kernel = dev.create_kernel(KERNEL_NAME).unwrap();
        assert!(matches!(dev.submit(&kernel), Err(MatmulError::Accelerator(_))));
    }

    #[test]
    fn hung_kernel_times_out() {
        let mut dev = SimulatedAccelerator::new(DeviceConfig {
            word_lanes: 2,
            timeout: Duration::from_millis(50),
            fault: Some(Fault::Hang(Duration::from_secs(30))),
        })
        .unwrap();
        let kernel = dev.create_kernel(KERNEL_NAME).unwrap();
        let a = dev.allocate(16, AccessMode::ReadOnly).unwrap();
        let c = dev.allocate(16, AccessMode::ReadWrite).unwrap();
        dev.bind_argument(&kernel, 0, KernelArg::Buffer(a)).unwrap();
        dev.bind_argument(&kernel, 1, KernelArg::Buffer(a)).unwrap();
        dev.bind_argument(&kernel, 2, KernelArg::Buffer(c)).unwrap();
        dev.bind_argument(&kernel, 3, KernelArg::Scalar(2)).unwrap();
        let token = dev.submit(&kernel).unwrap();
        assert!(matches!(dev.await_completion(token), Err(MatmulError::DeviceTimeout(_))));
        assert_eq!(dev.buffer_state(c), Some(BufferState::InFlight));
        assert!(matches!(
            dev.release(c),
            Err(MatmulError::InvalidBufferState { state: BufferState::InFlight, .. })
        ));
    }
}
