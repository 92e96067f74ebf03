//! In-process emulated accelerator
//!
//! Compiles kernel source with the crate's own lexer, parser and analyzer
//! and runs it on the host through the interpreter. Every handle comes from
//! one counter and is never reused; released handles stay poisoned so any
//! later use is reported instead of touching freed storage.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use serde::Serialize;

use crate::ast::Module;
use crate::backend::{
    Backend, BufferHandle, ContextHandle, DeviceHandle, HostSlice, HostSliceMut, KernelArg,
    KernelHandle, ProgramHandle, QueueHandle,
};
use crate::config::EmulatorConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::interpreter::{self, Memory};
use crate::types::{ElementType, Scalar};

/// Counters of backend calls, for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmulatorStats {
    pub compiles: usize,
    pub kernels_created: usize,
    pub enqueues: usize,
    pub allocations: usize,
    pub uploads: usize,
    pub downloads: usize,
    pub buffer_releases: usize,
}

#[derive(Debug)]
enum Slot<T> {
    Live(T),
    Released,
}

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

impl Storage {
    fn zeroed(length: usize, element_type: ElementType) -> Self {
        match element_type {
            ElementType::Integral => Storage::Int(vec![0; length]),
            ElementType::Floating => Storage::Float(vec![0.0; length]),
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::Int(data) => data.len(),
            Storage::Float(data) => data.len(),
        }
    }

    fn element_type(&self) -> ElementType {
        match self {
            Storage::Int(_) => ElementType::Integral,
            Storage::Float(_) => ElementType::Floating,
        }
    }
}

#[derive(Debug)]
struct KernelInstance {
    module: Rc<Module>,
    function: String,
    args: Vec<Option<KernelArg>>,
}

fn live<'m, K, T>(map: &'m HashMap<K, Slot<T>>, key: K) -> DispatchResult<&'m T>
where
    K: Hash + Eq + fmt::Display,
{
    match map.get(&key) {
        Some(Slot::Live(value)) => Ok(value),
        Some(Slot::Released) => Err(DispatchError::invalid_handle(format!("{} has been released", key))),
        None => Err(DispatchError::invalid_handle(format!("unknown {}", key))),
    }
}

fn live_mut<'m, K, T>(map: &'m mut HashMap<K, Slot<T>>, key: K) -> DispatchResult<&'m mut T>
where
    K: Hash + Eq + fmt::Display,
{
    match map.get_mut(&key) {
        Some(Slot::Live(value)) => Ok(value),
        Some(Slot::Released) => Err(DispatchError::invalid_handle(format!("{} has been released", key))),
        None => Err(DispatchError::invalid_handle(format!("unknown {}", key))),
    }
}

fn release<K, T>(map: &mut HashMap<K, Slot<T>>, key: K) -> DispatchResult<()>
where
    K: Hash + Eq + fmt::Display + Copy,
{
    live(map, key)?;
    map.insert(key, Slot::Released);
    Ok(())
}

/// Emulated accelerator backend
#[derive(Debug)]
pub struct EmulatorBackend {
    config: EmulatorConfig,
    next_handle: u64,
    devices: HashMap<DeviceHandle, Slot<()>>,
    contexts: HashMap<ContextHandle, Slot<()>>,
    queues: HashMap<QueueHandle, Slot<()>>,
    programs: HashMap<ProgramHandle, Slot<Rc<Module>>>,
    kernels: HashMap<KernelHandle, Slot<KernelInstance>>,
    buffers: HashMap<BufferHandle, Slot<Storage>>,
    stats: EmulatorStats,
}

impl EmulatorBackend {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            next_handle: 1,
            devices: HashMap::new(),
            contexts: HashMap::new(),
            queues: HashMap::new(),
            programs: HashMap::new(),
            kernels: HashMap::new(),
            buffers: HashMap::new(),
            stats: EmulatorStats::default(),
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> EmulatorStats {
        self.stats
    }

    /// Buffers allocated and not yet released
    pub fn live_buffers(&self) -> usize {
        self.buffers
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    fn next(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Default for EmulatorBackend {
    fn default() -> Self {
        Self::new(EmulatorConfig::default())
    }
}

/// Kernel view of the emulator's buffers
struct BufferMemory<'a> {
    buffers: &'a mut HashMap<BufferHandle, Slot<Storage>>,
}

fn checked_index(index: i64, length: usize, buffer: BufferHandle) -> Result<usize, String> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < length)
        .ok_or_else(|| format!("index {} out of bounds for {} of length {}", index, buffer, length))
}

impl Memory for BufferMemory<'_> {
    fn load(&self, buffer: BufferHandle, index: i64) -> Result<Scalar, String> {
        let storage = live(&*self.buffers, buffer).map_err(|e| e.to_string())?;
        let i = checked_index(index, storage.len(), buffer)?;
        Ok(match storage {
            Storage::Int(data) => Scalar::Int(data[i]),
            Storage::Float(data) => Scalar::Float(data[i]),
        })
    }

    fn store(&mut self, buffer: BufferHandle, index: i64, value: Scalar) -> Result<(), String> {
        let storage = live_mut(&mut *self.buffers, buffer).map_err(|e| e.to_string())?;
        let i = checked_index(index, storage.len(), buffer)?;
        match storage {
            Storage::Int(data) => data[i] = value.as_i32(),
            Storage::Float(data) => data[i] = value.as_f32(),
        }
        Ok(())
    }
}

impl Backend for EmulatorBackend {
    fn name(&self) -> &str {
        &self.config.device_name
    }

    fn create_device(&mut self) -> DispatchResult<DeviceHandle> {
        let device = DeviceHandle(self.next());
        self.devices.insert(device, Slot::Live(()));
        log::debug!("Created {} ({})", device, self.config.device_name);
        Ok(device)
    }

    fn create_context(&mut self, device: DeviceHandle) -> DispatchResult<ContextHandle> {
        live(&self.devices, device)?;
        let context = ContextHandle(self.next());
        self.contexts.insert(context, Slot::Live(()));
        Ok(context)
    }

    fn create_command_queue(
        &mut self,
        context: ContextHandle,
        device: DeviceHandle,
    ) -> DispatchResult<QueueHandle> {
        live(&self.contexts, context)?;
        live(&self.devices, device)?;
        let queue = QueueHandle(self.next());
        self.queues.insert(queue, Slot::Live(()));
        Ok(queue)
    }

    fn release_queue(&mut self, queue: QueueHandle) -> DispatchResult<()> {
        release(&mut self.queues, queue)
    }

    fn release_context(&mut self, context: ContextHandle) -> DispatchResult<()> {
        release(&mut self.contexts, context)
    }

    fn release_device(&mut self, device: DeviceHandle) -> DispatchResult<()> {
        release(&mut self.devices, device)
    }

    fn compile_program(
        &mut self,
        context: ContextHandle,
        source: &str,
    ) -> DispatchResult<ProgramHandle> {
        live(&self.contexts, context)?;
        self.stats.compiles += 1;

        let module = crate::compile_source(source)?;

        let program = ProgramHandle(self.next());
        log::debug!("Compiled {} with {} kernel(s)", program, module.functions.len());
        self.programs.insert(program, Slot::Live(Rc::new(module)));
        Ok(program)
    }

    fn release_program(&mut self, program: ProgramHandle) -> DispatchResult<()> {
        release(&mut self.programs, program)
    }

    fn create_kernel(
        &mut self,
        program: ProgramHandle,
        function_name: &str,
    ) -> DispatchResult<KernelHandle> {
        let module = Rc::clone(live(&self.programs, program)?);
        let arity = module
            .function(function_name)
            .map(|f| f.params.len())
            .ok_or_else(|| {
                DispatchError::compile(format!("no kernel named `{}` in {}", function_name, program))
            })?;

        let kernel = KernelHandle(self.next());
        self.kernels.insert(
            kernel,
            Slot::Live(KernelInstance {
                module,
                function: function_name.to_string(),
                args: vec![None; arity],
            }),
        );
        self.stats.kernels_created += 1;
        Ok(kernel)
    }

    fn release_kernel(&mut self, kernel: KernelHandle) -> DispatchResult<()> {
        release(&mut self.kernels, kernel)
    }

    fn set_kernel_argument(
        &mut self,
        kernel: KernelHandle,
        position: usize,
        value: KernelArg,
    ) -> DispatchResult<()> {
        let instance = live_mut(&mut self.kernels, kernel)?;
        let arity = instance.args.len();
        let slot = instance.args.get_mut(position).ok_or_else(|| {
            DispatchError::invalid_argument(format!(
                "argument index {} out of range for `{}` ({} parameters)",
                position, instance.function, arity
            ))
        })?;
        log::trace!("{} arg {} = {:?}", kernel, position, value);
        *slot = Some(value);
        Ok(())
    }

    fn enqueue(
        &mut self,
        kernel: KernelHandle,
        queue: QueueHandle,
        global_size: usize,
    ) -> DispatchResult<()> {
        live(&self.queues, queue)?;
        let instance = live(&self.kernels, kernel)?;

        let mut args = Vec::with_capacity(instance.args.len());
        for (position, arg) in instance.args.iter().enumerate() {
            let arg = arg.ok_or_else(|| {
                DispatchError::launch(format!(
                    "argument {} of `{}` was never set",
                    position, instance.function
                ))
            })?;
            args.push(arg);
        }
        let module = Rc::clone(&instance.module);
        let function = module
            .function(&instance.function)
            .ok_or_else(|| DispatchError::launch(format!("kernel `{}` vanished", instance.function)))?;

        self.stats.enqueues += 1;
        let mut memory = BufferMemory {
            buffers: &mut self.buffers,
        };
        interpreter::launch(function, &args, &mut memory, global_size)
    }

    fn allocate_buffer(
        &mut self,
        context: ContextHandle,
        length: usize,
        element_type: ElementType,
    ) -> DispatchResult<BufferHandle> {
        live(&self.contexts, context)?;
        if length == 0 {
            return Err(DispatchError::invalid_argument("buffers must hold at least one element"));
        }
        if length > self.config.max_buffer_elements {
            return Err(DispatchError::backend(format!(
                "cannot allocate {} elements, device limit is {}",
                length, self.config.max_buffer_elements
            )));
        }

        let buffer = BufferHandle(self.next());
        self.buffers.insert(buffer, Slot::Live(Storage::zeroed(length, element_type)));
        self.stats.allocations += 1;
        log::trace!("Allocated {} ({} x {})", buffer, length, element_type);
        Ok(buffer)
    }

    fn upload_buffer(
        &mut self,
        queue: QueueHandle,
        buffer: BufferHandle,
        data: HostSlice<'_>,
    ) -> DispatchResult<()> {
        live(&self.queues, queue)?;
        let storage = live_mut(&mut self.buffers, buffer)?;
        if storage.len() != data.len() {
            return Err(DispatchError::length(storage.len(), data.len()));
        }

        match (storage, data) {
            (Storage::Int(dst), HostSlice::Int(src)) => dst.copy_from_slice(src),
            (Storage::Float(dst), HostSlice::Float(src)) => dst.copy_from_slice(src),
            (storage, data) => {
                return Err(DispatchError::ElementTypeMismatch {
                    expected: storage.element_type(),
                    found: data.element_type(),
                });
            }
        }
        self.stats.uploads += 1;
        Ok(())
    }

    fn download_buffer(
        &mut self,
        queue: QueueHandle,
        buffer: BufferHandle,
        out: HostSliceMut<'_>,
    ) -> DispatchResult<()> {
        live(&self.queues, queue)?;
        let storage = live(&self.buffers, buffer)?;
        if storage.len() != out.len() {
            return Err(DispatchError::length(storage.len(), out.len()));
        }

        match (storage, out) {
            (Storage::Int(src), HostSliceMut::Int(dst)) => dst.copy_from_slice(src),
            (Storage::Float(src), HostSliceMut::Float(dst)) => dst.copy_from_slice(src),
            (storage, out) => {
                return Err(DispatchError::ElementTypeMismatch {
                    expected: storage.element_type(),
                    found: out.element_type(),
                });
            }
        }
        self.stats.downloads += 1;
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> DispatchResult<()> {
        release(&mut self.buffers, buffer)?;
        self.stats.buffer_releases += 1;
        log::trace!("Released {}", buffer);
        Ok(())
    }

    fn max_work_group_size(&self, _device: DeviceHandle) -> usize {
        self.config.max_work_group_size
    }
}
