//! Ping-pong buffer/kernel engine
//!
//! Owns a fixed set of named double-buffered texel buffers and one program
//! instance with named kernels. Buffer `i` lives in slots `i` and `i + n`;
//! a single parity bit decides which of the two is "working" (written this
//! frame) and which is "last" (read-only).

use crate::backend::{Backend, Bindings, BufferDescriptor, BufferHandle, ProgramDescriptor, ProgramHandle};
use crate::error::{ConfigurationError, KernelError, NotReadyError, SimulationError};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Closed set of symbolic names resolved to indices at construction
pub trait SlotName: Copy + Eq + Hash + fmt::Debug + 'static {
    /// Every name, in index order
    const ALL: &'static [Self];

    fn label(self) -> &'static str;
}

#[derive(Debug)]
enum Allocation {
    Unallocated,
    Allocated {
        width: u32,
        height: u32,
        slots: Vec<BufferHandle>,
        program: ProgramHandle,
    },
}

/// Double-buffered kernel set over buffer names `B` and kernel names `K`
pub struct KernelBufferManager<B: SlotName, K: SlotName> {
    program: ProgramDescriptor,
    buffer_index: HashMap<B, usize>,
    kernel_index: HashMap<K, usize>,
    allocation: Allocation,
    bindings: Bindings,
    swap: bool,
}

impl<B: SlotName, K: SlotName> KernelBufferManager<B, K> {
    /// Build the name lookup tables. The program must expose one entry point
    /// per kernel name, in `K::ALL` order.
    pub fn new(program: ProgramDescriptor) -> Result<Self, ConfigurationError> {
        if program.entry_points.len() != K::ALL.len() {
            return Err(ConfigurationError::ProgramMismatch {
                label: program.label,
                expected: K::ALL.len(),
                found: program.entry_points.len(),
            });
        }
        let buffer_index = B::ALL.iter().enumerate().map(|(i, name)| (*name, i)).collect();
        let kernel_index = K::ALL.iter().enumerate().map(|(i, name)| (*name, i)).collect();
        let bindings = Bindings::new(program.input_count);

        Ok(Self {
            program,
            buffer_index,
            kernel_index,
            allocation: Allocation::Unallocated,
            bindings,
            swap: false,
        })
    }

    pub fn is_allocated(&self) -> bool {
        matches!(self.allocation, Allocation::Allocated { .. })
    }

    /// `(width, height)` of every slot, if allocated
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.allocation {
            Allocation::Allocated { width, height, .. } => Some((width, height)),
            Allocation::Unallocated => None,
        }
    }

    pub fn parity(&self) -> bool {
        self.swap
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Allocate `2 × |B|` slots of `width × height` and the program instance.
    ///
    /// No-op when already allocated with the same dimensions. Different
    /// dimensions need a [`release`](Self::release) first.
    pub fn setup(&mut self, backend: &mut dyn Backend, width: u32, height: u32) -> Result<(), SimulationError> {
        if let Allocation::Allocated {
            width: w, height: h, ..
        } = self.allocation
        {
            if (w, h) == (width, height) {
                return Ok(());
            }
            return Err(ConfigurationError::DimensionMismatch {
                allocated: (w, h),
                requested: (width, height),
            }
            .into());
        }

        let count = B::ALL.len();
        let mut slots = Vec::with_capacity(count * 2);
        for i in 0..count * 2 {
            let desc = BufferDescriptor {
                label: B::ALL[i % count].label(),
                width,
                height,
            };
            match backend.create_buffer(&desc) {
                Ok(handle) => slots.push(handle),
                Err(err) => {
                    slots.into_iter().for_each(|s| backend.destroy_buffer(s));
                    return Err(err);
                }
            }
        }
        let program = match backend.create_program(&self.program) {
            Ok(program) => program,
            Err(err) => {
                slots.into_iter().for_each(|s| backend.destroy_buffer(s));
                return Err(err);
            }
        };

        log::info!(
            "Allocated kernel set `{}`: {} slots of {}x{}",
            self.program.label,
            slots.len(),
            width,
            height
        );
        self.allocation = Allocation::Allocated {
            width,
            height,
            slots,
            program,
        };
        Ok(())
    }

    /// Free every slot and the program instance, and clear the program
    /// parameters. Safe when nothing is allocated.
    pub fn release(&mut self, backend: &mut dyn Backend) {
        let allocation = std::mem::replace(&mut self.allocation, Allocation::Unallocated);
        if let Allocation::Allocated { slots, program, .. } = allocation {
            for slot in slots {
                backend.destroy_buffer(slot);
            }
            backend.destroy_program(program);
            log::info!("Released kernel set `{}`", self.program.label);
        }
        self.bindings.clear();
        self.swap = false;
    }

    fn buffer_index(&self, name: B) -> Result<usize, KernelError> {
        self.buffer_index
            .get(&name)
            .copied()
            .ok_or(KernelError::UnknownName(name.label()))
    }

    fn slot(&self, name: B, working: bool) -> Result<BufferHandle, SimulationError> {
        let index = self.buffer_index(name)?;
        let Allocation::Allocated { slots, .. } = &self.allocation else {
            return Err(NotReadyError::Unallocated.into());
        };
        let n = B::ALL.len();
        // swap: last = i + n, working = i
        let slot = match (self.swap, working) {
            (true, true) | (false, false) => index,
            (true, false) | (false, true) => index + n,
        };
        Ok(slots[slot])
    }

    /// Slot written this frame
    pub fn working_buffer(&self, name: B) -> Result<BufferHandle, SimulationError> {
        self.slot(name, true)
    }

    /// Slot holding the previous frame's result
    pub fn last_buffer(&self, name: B) -> Result<BufferHandle, SimulationError> {
        self.slot(name, false)
    }

    /// Bind a buffer to an input slot of the program. Persists until changed
    /// or released.
    pub fn bind_input(&mut self, slot: usize, buffer: BufferHandle) -> Result<(), KernelError> {
        self.bindings.bind(slot, buffer)
    }

    pub fn set_uniforms<T: bytemuck::Pod>(&mut self, value: &T) {
        self.bindings.set_uniforms(value);
    }

    /// Run `kernel` over the whole working slot of `target` with the current
    /// parameters.
    pub fn invoke(&self, backend: &mut dyn Backend, kernel: K, target: B) -> Result<(), SimulationError> {
        let Allocation::Allocated { program, .. } = &self.allocation else {
            return Err(NotReadyError::Unallocated.into());
        };
        let pass = self
            .kernel_index
            .get(&kernel)
            .copied()
            .ok_or(KernelError::UnknownName(kernel.label()))?;
        let working = self.working_buffer(target)?;

        if let Some(slot) = self
            .bindings
            .inputs()
            .iter()
            .position(|input| *input == Some(working))
        {
            return Err(KernelError::AliasedTarget {
                slot,
                buffer: target.label(),
            }
            .into());
        }

        backend.dispatch(*program, pass, &self.bindings, working)
    }

    /// Flip the parity bit of every buffer pair
    pub fn swap_buffers(&mut self) {
        self.swap = !self.swap;
    }
}

impl<B: SlotName, K: SlotName> fmt::Debug for KernelBufferManager<B, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelBufferManager")
            .field("program", &self.program.label)
            .field("allocation", &self.allocation)
            .field("swap", &self.swap)
            .finish()
    }
}
