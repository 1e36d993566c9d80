//! Per-instance bridge state held by the wasmi `Store`.

use tether_types::Handle;
use wasmi::{AsContext, Instance, Memory, Table, TypedFunc};

use crate::catalog::timers::TimerQueue;
use crate::config::ExportNames;
use crate::error::{BridgeError, BridgeResult};
use crate::heap::HandleTable;
use crate::views::MemoryViews;

/// Exports of the module the bridge calls into.
#[derive(Clone)]
pub struct GuestExports {
    pub memory: Memory,
    /// `malloc(size) -> ptr`
    pub malloc: TypedFunc<u32, u32>,
    /// `realloc(ptr, old_size, new_size) -> ptr`
    pub realloc: Option<TypedFunc<(u32, u32, u32), u32>>,
    /// `free(ptr, size)`
    pub free: Option<TypedFunc<(u32, u32), ()>>,
    /// `exn_store(handle)`
    pub exn_store: Option<TypedFunc<u32, ()>>,
    /// Function table holding closure invoke and destructor entries.
    pub table: Option<Table>,
}

impl GuestExports {
    /// Resolve the export surface. `memory` and `malloc` are required.
    pub fn resolve(
        ctx: impl AsContext,
        instance: &Instance,
        names: &ExportNames,
    ) -> BridgeResult<Self> {
        let ctx = ctx.as_context();
        let memory = instance
            .get_memory(&ctx, &names.memory)
            .ok_or_else(|| BridgeError::MissingExport(names.memory.clone()))?;
        let malloc = instance
            .get_typed_func::<u32, u32>(&ctx, &names.malloc)
            .map_err(|_| BridgeError::MissingExport(names.malloc.clone()))?;
        let realloc = instance
            .get_typed_func::<(u32, u32, u32), u32>(&ctx, &names.realloc)
            .ok();
        let free = instance.get_typed_func::<(u32, u32), ()>(&ctx, &names.free).ok();
        let exn_store = instance.get_typed_func::<u32, ()>(&ctx, &names.exn_store).ok();
        let table = instance.get_table(&ctx, &names.table);
        Ok(Self {
            memory,
            malloc,
            realloc,
            free,
            exn_store,
            table,
        })
    }
}

/// Store data for a bridged module instance.
///
/// `H` is the embedder's own state, reachable from imports it links.
pub struct HostState<H = ()> {
    pub(crate) heap: HandleTable,
    pub(crate) views: MemoryViews,
    pub(crate) pending_exception: Option<Handle>,
    pub(crate) last_write_len: u32,
    pub(crate) timers: TimerQueue,
    pub(crate) exports: Option<GuestExports>,
    pub host: H,
}

impl<H> HostState<H> {
    pub fn new(host: H, heap_capacity: usize) -> Self {
        Self {
            heap: HandleTable::with_capacity(heap_capacity),
            views: MemoryViews::new(),
            pending_exception: None,
            last_write_len: 0,
            timers: TimerQueue::new(),
            exports: None,
            host,
        }
    }

    pub fn heap(&self) -> &HandleTable {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut HandleTable {
        &mut self.heap
    }

    pub fn views(&self) -> &MemoryViews {
        &self.views
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Resolved module exports; an error before instantiation completes.
    pub fn exports(&self) -> BridgeResult<&GuestExports> {
        self.exports
            .as_ref()
            .ok_or_else(|| BridgeError::MissingExport("module not attached".to_string()))
    }

    pub(crate) fn attach(&mut self, exports: GuestExports) {
        self.exports = Some(exports);
        self.views.invalidate();
    }

    /// The pending exception, if a wrapped host call threw.
    pub fn pending_exception(&self) -> Option<Handle> {
        self.pending_exception
    }

    /// Read and clear the pending exception slot.
    pub fn take_pending_exception(&mut self) -> Option<Handle> {
        self.pending_exception.take()
    }

    /// Byte length of the most recent string written into module memory.
    ///
    /// Single slot: read it before the next marshalling call overwrites it.
    pub fn take_write_len(&mut self) -> u32 {
        std::mem::take(&mut self.last_write_len)
    }
}
