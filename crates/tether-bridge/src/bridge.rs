//! The embedder-facing bridge: one module instance plus its host state.

use tether_types::{Handle, HostValue};
use tracing::{info, warn};
use wasmi::{Engine, Instance, Linker, Store, WasmParams, WasmResults};

use crate::catalog::{self, dom, timers};
use crate::closure::expect_closure;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::intrinsics;
use crate::loader::{self, LoadPath, ModuleSource};
use crate::marshal;
use crate::state::{GuestExports, HostState};
use crate::trampoline;

type Registrar<H> = Box<dyn FnOnce(&mut Linker<HostState<H>>) -> BridgeResult<()>>;

/// Configures and instantiates a [`Bridge`].
pub struct BridgeBuilder<H> {
    config: BridgeConfig,
    engine: Engine,
    host: H,
    registrars: Vec<Registrar<H>>,
}

impl<H: 'static> BridgeBuilder<H> {
    pub fn new(config: BridgeConfig, host: H) -> Self {
        Self {
            config,
            engine: Engine::default(),
            host,
            registrars: Vec::new(),
        }
    }

    /// Use an existing engine instead of a default one.
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Embedder data reachable from every import as `HostState::host`.
    pub fn host(mut self, host: H) -> Self {
        self.host = host;
        self
    }

    /// Register additional imports after the intrinsics and the catalogue.
    pub fn link(
        mut self,
        registrar: impl FnOnce(&mut Linker<HostState<H>>) -> BridgeResult<()> + 'static,
    ) -> Self {
        self.registrars.push(Box::new(registrar));
        self
    }

    /// Load, link and start the module.
    ///
    /// A start function runs before the module's exports are attached, so it
    /// may only use intrinsics that do not touch linear memory.
    pub fn instantiate(self, source: impl Into<ModuleSource>) -> BridgeResult<Bridge<H>> {
        let Self {
            config,
            engine,
            host,
            registrars,
        } = self;

        let loaded = loader::load(&engine, source.into(), &config.expected_content_type)?;

        let mut store = Store::new(
            &engine,
            HostState::new(host, config.initial_heap_capacity),
        );
        let mut linker = <Linker<HostState<H>>>::new(&engine);
        intrinsics::link(&mut linker, &config.intrinsics_namespace)?;
        if config.catalog {
            catalog::link(&mut linker, &config.catalog_namespace)?;
        }
        for registrar in registrars {
            registrar(&mut linker)?;
        }

        let instance = linker
            .instantiate(&mut store, &loaded.module)
            .map_err(|e| BridgeError::Link(e.to_string()))?
            .start(&mut store)?;
        let exports = GuestExports::resolve(&store, &instance, &config.exports)?;
        store.data_mut().attach(exports);

        info!(
            digest = %loaded.digest_hex(),
            path = ?loaded.path,
            "module instantiated"
        );
        Ok(Bridge {
            store,
            instance,
            load_path: loaded.path,
            digest: loaded.digest,
        })
    }
}

/// A module instance wired to the host through the bridge.
pub struct Bridge<H = ()> {
    store: Store<HostState<H>>,
    instance: Instance,
    load_path: LoadPath,
    digest: [u8; 32],
}

impl<H: Default + 'static> Bridge<H> {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder<H> {
        BridgeBuilder::new(config, H::default())
    }
}

impl<H: 'static> Bridge<H> {
    // ── Calls ────────────────────────────────────────────────────────────────

    /// Call an exported function, then surface any exception a catching
    /// import left in the pending slot as `HostThrow`.
    ///
    /// The thrown value stays in the handle table under the reported handle
    /// until the caller frees it. If the call traps instead, the slot is still
    /// drained and its value freed, so the trap is what the caller sees.
    pub fn call<P, R>(&mut self, name: &str, params: P) -> BridgeResult<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let func = self
            .instance
            .get_typed_func::<P, R>(&self.store, name)
            .map_err(|_| BridgeError::MissingExport(name.to_string()))?;
        let result = func
            .call(&mut self.store, params)
            .map_err(BridgeError::from_wasm);
        self.settle(result)
    }

    /// Invoke the closure stored under `handle` from the host side.
    pub fn invoke_closure(&mut self, handle: Handle, args: &[HostValue]) -> BridgeResult<HostValue> {
        let closure = expect_closure(self.get(handle)?)?;
        let result = trampoline::invoke_closure(&mut self.store, &closure, args);
        self.settle(result)
    }

    /// Release the host's reference to the closure under `handle` and free
    /// the handle. Returns `true` if the destructor ran.
    pub fn drop_closure(&mut self, handle: Handle) -> BridgeResult<bool> {
        let closure = expect_closure(&self.take(handle)?)?;
        let result = trampoline::drop_closure(&mut self.store, &closure);
        self.settle(result)
    }

    /// Fire `event` on the event target under `target`. Returns how many
    /// listeners ran.
    pub fn dispatch_event(
        &mut self,
        target: Handle,
        event: &str,
        payload: HostValue,
    ) -> BridgeResult<u32> {
        let target = marshal::expect_object::<dom::EventTarget>(self.get(target)?, "EventTarget")?;
        let result = dom::dispatch(&mut self.store, &target, event, &payload);
        self.settle(result)
    }

    /// Advance the timer clock by `ms` and fire what falls due.
    pub fn advance_timers(&mut self, ms: u64) -> BridgeResult<usize> {
        let result = timers::advance(&mut self.store, ms);
        self.settle(result)
    }

    /// Drain the pending slot after a host-initiated call into the module.
    fn settle<T>(&mut self, result: BridgeResult<T>) -> BridgeResult<T> {
        let Some(pending) = self.store.data_mut().take_pending_exception() else {
            return result;
        };
        match result {
            Ok(_) => {
                let message = self
                    .store
                    .data()
                    .heap
                    .get(pending)
                    .map(HostValue::debug_string)
                    .unwrap_or_default();
                Err(BridgeError::HostThrow {
                    handle: pending,
                    message,
                })
            }
            Err(err) => {
                let reported = matches!(&err, BridgeError::HostThrow { handle, .. } if *handle == pending);
                if !reported {
                    warn!(%pending, error = %err, "call trapped with an exception pending");
                    if let Err(free_err) = self.store.data_mut().heap.free(pending) {
                        warn!(%pending, error = %free_err, "pending exception already released");
                    }
                }
                Err(err)
            }
        }
    }

    // ── Handles ──────────────────────────────────────────────────────────────

    pub fn alloc(&mut self, value: impl Into<HostValue>) -> BridgeResult<Handle> {
        self.store.data_mut().heap.alloc(value.into())
    }

    pub fn get(&self, handle: Handle) -> BridgeResult<&HostValue> {
        self.store.data().heap.get(handle)
    }

    pub fn take(&mut self, handle: Handle) -> BridgeResult<HostValue> {
        self.store.data_mut().heap.take(handle)
    }

    pub fn free(&mut self, handle: Handle) -> BridgeResult<()> {
        self.store.data_mut().heap.free(handle)
    }

    /// Read and clear the pending exception slot.
    pub fn take_pending_exception(&mut self) -> Option<Handle> {
        self.store.data_mut().take_pending_exception()
    }

    // ── Memory ───────────────────────────────────────────────────────────────

    /// Copy `s` into module memory; returns `(ptr, len)`.
    pub fn pass_string(&mut self, s: &str) -> BridgeResult<(u32, u32)> {
        let ptr = marshal::pass_string(&mut self.store, s)?;
        let len = self.store.data_mut().take_write_len();
        Ok((ptr, len))
    }

    pub fn read_string(&mut self, ptr: u32, len: u32) -> BridgeResult<String> {
        marshal::read_string(&mut self.store, ptr, len)
    }

    pub fn read_bytes(&mut self, ptr: u32, len: u32) -> BridgeResult<Vec<u8>> {
        marshal::read_bytes(&mut self.store, ptr, len)
    }

    pub fn write_bytes(&mut self, ptr: u32, data: &[u8]) -> BridgeResult<()> {
        marshal::write_bytes(&mut self.store, ptr, data)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn host(&self) -> &H {
        &self.store.data().host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.store.data_mut().host
    }

    pub fn state(&self) -> &HostState<H> {
        self.store.data()
    }

    pub fn store_mut(&mut self) -> &mut Store<HostState<H>> {
        &mut self.store
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn load_path(&self) -> LoadPath {
        self.load_path
    }

    /// SHA-256 of the module binary.
    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }
}
