//! Exception relay for host imports.
//!
//! Every import is registered through [`host_fn!`], which runs its body under
//! [`relay`] with a fixed [`Policy`]:
//!
//! - [`Policy::Catch`]: a thrown host value is stored in the handle table and
//!   handed to the module's exception store (or kept in the host's pending
//!   slot when the module has none); the import returns its zero value.
//! - [`Policy::Log`]: the import is not expected to throw. A throw is logged
//!   as a bridge defect and traps with `UnhandledHostThrow`.
//!
//! Bridge faults (bad handles, decode failures, type mismatches) trap the
//! in-flight call under either policy.

use tether_types::{Handle, HostValue};
use tracing::{error, warn};
use wasmi::{AsContextMut, Caller};

use crate::error::{BridgeError, BridgeResult};
use crate::marshal::exports_of;
use crate::state::HostState;

/// Why a host import did not produce a value.
#[derive(Debug)]
pub enum Fault {
    /// The host operation threw this value.
    Throw(HostValue),
    /// The bridge itself failed.
    Bridge(BridgeError),
}

impl From<BridgeError> for Fault {
    fn from(err: BridgeError) -> Self {
        Fault::Bridge(err)
    }
}

impl From<wasmi::Error> for Fault {
    fn from(err: wasmi::Error) -> Self {
        Fault::Bridge(BridgeError::from_wasm(err))
    }
}

/// Result of a host import body.
pub type HostResult<T> = Result<T, Fault>;

/// How an import treats a thrown host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Catch,
    Log,
}

/// Run an import body and apply `policy` to its fault, if any.
pub fn relay<H, R, F>(
    caller: &mut Caller<'_, HostState<H>>,
    policy: Policy,
    import: &'static str,
    body: F,
) -> Result<R, wasmi::Error>
where
    R: Default,
    F: FnOnce(&mut Caller<'_, HostState<H>>) -> HostResult<R>,
{
    match body(caller) {
        Ok(value) => Ok(value),
        Err(Fault::Bridge(err)) => Err(err.into_trap()),
        Err(Fault::Throw(value)) => match policy {
            Policy::Catch => {
                store_exception(caller, value).map_err(BridgeError::into_trap)?;
                Ok(R::default())
            }
            Policy::Log => {
                let message = value.debug_string();
                error!(
                    import,
                    thrown = %message,
                    "host import threw outside a catching wrapper"
                );
                Err(BridgeError::UnhandledHostThrow {
                    import: import.to_string(),
                    message,
                }
                .into_trap())
            }
        },
    }
}

/// Put a caught value into the handle table and record it as pending.
///
/// A module exporting an exception store takes ownership of the handle;
/// otherwise it stays in the host slot until `exn_take` or the next
/// host-initiated call reads it.
pub fn store_exception<C, H>(ctx: &mut C, value: HostValue) -> BridgeResult<Handle>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let handle = ctx.as_context_mut().data_mut().heap.alloc(value)?;
    if let Some(exn_store) = exports_of(ctx).ok().and_then(|exports| exports.exn_store) {
        exn_store.call(&mut *ctx, handle.0)?;
        return Ok(handle);
    }

    let mut store = ctx.as_context_mut();
    let state = store.data_mut();
    if let Some(stale) = state.pending_exception.replace(handle) {
        warn!(%stale, "pending exception overwritten before it was read");
        state.heap.free(stale)?;
    }
    Ok(handle)
}

/// Register a host import whose body runs under [`relay`].
///
/// The linker's store data is `HostState<H>`. The short form takes `H` from
/// the enclosing generic scope; name the embedder type explicitly with a
/// leading `<T>` when there is no such parameter.
///
/// ```ignore
/// host_fn!(linker, ns, Policy::Catch, "gl_get_parameter", |caller, ctx: u32, pname: u32| -> u32 {
///     ...
/// });
/// host_fn!(<()> linker, "env", Policy::Log, "tick", |caller| -> () { Ok(()) });
/// ```
#[macro_export]
macro_rules! host_fn {
    (
        <$host:ty> $linker:expr, $ns:expr, $policy:expr, $name:expr,
        |$caller:ident $(, $arg:ident : $ty:ty)*| -> $ret:ty $body:block
    ) => {
        $linker
            .func_wrap(
                $ns,
                $name,
                move |mut $caller: ::wasmi::Caller<'_, $crate::HostState<$host>> $(, $arg: $ty)*|
                      -> ::core::result::Result<$ret, ::wasmi::Error> {
                    $crate::relay::relay(&mut $caller, $policy, $name, |$caller| -> $crate::relay::HostResult<$ret> { $body })
                },
            )
            .map_err(|e| $crate::BridgeError::Link(format!("{}::{}: {e}", $ns, $name)))?
    };
    (
        $linker:expr, $ns:expr, $policy:expr, $name:expr,
        |$caller:ident $(, $arg:ident : $ty:ty)*| -> $ret:ty $body:block
    ) => {
        $crate::host_fn!(<H> $linker, $ns, $policy, $name, |$caller $(, $arg: $ty)*| -> $ret $body)
    };
}
