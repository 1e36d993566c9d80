//! Re-entry into the module through closure registrations.

use tether_types::{Handle, HostValue};
use tracing::debug;
use wasmi::{AsContext, AsContextMut, Func, Val};

use crate::closure::{ClosureState, Disposal, Release};
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::exports_of;
use crate::state::HostState;

/// Call a module closure with `args` and return its result value.
///
/// The entry point receives `(a, b, arg0, arg1, ...)`. Arguments are matched
/// to the entry point's arity: missing ones are passed as handle 0
/// (`undefined`) and extra ones are dropped. Argument handles are owned by the
/// module; the returned handle (0 for none) is taken back by the host.
///
/// The reference taken for the call is released even when the call traps. If
/// that was the last reference the destructor runs before returning.
pub fn invoke_closure<C, H>(
    ctx: &mut C,
    closure: &ClosureState,
    args: &[HostValue],
) -> BridgeResult<HostValue>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let entered = closure.enter()?;
    let result = call_entry(ctx, closure, entered.a(), args);
    let disposed = match closure.leave(entered) {
        Release::Dispose(disposal) => run_destructor(ctx, disposal),
        Release::Held | Release::Inert => Ok(()),
    };
    let value = result?;
    disposed?;
    Ok(value)
}

/// Release one host-held reference. Returns `true` if the destructor ran.
pub fn drop_closure<C, H>(ctx: &mut C, closure: &ClosureState) -> BridgeResult<bool>
where
    C: AsContextMut<Data = HostState<H>>,
{
    match closure.release() {
        Release::Dispose(disposal) => {
            run_destructor(ctx, disposal)?;
            Ok(true)
        }
        Release::Held | Release::Inert => Ok(false),
    }
}

fn call_entry<C, H>(
    ctx: &mut C,
    closure: &ClosureState,
    a: u32,
    args: &[HostValue],
) -> BridgeResult<HostValue>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let func = table_func(ctx, closure.invoke_slot())?;
    let arity = func.ty(&*ctx).params().len().saturating_sub(2);

    let mut params = Vec::with_capacity(arity + 2);
    params.push(Val::I32(a as i32));
    params.push(Val::I32(closure.b() as i32));
    for idx in 0..arity {
        let handle = match args.get(idx) {
            Some(arg) => ctx.as_context_mut().data_mut().heap.alloc(arg.clone())?,
            None => Handle::UNDEFINED,
        };
        params.push(Val::I32(handle.0 as i32));
    }

    let result = call_func(ctx, func, &params)?;
    let handle = match result {
        Some(Val::I32(raw)) => Handle(raw as u32),
        _ => Handle::UNDEFINED,
    };
    ctx.as_context_mut().data_mut().heap.take(handle)
}

fn run_destructor<C, H>(ctx: &mut C, disposal: Disposal) -> BridgeResult<()>
where
    C: AsContextMut<Data = HostState<H>>,
{
    debug!(
        a = disposal.a,
        b = disposal.b,
        slot = disposal.dtor,
        "disposing closure"
    );
    let func = table_func(ctx, disposal.dtor)?;
    call_func(
        ctx,
        func,
        &[Val::I32(disposal.a as i32), Val::I32(disposal.b as i32)],
    )?;
    Ok(())
}

fn call_func<C, H>(ctx: &mut C, func: Func, params: &[Val]) -> BridgeResult<Option<Val>>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let results_len = func.ty(&*ctx).results().len();
    let mut results = vec![Val::I32(0); results_len];
    func.call(&mut *ctx, params, &mut results)?;
    Ok(results.into_iter().next())
}

/// The function stored at `slot` of the module's function table.
pub fn table_func<C, H>(ctx: &C, slot: u32) -> BridgeResult<Func>
where
    C: AsContext<Data = HostState<H>>,
{
    let table = exports_of(ctx)?
        .table
        .ok_or_else(|| BridgeError::MissingExport("function table".to_string()))?;
    match table.get(ctx, slot.into()) {
        Some(Val::FuncRef(func_ref)) => func_ref
            .func()
            .copied()
            .ok_or_else(|| BridgeError::MissingExport(format!("function table slot {slot}"))),
        _ => Err(BridgeError::MissingExport(format!(
            "function table slot {slot}"
        ))),
    }
}
