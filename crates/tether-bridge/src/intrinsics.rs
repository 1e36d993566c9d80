//! Bridge intrinsics: the import namespace every guest links against.
//!
//! These are plumbing over the handle table, the marshalling layer and the
//! closure registry. None of them call into host objects, so none of them can
//! throw a host value; they are registered with [`Policy::Log`] and their
//! bridge faults trap the in-flight call.

use std::rc::Rc;

use tether_types::{abi, Handle, HostValue};
use tracing::{debug, error, info, trace, warn};
use wasmi::Linker;

use crate::closure::{as_closure, closure_value, expect_closure, ClosureState, Release};
use crate::error::{BridgeError, BridgeResult};
use crate::host_fn;
use crate::marshal::{
    abi_bool, boolean_code, read_string, take_guest_string, write_number_pair, write_string_pair,
};
use crate::relay::Policy;
use crate::state::HostState;

/// Register all intrinsics under `ns`.
pub fn link<H: 'static>(linker: &mut Linker<HostState<H>>, ns: &str) -> BridgeResult<()> {
    link_handles(linker, ns)?;
    link_values(linker, ns)?;
    link_exceptions(linker, ns)?;
    link_closures(linker, ns)?;
    Ok(())
}

fn link_handles<H: 'static>(linker: &mut Linker<HostState<H>>, ns: &str) -> BridgeResult<()> {
    host_fn!(linker, ns, Policy::Log, abi::OBJECT_DROP_REF, |caller, handle: u32| -> () {
        caller.data_mut().heap.take(Handle(handle))?;
        Ok(())
    });

    host_fn!(linker, ns, Policy::Log, abi::OBJECT_CLONE_REF, |caller, handle: u32| -> u32 {
        Ok(caller.data_mut().heap.clone_ref(Handle(handle))?.0)
    });

    Ok(())
}

fn link_values<H: 'static>(linker: &mut Linker<HostState<H>>, ns: &str) -> BridgeResult<()> {
    host_fn!(linker, ns, Policy::Log, abi::STRING_NEW, |caller, ptr: u32, len: u32| -> u32 {
        let s = read_string(caller, ptr, len)?;
        Ok(caller.data_mut().heap.alloc(HostValue::from(s))?.0)
    });

    host_fn!(linker, ns, Policy::Log, abi::NUMBER_NEW, |caller, value: f64| -> u32 {
        Ok(caller.data_mut().heap.alloc(HostValue::Number(value))?.0)
    });

    host_fn!(linker, ns, Policy::Log, abi::ERROR_NEW, |caller, ptr: u32, len: u32| -> u32 {
        let message = read_string(caller, ptr, len)?;
        let value = HostValue::error("Error", &message);
        Ok(caller.data_mut().heap.alloc(value)?.0)
    });

    host_fn!(linker, ns, Policy::Log, abi::NUMBER_GET, |caller, retptr: u32, handle: u32| -> () {
        let number = caller.data().heap.get(Handle(handle))?.as_number();
        Ok(write_number_pair(caller, retptr, number)?)
    });

    host_fn!(linker, ns, Policy::Log, abi::STRING_GET, |caller, retptr: u32, handle: u32| -> () {
        let s = caller
            .data()
            .heap
            .get(Handle(handle))?
            .as_str()
            .map(str::to_owned);
        Ok(write_string_pair(caller, retptr, s.as_deref())?)
    });

    host_fn!(linker, ns, Policy::Log, abi::BOOLEAN_GET, |caller, handle: u32| -> u32 {
        Ok(boolean_code(caller.data().heap.get(Handle(handle))?))
    });

    host_fn!(linker, ns, Policy::Log, abi::DEBUG_STRING, |caller, retptr: u32, handle: u32| -> () {
        let rendered = caller.data().heap.get(Handle(handle))?.debug_string();
        Ok(write_string_pair(caller, retptr, Some(&rendered))?)
    });

    host_fn!(linker, ns, Policy::Log, abi::IS_UNDEFINED, |caller, handle: u32| -> u32 {
        let value = caller.data().heap.get(Handle(handle))?;
        Ok(abi_bool(matches!(value, HostValue::Undefined)))
    });

    host_fn!(linker, ns, Policy::Log, abi::IS_NULL, |caller, handle: u32| -> u32 {
        let value = caller.data().heap.get(Handle(handle))?;
        Ok(abi_bool(matches!(value, HostValue::Null)))
    });

    host_fn!(linker, ns, Policy::Log, abi::IS_OBJECT, |caller, handle: u32| -> u32 {
        let value = caller.data().heap.get(Handle(handle))?;
        Ok(abi_bool(matches!(
            value,
            HostValue::Object(_) | HostValue::Error(_) | HostValue::Bytes(_)
        )))
    });

    host_fn!(linker, ns, Policy::Log, abi::IS_STRING, |caller, handle: u32| -> u32 {
        let value = caller.data().heap.get(Handle(handle))?;
        Ok(abi_bool(matches!(value, HostValue::String(_))))
    });

    host_fn!(linker, ns, Policy::Log, abi::IS_FUNCTION, |caller, handle: u32| -> u32 {
        let value = caller.data().heap.get(Handle(handle))?;
        Ok(abi_bool(
            matches!(value, HostValue::Function(_)) || as_closure(value).is_some(),
        ))
    });

    // The line's buffer belongs to the bridge once this is called.
    host_fn!(linker, ns, Policy::Log, abi::LOG, |caller, level: i32, ptr: u32, len: u32| -> () {
        let line = take_guest_string(caller, ptr, len)?;
        match level {
            abi::LOG_TRACE => trace!(target: "tether::guest", "{line}"),
            abi::LOG_DEBUG => debug!(target: "tether::guest", "{line}"),
            abi::LOG_INFO => info!(target: "tether::guest", "{line}"),
            abi::LOG_WARN => warn!(target: "tether::guest", "{line}"),
            _ => error!(target: "tether::guest", "{line}"),
        }
        Ok(())
    });

    Ok(())
}

fn link_exceptions<H: 'static>(linker: &mut Linker<HostState<H>>, ns: &str) -> BridgeResult<()> {
    host_fn!(linker, ns, Policy::Log, abi::THROW, |caller, ptr: u32, len: u32| -> () {
        let message = read_string(caller, ptr, len)?;
        Err(BridgeError::GuestAbort(message).into())
    });

    host_fn!(linker, ns, Policy::Log, abi::RETHROW, |caller, handle: u32| -> () {
        let handle = Handle(handle);
        let message = caller.data().heap.get(handle)?.debug_string();
        Err(BridgeError::HostThrow { handle, message }.into())
    });

    host_fn!(linker, ns, Policy::Log, abi::EXN_TAKE, |caller| -> u32 {
        let pending = caller.data_mut().take_pending_exception();
        Ok(pending.unwrap_or(Handle::NONE).0)
    });

    Ok(())
}

fn link_closures<H: 'static>(linker: &mut Linker<HostState<H>>, ns: &str) -> BridgeResult<()> {
    host_fn!(linker, ns, Policy::Log, abi::CLOSURE_NEW, |caller, a: u32, b: u32, dtor: u32, invoke: u32| -> u32 {
        let state = Rc::new(ClosureState::new(a, b, dtor, invoke));
        Ok(caller.data_mut().heap.alloc(closure_value(state))?.0)
    });

    // The module runs its own destructor when this returns 1.
    host_fn!(linker, ns, Policy::Log, abi::CB_DROP, |caller, handle: u32| -> u32 {
        let value = caller.data_mut().heap.take(Handle(handle))?;
        let closure = expect_closure(&value)?;
        match closure.release() {
            Release::Dispose(disposal) => {
                debug!(a = disposal.a, b = disposal.b, "closure released by module");
                Ok(1)
            }
            Release::Held | Release::Inert => Ok(0),
        }
    });

    Ok(())
}
