//! Event targets with listener lists.

use std::cell::RefCell;

use tether_types::HostValue;
use tracing::warn;
use wasmi::{AsContextMut, Linker};

use crate::closure::as_closure;
use crate::error::BridgeResult;
use crate::host_fn;
use crate::marshal::{object_arg, read_string};
use crate::relay::{Fault, HostResult, Policy};
use crate::state::HostState;
use crate::trampoline::{drop_closure, invoke_closure};

#[derive(Debug)]
struct Listener {
    event: String,
    callback: HostValue,
}

/// A DOM-style event target.
#[derive(Debug, Default)]
pub struct EventTarget {
    listeners: RefCell<Vec<Listener>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`.
    ///
    /// Adding the same callback twice for one event is a no-op. A closure
    /// gains a reference for as long as it stays registered.
    pub fn add_event_listener(&self, event: &str, callback: HostValue) -> HostResult<()> {
        let closure = as_closure(&callback);
        if closure.is_none() && !matches!(callback, HostValue::Function(_)) {
            return Err(Fault::Throw(HostValue::error(
                "TypeError",
                "addEventListener: listener is not callable",
            )));
        }
        if self.position(event, &callback).is_some() {
            return Ok(());
        }
        if let Some(closure) = closure {
            closure.retain()?;
        }
        self.listeners.borrow_mut().push(Listener {
            event: event.to_string(),
            callback,
        });
        Ok(())
    }

    /// Unregister `callback`, returning it so the caller can release it.
    pub fn remove_event_listener(&self, event: &str, callback: &HostValue) -> Option<HostValue> {
        let idx = self.position(event, callback)?;
        Some(self.listeners.borrow_mut().remove(idx).callback)
    }

    /// Snapshot of the callbacks registered for `event`, in registration order.
    pub fn listeners(&self, event: &str) -> Vec<HostValue> {
        self.listeners
            .borrow()
            .iter()
            .filter(|l| l.event == event)
            .map(|l| l.callback.clone())
            .collect()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.borrow().iter().filter(|l| l.event == event).count()
    }

    fn position(&self, event: &str, callback: &HostValue) -> Option<usize> {
        self.listeners
            .borrow()
            .iter()
            .position(|l| l.event == event && l.callback.same_ref(callback))
    }
}

/// Run every listener of `event` on `target` with `payload`.
///
/// Listeners added or removed while dispatching do not affect the current
/// dispatch. A native listener that throws is reported and skipped.
pub fn dispatch<C, H>(
    ctx: &mut C,
    target: &EventTarget,
    event: &str,
    payload: &HostValue,
) -> BridgeResult<u32>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let mut ran = 0;
    for callback in target.listeners(event) {
        if let Some(closure) = as_closure(&callback) {
            invoke_closure(ctx, &closure, std::slice::from_ref(payload))?;
        } else if let HostValue::Function(native) = &callback {
            if let Err(thrown) = native.call(std::slice::from_ref(payload)) {
                warn!(event, listener = %native.name, thrown = %thrown.debug_string(), "event listener threw");
            }
        }
        ran += 1;
    }
    Ok(ran)
}

pub(crate) fn link<H: 'static>(
    linker: &mut Linker<HostState<H>>,
    ns: &str,
) -> BridgeResult<()> {
    host_fn!(linker, ns, Policy::Log, "dom_create_event_target", |caller| -> u32 {
        let handle = caller.data_mut().heap.alloc(HostValue::object(EventTarget::new()))?;
        Ok(handle.0)
    });

    host_fn!(linker, ns, Policy::Catch, "dom_add_event_listener", |caller, target: u32, ptr: u32, len: u32, listener: u32| -> () {
        let event = read_string(caller, ptr, len)?;
        let heap = &caller.data().heap;
        let target = object_arg::<EventTarget>(heap, target, "EventTarget")?;
        let callback = heap.get(listener.into())?.clone();
        target.add_event_listener(&event, callback)
    });

    host_fn!(linker, ns, Policy::Log, "dom_remove_event_listener", |caller, target: u32, ptr: u32, len: u32, listener: u32| -> () {
        let event = read_string(caller, ptr, len)?;
        let heap = &caller.data().heap;
        let target = object_arg::<EventTarget>(heap, target, "EventTarget")?;
        let callback = heap.get(listener.into())?.clone();
        if let Some(closure) = target
            .remove_event_listener(&event, &callback)
            .as_ref()
            .and_then(as_closure)
        {
            drop_closure(caller, &closure)?;
        }
        Ok(())
    });

    host_fn!(linker, ns, Policy::Log, "dom_dispatch_event", |caller, target: u32, ptr: u32, len: u32, payload: u32| -> u32 {
        let event = read_string(caller, ptr, len)?;
        let heap = &caller.data().heap;
        let target = object_arg::<EventTarget>(heap, target, "EventTarget")?;
        let payload = heap.get(payload.into())?.clone();
        Ok(dispatch(caller, &target, &event, &payload)?)
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use tether_types::NativeFn;

    use super::*;
    use crate::closure::{closure_value, ClosureState};

    #[test]
    fn rejects_non_callable_listener() {
        let target = EventTarget::new();
        let err = target
            .add_event_listener("click", HostValue::Number(1.0))
            .unwrap_err();
        assert!(matches!(err, Fault::Throw(HostValue::Error(e)) if &*e.name == "TypeError"));
        assert_eq!(target.listener_count("click"), 0);
    }

    #[test]
    fn duplicate_listener_is_ignored() {
        let target = EventTarget::new();
        let state = Rc::new(ClosureState::new(8, 16, 2, 1));
        let listener = closure_value(Rc::clone(&state));
        target.add_event_listener("click", listener.clone()).unwrap();
        target.add_event_listener("click", listener.clone()).unwrap();
        assert_eq!(target.listener_count("click"), 1);
        assert_eq!(state.refs(), 2);

        let removed = target.remove_event_listener("click", &listener).unwrap();
        assert!(removed.same_ref(&listener));
        assert_eq!(target.listener_count("click"), 0);
    }

    #[test]
    fn listeners_are_scoped_by_event() {
        let target = EventTarget::new();
        let native = HostValue::from(NativeFn::new("noop", |_| Ok(HostValue::Undefined)));
        target.add_event_listener("keydown", native.clone()).unwrap();
        assert_eq!(target.listeners("keyup").len(), 0);
        assert!(target.remove_event_listener("keyup", &native).is_none());
        assert_eq!(target.listeners("keydown").len(), 1);
    }
}
