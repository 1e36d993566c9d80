//! One-shot timers driven by the embedder's clock.

use std::collections::BTreeMap;

use tether_types::HostValue;
use tracing::warn;
use wasmi::{AsContext, AsContextMut, Linker};

use crate::closure::as_closure;
use crate::error::BridgeResult;
use crate::host_fn;
use crate::relay::{Fault, Policy};
use crate::state::HostState;
use crate::trampoline::{drop_closure, invoke_closure};

/// Pending timers ordered by `(deadline, id)`.
#[derive(Debug, Default)]
pub struct TimerQueue {
    now: u64,
    next_id: u32,
    pending: BTreeMap<(u64, u32), HostValue>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds elapsed since the queue was created.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Schedule `callback` to fire `delay_ms` from now. Ids start at 1.
    pub fn set(&mut self, callback: HostValue, delay_ms: u64) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.pending
            .insert((self.now.saturating_add(delay_ms), id), callback);
        id
    }

    /// Unschedule timer `id`, returning its callback if it had not fired.
    pub fn clear(&mut self, id: u32) -> Option<HostValue> {
        let key = *self.pending.keys().find(|(_, pending)| *pending == id)?;
        self.pending.remove(&key)
    }

    /// Remove the earliest timer due at or before `until`, moving the clock
    /// to its deadline.
    pub fn pop_due(&mut self, until: u64) -> Option<(u32, HostValue)> {
        let (&(deadline, id), _) = self.pending.first_key_value()?;
        if deadline > until {
            return None;
        }
        let callback = self.pending.remove(&(deadline, id))?;
        self.now = self.now.max(deadline);
        Some((id, callback))
    }

    fn settle(&mut self, until: u64) {
        self.now = self.now.max(until);
    }
}

/// Move the clock forward by `ms` and fire every timer that falls due, in
/// `(deadline, id)` order. Timers scheduled by a callback fire in the same
/// pass when their deadline is within the window. Returns the number fired.
pub fn advance<C, H>(ctx: &mut C, ms: u64) -> BridgeResult<usize>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let until = ctx.as_context().data().timers.now().saturating_add(ms);
    let mut fired = 0;
    loop {
        let due = ctx.as_context_mut().data_mut().timers.pop_due(until);
        let Some((id, callback)) = due else { break };
        fire(ctx, id, &callback)?;
        fired += 1;
    }
    ctx.as_context_mut().data_mut().timers.settle(until);
    Ok(fired)
}

fn fire<C, H>(ctx: &mut C, id: u32, callback: &HostValue) -> BridgeResult<()>
where
    C: AsContextMut<Data = HostState<H>>,
{
    if let Some(closure) = as_closure(callback) {
        let result = invoke_closure(ctx, &closure, &[]);
        drop_closure(ctx, &closure)?;
        result?;
    } else if let HostValue::Function(native) = callback {
        if let Err(thrown) = native.call(&[]) {
            warn!(id, thrown = %thrown.debug_string(), "timer callback threw");
        }
    }
    Ok(())
}

pub(crate) fn link<H: 'static>(
    linker: &mut Linker<HostState<H>>,
    ns: &str,
) -> BridgeResult<()> {
    host_fn!(linker, ns, Policy::Catch, "timers_set_timeout", |caller, callback: u32, delay: u32| -> u32 {
        let value = caller.data().heap.get(callback.into())?.clone();
        if !matches!(value, HostValue::Function(_)) {
            let closure = as_closure(&value).ok_or_else(|| {
                Fault::Throw(HostValue::error("TypeError", "timer callback is not callable"))
            })?;
            closure.retain()?;
        }
        Ok(caller.data_mut().timers.set(value, u64::from(delay)))
    });

    host_fn!(linker, ns, Policy::Log, "timers_clear_timeout", |caller, id: u32| -> () {
        if let Some(callback) = caller.data_mut().timers.clear(id) {
            if let Some(closure) = as_closure(&callback) {
                drop_closure(caller, &closure)?;
            }
        }
        Ok(())
    });

    host_fn!(linker, ns, Policy::Log, "timers_now", |caller| -> f64 {
        Ok(caller.data().timers.now() as f64)
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_then_id_order() {
        let mut queue = TimerQueue::new();
        let late = queue.set(HostValue::from("late"), 20);
        let first = queue.set(HostValue::from("first"), 5);
        let second = queue.set(HostValue::from("second"), 5);

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop_due(30).map(|(id, _)| id)).collect();
        assert_eq!(order, vec![first, second, late]);
        assert_eq!(queue.now(), 20);
    }

    #[test]
    fn not_yet_due_stays_queued() {
        let mut queue = TimerQueue::new();
        queue.set(HostValue::Null, 10);
        assert!(queue.pop_due(9).is_none());
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(10).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_returns_callback_once() {
        let mut queue = TimerQueue::new();
        let id = queue.set(HostValue::from("cb"), 1);
        let callback = queue.clear(id).unwrap();
        assert_eq!(callback.as_str(), Some("cb"));
        assert!(queue.clear(id).is_none());
        assert!(queue.pop_due(100).is_none());
    }

    #[test]
    fn delays_are_relative_to_clock() {
        let mut queue = TimerQueue::new();
        queue.settle(50);
        queue.set(HostValue::Null, 10);
        assert!(queue.pop_due(59).is_none());
        assert!(queue.pop_due(60).is_some());
    }
}
