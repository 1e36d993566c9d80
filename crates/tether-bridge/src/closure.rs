//! Closure registrations and their reference-counted lifetime.
//!
//! A registration wraps module-side state (two opaque words) and the
//! function-table slots of its entry point and destructor. Every holder of the
//! registration counts as one reference: the module itself, each in-flight
//! invocation, and each host event source it was handed to. The destructor
//! runs exactly once, when the last reference is released.
//!
//! While an invocation is in flight `a` reads as zero, so a reentrant drop
//! from inside the call can never dispose state that the caller above it on
//! the stack still uses.

use std::cell::Cell;
use std::rc::Rc;

use tether_types::{HostObject, HostValue};

use crate::error::{BridgeError, BridgeResult};

/// Host-side record of a module closure.
#[derive(Debug)]
pub struct ClosureState {
    a: Cell<u32>,
    b: u32,
    refs: Cell<u32>,
    dtor: u32,
    invoke: u32,
    inert: Cell<bool>,
}

/// Proof that an invocation holds a reference; hand it back to
/// [`ClosureState::leave`].
#[must_use]
#[derive(Debug)]
pub struct Entered {
    a: u32,
}

impl Entered {
    /// State word `a` as it was when the invocation started.
    pub fn a(&self) -> u32 {
        self.a
    }
}

/// Arguments for the module destructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposal {
    pub a: u32,
    pub b: u32,
    pub dtor: u32,
}

/// Outcome of releasing one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other holders remain.
    Held,
    /// That was the last reference; the destructor must run now.
    Dispose(Disposal),
    /// The registration was already disposed.
    Inert,
}

impl ClosureState {
    /// A fresh registration with one reference, owned by the module.
    pub fn new(a: u32, b: u32, dtor: u32, invoke: u32) -> Self {
        Self {
            a: Cell::new(a),
            b,
            refs: Cell::new(1),
            dtor,
            invoke,
            inert: Cell::new(false),
        }
    }

    pub fn b(&self) -> u32 {
        self.b
    }

    pub fn invoke_slot(&self) -> u32 {
        self.invoke
    }

    pub fn dtor_slot(&self) -> u32 {
        self.dtor
    }

    pub fn refs(&self) -> u32 {
        self.refs.get()
    }

    pub fn is_inert(&self) -> bool {
        self.inert.get()
    }

    /// Current value of `a`; zero while an invocation is in flight.
    pub fn current_a(&self) -> u32 {
        self.a.get()
    }

    /// Add a reference for a new holder (an event source).
    pub fn retain(&self) -> BridgeResult<()> {
        if self.inert.get() {
            return Err(BridgeError::ClosureDisposed);
        }
        self.refs.set(self.refs.get() + 1);
        Ok(())
    }

    /// Begin an invocation: take a reference and move `a` out.
    pub fn enter(&self) -> BridgeResult<Entered> {
        self.retain()?;
        Ok(Entered {
            a: self.a.replace(0),
        })
    }

    /// End an invocation. Restores `a` unless this was the last reference.
    pub fn leave(&self, entered: Entered) -> Release {
        let refs = self.refs.get().saturating_sub(1);
        self.refs.set(refs);
        if refs == 0 {
            self.inert.set(true);
            Release::Dispose(self.disposal(entered.a))
        } else {
            self.a.set(entered.a);
            Release::Held
        }
    }

    /// Drop one reference outside of an invocation.
    pub fn release(&self) -> Release {
        if self.inert.get() {
            return Release::Inert;
        }
        let refs = self.refs.get().saturating_sub(1);
        self.refs.set(refs);
        if refs == 0 {
            self.inert.set(true);
            Release::Dispose(self.disposal(self.a.replace(0)))
        } else {
            Release::Held
        }
    }

    fn disposal(&self, a: u32) -> Disposal {
        Disposal {
            a,
            b: self.b,
            dtor: self.dtor,
        }
    }
}

/// Wrap a registration as a storable host value.
pub fn closure_value(state: Rc<ClosureState>) -> HostValue {
    HostValue::Object(HostObject::from_rc(state))
}

/// The registration behind `value`, if it is one.
pub fn as_closure(value: &HostValue) -> Option<Rc<ClosureState>> {
    value.as_object()?.downcast_rc::<ClosureState>()
}

/// Like [`as_closure`] but a `TypeMismatch` for anything else.
pub fn expect_closure(value: &HostValue) -> BridgeResult<Rc<ClosureState>> {
    as_closure(value).ok_or_else(|| BridgeError::mismatch("closure", value))
}
