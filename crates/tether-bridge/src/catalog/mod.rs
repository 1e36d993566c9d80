//! Host catalogue: pass-through bindings for graphics, events and timers.
//!
//! Each binding decodes its raw arguments through the marshalling layer,
//! calls the host object, and encodes the result. None of them contain bridge
//! logic of their own.

pub mod dom;
pub mod gl;
pub mod timers;

use wasmi::Linker;

use crate::error::BridgeResult;
use crate::state::HostState;

/// Register every catalogue import under `ns`.
pub fn link<H: 'static>(linker: &mut Linker<HostState<H>>, ns: &str) -> BridgeResult<()> {
    gl::link(linker, ns)?;
    dom::link(linker, ns)?;
    timers::link(linker, ns)
}
