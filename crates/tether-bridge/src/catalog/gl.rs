//! Software graphics context and its import bindings.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tether_types::HostValue;
use wasmi::Linker;

use crate::error::BridgeResult;
use crate::host_fn;
use crate::marshal::{
    abi_bool, object_arg, opt_handle, read_bytes, read_string, with_slice, write_string_pair,
};
use crate::relay::{Fault, Policy};
use crate::state::HostState;

/// Returned by `getUniformBlockIndex` for a block the program does not have.
pub const GL_INVALID_INDEX: u32 = 0xFFFF_FFFF;

pub const GL_VENDOR: u32 = 0x1F00;
pub const GL_RENDERER: u32 = 0x1F01;
pub const GL_VERSION: u32 = 0x1F02;
pub const GL_MAX_TEXTURE_SIZE: u32 = 0x0D33;

/// A linked program.
#[derive(Debug, Default)]
pub struct GlProgram {
    uniform_blocks: Vec<String>,
    info_log: Option<String>,
}

impl GlProgram {
    pub fn new(uniform_blocks: &[&str]) -> Self {
        Self {
            uniform_blocks: uniform_blocks.iter().map(|s| s.to_string()).collect(),
            info_log: None,
        }
    }

    pub fn with_info_log(mut self, log: &str) -> Self {
        self.info_log = Some(log.to_string());
        self
    }
}

/// A buffer object; owns a copy of the data uploaded to it.
#[derive(Debug)]
pub struct GlBuffer {
    id: u32,
    data: RefCell<Vec<u8>>,
}

impl GlBuffer {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

/// One `clearBufferfv` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearRecord {
    pub drawbuffer: u32,
    pub color: [f32; 4],
}

/// Headless rendering context recording the calls made on it.
#[derive(Debug, Default)]
pub struct GlContext {
    lost: Cell<bool>,
    next_buffer: Cell<u32>,
    clears: RefCell<Vec<ClearRecord>>,
}

impl GlContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lose_context(&self) {
        self.lost.set(true);
    }

    pub fn is_context_lost(&self) -> bool {
        self.lost.get()
    }

    pub fn clears(&self) -> Vec<ClearRecord> {
        self.clears.borrow().clone()
    }

    pub fn get_uniform_block_index(&self, program: &GlProgram, name: &str) -> u32 {
        program
            .uniform_blocks
            .iter()
            .position(|block| block == name)
            .map_or(GL_INVALID_INDEX, |idx| idx as u32)
    }

    /// `None` once the context is lost.
    pub fn create_buffer(&self) -> Option<GlBuffer> {
        if self.lost.get() {
            return None;
        }
        let id = self.next_buffer.get() + 1;
        self.next_buffer.set(id);
        Some(GlBuffer {
            id,
            data: RefCell::new(Vec::new()),
        })
    }

    pub fn buffer_data(&self, buffer: &GlBuffer, data: Vec<u8>) {
        *buffer.data.borrow_mut() = data;
    }

    /// Reads the first four components; missing ones are zero.
    pub fn clear_bufferfv(&self, drawbuffer: u32, values: impl IntoIterator<Item = f32>) {
        let mut color = [0.0; 4];
        for (slot, value) in color.iter_mut().zip(values) {
            *slot = value;
        }
        self.clears.borrow_mut().push(ClearRecord { drawbuffer, color });
    }

    pub fn get_parameter(&self, pname: u32) -> Result<HostValue, HostValue> {
        match pname {
            GL_VENDOR => Ok(HostValue::from("tether")),
            GL_RENDERER => Ok(HostValue::from("tether software rasterizer")),
            GL_VERSION => Ok(HostValue::from("WebGL 2.0 (tether)")),
            GL_MAX_TEXTURE_SIZE => Ok(HostValue::Number(4096.0)),
            _ => Err(HostValue::error(
                "InvalidEnum",
                &format!("getParameter: invalid parameter name 0x{pname:04X}"),
            )),
        }
    }

    pub fn get_program_info_log(&self, program: &GlProgram) -> Option<String> {
        program.info_log.clone()
    }
}

pub(crate) fn link<H: 'static>(
    linker: &mut Linker<HostState<H>>,
    ns: &str,
) -> BridgeResult<()> {
    host_fn!(linker, ns, Policy::Log, "gl_get_uniform_block_index", |caller, ctx: u32, program: u32, ptr: u32, len: u32| -> u32 {
        let name = read_string(caller, ptr, len)?;
        let heap = &caller.data().heap;
        let gl = object_arg::<GlContext>(heap, ctx, "GlContext")?;
        let program = object_arg::<GlProgram>(heap, program, "GlProgram")?;
        Ok(gl.get_uniform_block_index(&program, &name))
    });

    host_fn!(linker, ns, Policy::Log, "gl_create_buffer", |caller, ctx: u32| -> u32 {
        let heap = &mut caller.data_mut().heap;
        let gl = object_arg::<GlContext>(heap, ctx, "GlContext")?;
        let buffer = gl
            .create_buffer()
            .map_or(HostValue::Null, HostValue::object);
        Ok(opt_handle(heap, buffer)?)
    });

    host_fn!(linker, ns, Policy::Log, "gl_buffer_data", |caller, ctx: u32, buffer: u32, ptr: u32, len: u32| -> () {
        let data = read_bytes(caller, ptr, len)?;
        let heap = &caller.data().heap;
        let gl = object_arg::<GlContext>(heap, ctx, "GlContext")?;
        let buffer: Rc<GlBuffer> = object_arg(heap, buffer, "GlBuffer")?;
        gl.buffer_data(&buffer, data);
        Ok(())
    });

    host_fn!(linker, ns, Policy::Log, "gl_clear_bufferfv", |caller, ctx: u32, drawbuffer: u32, ptr: u32, len: u32| -> () {
        with_slice::<f32, _, _, _>(caller, ptr, len, |values, state| -> BridgeResult<()> {
            let gl = object_arg::<GlContext>(&state.heap, ctx, "GlContext")?;
            gl.clear_bufferfv(drawbuffer, values.iter());
            Ok(())
        })??;
        Ok(())
    });

    host_fn!(linker, ns, Policy::Catch, "gl_get_parameter", |caller, ctx: u32, pname: u32| -> u32 {
        let heap = &mut caller.data_mut().heap;
        let gl = object_arg::<GlContext>(heap, ctx, "GlContext")?;
        let value = gl.get_parameter(pname).map_err(Fault::Throw)?;
        Ok(opt_handle(heap, value)?)
    });

    host_fn!(linker, ns, Policy::Log, "gl_get_program_info_log", |caller, retptr: u32, ctx: u32, program: u32| -> () {
        let heap = &caller.data().heap;
        let gl = object_arg::<GlContext>(heap, ctx, "GlContext")?;
        let program = object_arg::<GlProgram>(heap, program, "GlProgram")?;
        let log = gl.get_program_info_log(&program);
        Ok(write_string_pair(caller, retptr, log.as_deref())?)
    });

    host_fn!(linker, ns, Policy::Log, "gl_is_context_lost", |caller, ctx: u32| -> u32 {
        let gl = object_arg::<GlContext>(&caller.data().heap, ctx, "GlContext")?;
        Ok(abi_bool(gl.is_context_lost()))
    });

    Ok(())
}
