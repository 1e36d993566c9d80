//! Function bodies emitted into every guest module.
//!
//! Each emitter builds one `wasm_encoder::Function`. Callers pass in the
//! absolute indices of the functions a body calls, since those depend on how
//! many imports the module declares.

use wasm_encoder::{BlockType, Function, Instruction, MemArg, ValType};

use crate::types::*;

/// `malloc(size) -> ptr`
///
/// Bump allocator with 8-byte alignment. Grows memory by as many pages as the
/// request needs and traps if the memory cannot grow.
pub fn emit_malloc() -> Function {
    // locals: 1 = ptr, 2 = end
    let mut f = Function::new(vec![(2, ValType::I32)]);

    // ptr = align_up(heap_ptr)
    f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::I32Const(ALLOC_ALIGN as i32 - 1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(-(ALLOC_ALIGN as i32)));
    f.instruction(&Instruction::I32And);
    f.instruction(&Instruction::LocalSet(1));

    // end = ptr + size
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::LocalSet(2));

    // if end > memory bytes: grow by ceil((end - bytes) / PAGE_SIZE)
    f.instruction(&Instruction::LocalGet(2));
    emit_memory_bytes(&mut f);
    f.instruction(&Instruction::I32GtU);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(2));
    emit_memory_bytes(&mut f);
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::I32Const(PAGE_SIZE as i32 - 1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(16));
    f.instruction(&Instruction::I32ShrU);
    f.instruction(&Instruction::MemoryGrow(0));
    f.instruction(&Instruction::I32Const(-1));
    f.instruction(&Instruction::I32Eq);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::Unreachable);
    f.instruction(&Instruction::End);
    f.instruction(&Instruction::End);

    // heap_ptr = end; return ptr
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::GlobalSet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::End);
    f
}

fn emit_memory_bytes(f: &mut Function) {
    f.instruction(&Instruction::MemorySize(0));
    f.instruction(&Instruction::I32Const(16));
    f.instruction(&Instruction::I32Shl);
}

/// `realloc(ptr, old_size, new_size) -> ptr`
///
/// Shrinking keeps the block. Growing allocates a fresh block and copies the
/// old contents; the old block is abandoned to the bump heap.
pub fn emit_realloc(malloc_idx: u32) -> Function {
    // local 3: new_ptr
    let mut f = Function::new(vec![(1, ValType::I32)]);

    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32LeU);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::Return);
    f.instruction(&Instruction::End);

    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::Call(malloc_idx));
    f.instruction(&Instruction::LocalSet(3));

    // memory.copy(dst = new_ptr, src = ptr, len = old_size)
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::MemoryCopy {
        src_mem: 0,
        dst_mem: 0,
    });

    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::End);
    f
}

/// `free(ptr, size)`: the bump heap never reuses memory.
pub fn emit_free() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::End);
    f
}

/// `exn_store(handle)`
pub fn emit_exn_store() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::GlobalSet(GLOBAL_EXN_SLOT));
    f.instruction(&Instruction::End);
    f
}

/// `exn_last() -> handle`: read and clear.
pub fn emit_exn_last() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::GlobalGet(GLOBAL_EXN_SLOT));
    f.instruction(&Instruction::I32Const(0));
    f.instruction(&Instruction::GlobalSet(GLOBAL_EXN_SLOT));
    f.instruction(&Instruction::End);
    f
}

/// `grow(pages) -> old_pages` (-1 on failure).
pub fn emit_grow() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::MemoryGrow(0));
    f.instruction(&Instruction::End);
    f
}

/// `closure_invoke(a, b, arg) -> handle`: forwards to `harness.invoked`.
pub fn emit_closure_invoke(invoked_idx: u32) -> Function {
    let mut f = Function::new(vec![]);
    for param in 0..3 {
        f.instruction(&Instruction::LocalGet(param));
    }
    f.instruction(&Instruction::Call(invoked_idx));
    f.instruction(&Instruction::End);
    f
}

/// `closure_dtor(a, b)`: forwards to `harness.destroyed`.
pub fn emit_closure_dtor(destroyed_idx: u32) -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::Call(destroyed_idx));
    f.instruction(&Instruction::End);
    f
}

/// `closure_drop(handle, a, b)`: `cb_drop(handle)`, then the destructor if
/// the host says this was the last reference.
pub fn emit_closure_drop(cb_drop_idx: u32, dtor_idx: u32) -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::Call(cb_drop_idx));
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::Call(dtor_idx));
    f.instruction(&Instruction::End);
    f.instruction(&Instruction::End);
    f
}

/// A function that passes its `param_count` parameters straight to
/// `import_idx` and returns whatever it returns.
pub fn emit_proxy(param_count: u32, import_idx: u32) -> Function {
    let mut f = Function::new(vec![]);
    for param in 0..param_count {
        f.instruction(&Instruction::LocalGet(param));
    }
    f.instruction(&Instruction::Call(import_idx));
    f.instruction(&Instruction::End);
    f
}

/// Shorthand for a [`MemArg`] on memory 0.
pub fn memarg(offset: u64, align: u32) -> MemArg {
    MemArg {
        offset,
        align,
        memory_index: 0,
    }
}

/// `peek_i32(ptr) -> i32`, used to read out-parameter pairs from inside the
/// module.
pub fn emit_peek_i32() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Load(memarg(0, 2)));
    f.instruction(&Instruction::End);
    f
}
