//! Conversions between module encodings (pointer/length pairs, numeric tags,
//! out-parameter pairs) and host values.
//!
//! # Out-parameter layouts
//!
//! | Shape           | `retptr+0`     | `retptr+4` | `retptr+8`   |
//! |-----------------|----------------|------------|--------------|
//! | optional number | i32 present    | (padding)  | f64 value    |
//! | optional string | i32 ptr (0=no) | i32 len    |              |
//!
//! Offsets are byte offsets; `retptr` need not be aligned.

use std::any::Any;
use std::rc::Rc;

use tether_types::{Handle, HostValue};
use wasmi::{AsContext, AsContextMut, Memory};

use crate::error::{BridgeError, BridgeResult};
use crate::heap::HandleTable;
use crate::state::{GuestExports, HostState};
use crate::views::{Element, View};

/// `boolean_get` result for a value that is not a boolean.
pub const NOT_A_BOOLEAN: u32 = 2;

// ══════════════════════════════════════════════════════════════════════════════
// Export access
// ══════════════════════════════════════════════════════════════════════════════

pub(crate) fn exports_of<C, H>(ctx: &C) -> BridgeResult<GuestExports>
where
    C: AsContext<Data = HostState<H>>,
{
    ctx.as_context().data().exports().cloned()
}

fn memory_of<C, H>(ctx: &C) -> BridgeResult<Memory>
where
    C: AsContext<Data = HostState<H>>,
{
    Ok(ctx.as_context().data().exports()?.memory)
}

// ══════════════════════════════════════════════════════════════════════════════
// Strings: module → host
// ══════════════════════════════════════════════════════════════════════════════

/// Strict UTF-8 decode; never substitutes replacement characters.
pub fn decode_utf8(bytes: &[u8], ptr: u32, len: u32) -> BridgeResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| BridgeError::Decode {
            ptr,
            len,
            valid_up_to: e.valid_up_to(),
        })
}

/// Decode `len` bytes at `ptr` as a UTF-8 string.
pub fn read_string<C, H>(ctx: &mut C, ptr: u32, len: u32) -> BridgeResult<String>
where
    C: AsContextMut<Data = HostState<H>>,
{
    with_slice::<u8, _, _, _>(ctx, ptr, len, |bytes, _| {
        decode_utf8(bytes.as_bytes(), ptr, len)
    })?
}

/// Decode a string whose buffer the module hands over, then release the
/// buffer through the module's `free` export when it has one.
///
/// The buffer is released even when decoding fails.
pub fn take_guest_string<C, H>(ctx: &mut C, ptr: u32, len: u32) -> BridgeResult<String>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let decoded = read_string(ctx, ptr, len);
    if let Some(free) = exports_of(ctx)?.free {
        free.call(&mut *ctx, (ptr, len))?;
    }
    decoded
}

// ══════════════════════════════════════════════════════════════════════════════
// Strings: host → module
// ══════════════════════════════════════════════════════════════════════════════

/// Copy `s` into freshly allocated module memory and return its pointer.
///
/// The allocation starts at the string's UTF-16 length and is filled one
/// byte per character while the input stays ASCII. At the first non-ASCII
/// character (offset `k`) it is grown with the module's `realloc` to
/// `k + remaining_utf16_units * 3`, which bounds the UTF-8 encoding of the
/// rest. Without a `realloc` export the exact UTF-8 length is allocated up
/// front.
///
/// The written byte length goes to the single-slot
/// [`HostState::take_write_len`], which the caller must read before any other
/// marshalling call.
pub fn pass_string<C, H>(ctx: &mut C, s: &str) -> BridgeResult<u32>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let exports = exports_of(ctx)?;

    let Some(realloc) = exports.realloc else {
        let ptr = exports.malloc.call(&mut *ctx, s.len() as u32)?;
        write_bytes(ctx, ptr, s.as_bytes())?;
        ctx.as_context_mut().data_mut().last_write_len = s.len() as u32;
        return Ok(ptr);
    };

    let utf16_len = s.encode_utf16().count();
    let mut len = utf16_len as u32;
    let mut ptr = exports.malloc.call(&mut *ctx, len)?;

    let ascii = s.bytes().take_while(u8::is_ascii).count();
    write_bytes(ctx, ptr, &s.as_bytes()[..ascii])?;
    let mut offset = ascii as u32;

    if ascii != utf16_len {
        let rest = &s[ascii..];
        let remaining_units = (utf16_len - ascii) as u32;
        let new_len = offset + remaining_units * 3;
        ptr = realloc.call(&mut *ctx, (ptr, len, new_len))?;
        len = new_len;
        debug_assert!(offset as usize + rest.len() <= len as usize);
        write_bytes(ctx, ptr + offset, rest.as_bytes())?;
        offset += rest.len() as u32;
    }

    ctx.as_context_mut().data_mut().last_write_len = offset;
    Ok(ptr)
}

/// Write an optional string as a `[ptr, len]` out-pair. Absent is `[0, 0]`.
pub fn write_string_pair<C, H>(ctx: &mut C, retptr: u32, value: Option<&str>) -> BridgeResult<()>
where
    C: AsContextMut<Data = HostState<H>>,
{
    let (ptr, len) = match value {
        Some(s) => {
            let ptr = pass_string(ctx, s)?;
            let len = ctx.as_context_mut().data_mut().take_write_len();
            (ptr, len)
        }
        None => (0, 0),
    };
    let mut pair = [0u8; 8];
    pair[..4].copy_from_slice(&ptr.to_le_bytes());
    pair[4..].copy_from_slice(&len.to_le_bytes());
    write_bytes(ctx, retptr, &pair)
}

/// Write an optional number as a `[present, value]` out-pair.
pub fn write_number_pair<C, H>(ctx: &mut C, retptr: u32, value: Option<f64>) -> BridgeResult<()>
where
    C: AsContextMut<Data = HostState<H>>,
{
    write_bytes(ctx, retptr.saturating_add(8), &value.unwrap_or(0.0).to_le_bytes())?;
    write_bytes(ctx, retptr, &i32::from(value.is_some()).to_le_bytes())
}

// ══════════════════════════════════════════════════════════════════════════════
// Buffers
// ══════════════════════════════════════════════════════════════════════════════

/// Run `f` over the `len`-element range at byte offset `ptr`, without copying.
///
/// The range aliases the current memory buffer; `f` also receives the host
/// state so it can resolve handles while the range is borrowed.
pub fn with_slice<T, C, H, R>(
    ctx: &mut C,
    ptr: u32,
    len: u32,
    f: impl FnOnce(View<'_, T>, &mut HostState<H>) -> R,
) -> BridgeResult<R>
where
    T: Element,
    C: AsContextMut<Data = HostState<H>>,
{
    let memory = memory_of(ctx)?;
    let (bytes, state) = memory.data_and_store_mut(ctx.as_context_mut());
    let view = state.views.view::<T>(bytes);
    let range = view.subarray(ptr as usize / T::SIZE, len as usize)?;
    Ok(f(range, state))
}

/// Run `f` with a writable view of the whole memory.
pub fn with_view_mut<T, C, H, R>(
    ctx: &mut C,
    f: impl FnOnce(&mut crate::views::ViewMut<'_, T>) -> R,
) -> BridgeResult<R>
where
    T: Element,
    C: AsContextMut<Data = HostState<H>>,
{
    let memory = memory_of(ctx)?;
    let (bytes, state) = memory.data_and_store_mut(ctx.as_context_mut());
    let mut view = state.views.view_mut::<T>(bytes);
    Ok(f(&mut view))
}

/// Owned copy of `len` bytes at `ptr`, for host APIs that keep the buffer.
pub fn read_bytes<C, H>(ctx: &mut C, ptr: u32, len: u32) -> BridgeResult<Vec<u8>>
where
    C: AsContextMut<Data = HostState<H>>,
{
    with_slice::<u8, _, _, _>(ctx, ptr, len, |bytes, _| bytes.as_bytes().to_vec())
}

/// Copy `data` into module memory at `ptr`.
pub fn write_bytes<C, H>(ctx: &mut C, ptr: u32, data: &[u8]) -> BridgeResult<()>
where
    C: AsContextMut<Data = HostState<H>>,
{
    with_view_mut::<u8, _, _, _>(ctx, |bytes| {
        bytes
            .subarray_mut(ptr as usize, data.len())
            .map(|dst| dst.copy_from_slice(data))
    })?
}

// ══════════════════════════════════════════════════════════════════════════════
// Handles and scalars
// ══════════════════════════════════════════════════════════════════════════════

/// Store a result that may be absent: `undefined`/`null` become handle 0.
pub fn opt_handle(heap: &mut HandleTable, value: HostValue) -> BridgeResult<u32> {
    if value.is_like_none() {
        Ok(Handle::NONE.0)
    } else {
        heap.alloc(value).map(u32::from)
    }
}

/// `boolean_get` encoding: 1 true, 0 false, [`NOT_A_BOOLEAN`] otherwise.
pub fn boolean_code(value: &HostValue) -> u32 {
    match value {
        HostValue::Bool(true) => 1,
        HostValue::Bool(false) => 0,
        _ => NOT_A_BOOLEAN,
    }
}

pub fn expect_bool(value: &HostValue) -> BridgeResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| BridgeError::mismatch("boolean", value))
}

pub fn expect_number(value: &HostValue) -> BridgeResult<f64> {
    value
        .as_number()
        .ok_or_else(|| BridgeError::mismatch("number", value))
}

pub fn expect_str(value: &HostValue) -> BridgeResult<&str> {
    value
        .as_str()
        .ok_or_else(|| BridgeError::mismatch("string", value))
}

/// Downcast to a concrete host object, failing with `TypeMismatch`.
pub fn expect_object<T: Any>(value: &HostValue, expected: &'static str) -> BridgeResult<Rc<T>> {
    value
        .as_object()
        .and_then(|obj| obj.downcast_rc::<T>())
        .ok_or_else(|| BridgeError::mismatch(expected, value))
}

/// Resolve a handle to a concrete host object.
pub fn object_arg<T: Any>(
    heap: &HandleTable,
    handle: u32,
    expected: &'static str,
) -> BridgeResult<Rc<T>> {
    expect_object(heap.get(Handle(handle))?, expected)
}

/// Boolean result as the module sees it.
#[inline]
pub fn abi_bool(b: bool) -> u32 {
    u32::from(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_decode_rejects_invalid_sequences() {
        let err = decode_utf8(&[b'o', b'k', 0xFF, b'!'], 64, 4).unwrap_err();
        assert_eq!(
            err,
            BridgeError::Decode {
                ptr: 64,
                len: 4,
                valid_up_to: 2
            }
        );
    }

    #[test]
    fn decode_multibyte() {
        assert_eq!(decode_utf8("héllo ✓".as_bytes(), 0, 9).unwrap(), "héllo ✓");
    }

    #[test]
    fn opt_handle_maps_none_to_zero() {
        let mut heap = HandleTable::new();
        assert_eq!(opt_handle(&mut heap, HostValue::Undefined).unwrap(), 0);
        assert_eq!(opt_handle(&mut heap, HostValue::Null).unwrap(), 0);
        let h = opt_handle(&mut heap, HostValue::Bool(false)).unwrap();
        assert!(h >= Handle::RESERVED);
        assert_eq!(heap.live(), 1);
    }

    #[test]
    fn boolean_codes() {
        assert_eq!(boolean_code(&HostValue::Bool(true)), 1);
        assert_eq!(boolean_code(&HostValue::Bool(false)), 0);
        assert_eq!(boolean_code(&HostValue::Number(1.0)), NOT_A_BOOLEAN);
    }

    #[test]
    fn assertions_fail_fast() {
        assert_eq!(
            expect_bool(&HostValue::Number(0.0)).unwrap_err(),
            BridgeError::TypeMismatch {
                expected: "boolean",
                found: "number"
            }
        );
        assert_eq!(expect_number(&HostValue::Number(2.5)).unwrap(), 2.5);
        assert!(expect_str(&HostValue::Null).is_err());
    }

    #[test]
    fn object_downcast() {
        struct Socket;
        let value = HostValue::object(Socket);
        assert!(expect_object::<Socket>(&value, "Socket").is_ok());
        assert!(expect_object::<String>(&value, "String").is_err());
    }
}
