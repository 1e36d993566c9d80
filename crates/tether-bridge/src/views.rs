//! Typed views over the module's linear memory.
//!
//! A view is only valid while the buffer it was built from is unchanged.
//! When the module grows its memory the engine may move or resize the
//! backing buffer, so [`MemoryViews`] remembers the identity (base address
//! and length) of the buffer each cached view was built against and rebuilds
//! the view on the next access after the identity changes. The borrow on the
//! buffer makes it impossible to read through a view built before a call
//! that could have grown memory.

use std::marker::PhantomData;

use crate::error::{BridgeError, BridgeResult};

/// Element kinds with a cached view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    U8,
    I32,
    U32,
    F32,
    F64,
}

impl ElementKind {
    const COUNT: usize = 5;

    fn slot(self) -> usize {
        self as usize
    }
}

/// A little-endian scalar that can be projected out of linear memory.
pub trait Element: Copy + 'static {
    const KIND: ElementKind;
    const SIZE: usize;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
}

macro_rules! impl_element {
    ($ty:ty, $kind:ident) => {
        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$kind;
            const SIZE: usize = std::mem::size_of::<$ty>();

            #[inline]
            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$ty>::from_le_bytes(raw)
            }

            #[inline]
            fn write(self, bytes: &mut [u8]) {
                bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_element!(u8, U8);
impl_element!(i32, I32);
impl_element!(u32, U32);
impl_element!(f32, F32);
impl_element!(f64, F64);

/// Identity of a memory buffer: where it lives and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId {
    base: usize,
    len: usize,
}

impl BufferId {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            base: bytes.as_ptr() as usize,
            len: bytes.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedView {
    buffer: BufferId,
    elements: usize,
}

/// One cached view per element kind, rebuilt on buffer identity change.
#[derive(Debug, Default)]
pub struct MemoryViews {
    cached: [Option<CachedView>; ElementKind::COUNT],
    rebuilds: u64,
}

impl MemoryViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// A read-only view of `bytes` as elements of `T`.
    pub fn view<'a, T: Element>(&mut self, bytes: &'a [u8]) -> View<'a, T> {
        let elements = self.refresh::<T>(bytes);
        View {
            bytes: &bytes[..elements * T::SIZE],
            _elem: PhantomData,
        }
    }

    /// A writable view of `bytes` as elements of `T`.
    pub fn view_mut<'a, T: Element>(&mut self, bytes: &'a mut [u8]) -> ViewMut<'a, T> {
        let elements = self.refresh::<T>(bytes);
        ViewMut {
            bytes: &mut bytes[..elements * T::SIZE],
            _elem: PhantomData,
        }
    }

    /// Drop every cached view at once.
    pub fn invalidate(&mut self) {
        self.cached = [None; ElementKind::COUNT];
    }

    /// How many times any view has been (re)built.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Identity of the buffer the cached view of `kind` aliases, if any.
    pub fn cached_buffer(&self, kind: ElementKind) -> Option<BufferId> {
        self.cached[kind.slot()].map(|view| view.buffer)
    }

    fn refresh<T: Element>(&mut self, bytes: &[u8]) -> usize {
        let buffer = BufferId::of(bytes);
        let slot = &mut self.cached[T::KIND.slot()];
        match slot {
            Some(view) if view.buffer == buffer => view.elements,
            _ => {
                let elements = bytes.len() / T::SIZE;
                *slot = Some(CachedView { buffer, elements });
                self.rebuilds += 1;
                elements
            }
        }
    }
}

/// Read-only typed projection of linear memory.
#[derive(Clone, Copy)]
pub struct View<'a, T> {
    bytes: &'a [u8],
    _elem: PhantomData<T>,
}

impl<'a, T: Element> View<'a, T> {
    /// Number of whole elements in the view.
    pub fn len(&self) -> usize {
        self.bytes.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Element at `index` (element units, i.e. `ptr / size_of::<T>()`).
    pub fn get(&self, index: usize) -> Option<T> {
        let start = index.checked_mul(T::SIZE)?;
        self.bytes.get(start..start + T::SIZE).map(T::read)
    }

    /// The sub-range `start..start + len` in element units, without copying.
    pub fn subarray(&self, start: usize, len: usize) -> BridgeResult<View<'a, T>> {
        let range = byte_range::<T>(start, len, self.bytes.len())?;
        Ok(View {
            bytes: &self.bytes[range],
            _elem: PhantomData,
        })
    }

    /// The raw bytes backing the view.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        self.bytes.chunks_exact(T::SIZE).map(T::read)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

/// Writable typed projection of linear memory.
pub struct ViewMut<'a, T> {
    bytes: &'a mut [u8],
    _elem: PhantomData<T>,
}

impl<'a, T: Element> ViewMut<'a, T> {
    pub fn len(&self) -> usize {
        self.bytes.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        let start = index.checked_mul(T::SIZE)?;
        self.bytes.get(start..start + T::SIZE).map(T::read)
    }

    pub fn set(&mut self, index: usize, value: T) -> BridgeResult<()> {
        let range = byte_range::<T>(index, 1, self.bytes.len())?;
        value.write(&mut self.bytes[range]);
        Ok(())
    }

    /// Writable sub-range in element units.
    pub fn subarray_mut(&mut self, start: usize, len: usize) -> BridgeResult<&mut [u8]> {
        let range = byte_range::<T>(start, len, self.bytes.len())?;
        Ok(&mut self.bytes[range])
    }
}

fn byte_range<T: Element>(
    start: usize,
    len: usize,
    available: usize,
) -> BridgeResult<std::ops::Range<usize>> {
    let out_of_bounds = || BridgeError::OutOfBounds {
        ptr: (start as u64).saturating_mul(T::SIZE as u64),
        len: (len as u64).saturating_mul(T::SIZE as u64),
        memory_len: available,
    };
    let begin = start.checked_mul(T::SIZE).ok_or_else(out_of_bounds)?;
    let end = len
        .checked_mul(T::SIZE)
        .and_then(|n| begin.checked_add(n))
        .ok_or_else(out_of_bounds)?;
    if end > available {
        return Err(out_of_bounds());
    }
    Ok(begin..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_reads_little_endian_words() {
        let mut mem = vec![0u8; 16];
        mem[4..8].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        let mut views = MemoryViews::new();
        let words = views.view::<u32>(&mem);
        assert_eq!(words.len(), 4);
        assert_eq!(words.get(1), Some(0x1234_5678));
    }

    #[test]
    fn cached_view_is_reused_for_same_buffer() {
        let mem = vec![0u8; 64];
        let mut views = MemoryViews::new();
        views.view::<f32>(&mem);
        views.view::<f32>(&mem);
        assert_eq!(views.rebuilds(), 1);
    }

    #[test]
    fn replaced_buffer_rebuilds_every_kind() {
        let old = vec![1u8; 64];
        let mut views = MemoryViews::new();
        views.view::<u8>(&old);
        views.view::<i32>(&old);
        assert_eq!(views.cached_buffer(ElementKind::U8), Some(BufferId::of(&old)));

        let mut grown = vec![0u8; 128];
        grown[100] = 42;
        let bytes = views.view::<u8>(&grown);
        assert_eq!(bytes.len(), 128);
        assert_eq!(bytes.get(100), Some(42));
        let words = views.view::<i32>(&grown);
        assert_eq!(words.len(), 32);
        assert_eq!(views.cached_buffer(ElementKind::I32), Some(BufferId::of(&grown)));
        assert_eq!(views.rebuilds(), 4);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let mem = vec![0u8; 8];
        let mut views = MemoryViews::new();
        views.view::<u8>(&mem);
        views.invalidate();
        assert_eq!(views.cached_buffer(ElementKind::U8), None);
        views.view::<u8>(&mem);
        assert_eq!(views.rebuilds(), 2);
    }

    #[test]
    fn subarray_uses_element_units() {
        let mut mem = vec![0u8; 32];
        for (i, v) in [1.5f32, 2.5, 3.5].iter().enumerate() {
            mem[8 + i * 4..12 + i * 4].copy_from_slice(&v.to_le_bytes());
        }
        let mut views = MemoryViews::new();
        let floats = views.view::<f32>(&mem);
        let sub = floats.subarray(8 / 4, 3).unwrap();
        assert_eq!(sub.to_vec(), vec![1.5, 2.5, 3.5]);
        assert!(floats.subarray(7, 2).is_err());
    }

    #[test]
    fn set_writes_through() {
        let mut mem = vec![0u8; 16];
        let mut views = MemoryViews::new();
        {
            let mut doubles = views.view_mut::<f64>(&mut mem);
            doubles.set(1, 6.25).unwrap();
            assert!(doubles.set(2, 0.0).is_err());
        }
        assert_eq!(f64::from_le_bytes(mem[8..16].try_into().unwrap()), 6.25);
    }
}
