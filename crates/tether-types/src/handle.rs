use std::fmt;

/// Integer reference to a host-owned value, opaque to the module.
///
/// Handles `0..RESERVED` are permanently bound to the sentinel values
/// `undefined`, `null`, `true` and `false`. They are never returned by the
/// handle table's allocator and freeing them is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

impl Handle {
    pub const UNDEFINED: Self = Self(0);
    pub const NULL: Self = Self(1);
    pub const TRUE: Self = Self(2);
    pub const FALSE: Self = Self(3);

    /// Number of permanently reserved handles.
    pub const RESERVED: u32 = 4;

    /// Handle used for "no value" in object-returning calls.
    pub const NONE: Self = Self::UNDEFINED;

    /// Raw index, as passed across the boundary.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Whether this handle is one of the fixed sentinels.
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::RESERVED
    }

    /// The sentinel handle for a boolean.
    #[inline]
    pub const fn from_bool(b: bool) -> Self {
        if b {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }
}

impl From<u32> for Handle {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
