//! Method attribute and method body flags.

use bitflags::bitflags;

/// Bitmask for the member access bits of `MethodAttributes`
pub const METHOD_ACCESS_MASK: u16 = 0x0007;

bitflags! {
    /// `MethodAttributes` (ECMA-335 II.23.1.10)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u16 {
        /// Accessible only within the type
        const PRIVATE = 0x0001;
        /// Accessible within the assembly
        const ASSEM = 0x0003;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance
        const STATIC = 0x0010;
        /// Can not be overridden
        const FINAL = 0x0020;
        /// Virtual dispatch
        const VIRTUAL = 0x0040;
        /// Hidden by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Gets a new vtable slot
        const NEW_SLOT = 0x0100;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Special name
        const SPECIAL_NAME = 0x0800;
        /// Runtime special name, such as `.ctor`
        const RTSPECIAL_NAME = 0x1000;
        /// Implemented through platform invoke
        const PINVOKE_IMPL = 0x2000;
    }
}

bitflags! {
    /// `MethodImplAttributes` (ECMA-335 II.23.1.11)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodImplAttributes: u16 {
        /// Native code
        const NATIVE = 0x0001;
        /// Provided by the runtime
        const RUNTIME = 0x0003;
        /// Unmanaged code
        const UNMANAGED = 0x0004;
        /// Must not be inlined
        const NO_INLINING = 0x0008;
        /// Single-threaded through the body
        const SYNCHRONIZED = 0x0020;
        /// Internal call
        const INTERNAL_CALL = 0x1000;
    }
}

impl MethodAttributes {
    /// True if the method takes no `this` pointer
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(MethodAttributes::STATIC)
    }
}

impl MethodImplAttributes {
    /// True if the implementation is CIL, the only kind whose body the crate decodes
    #[must_use]
    pub fn is_il(self) -> bool {
        self.bits() & 0x0003 == 0
    }
}

bitflags! {
    /// Flags in the first bytes of a method header (ECMA-335 II.25.4)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Tiny header
        const TINY_FORMAT = 0x2;
        /// Fat header
        const FAT_FORMAT = 0x3;
        /// Data sections follow the code
        const MORE_SECTS = 0x8;
        /// Zero-initialize locals
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    /// Flags of a method data section (ECMA-335 II.25.4.5)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Exception handling table
        const EHTABLE = 0x1;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x2;
        /// Fat section layout
        const FAT_FORMAT = 0x40;
        /// Another section follows
        const MORE_SECTS = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_type() {
        assert!(MethodImplAttributes::empty().is_il());
        assert!(MethodImplAttributes::NO_INLINING.is_il());
        assert!(!MethodImplAttributes::RUNTIME.is_il());
        assert!(!MethodImplAttributes::NATIVE.is_il());
    }

    #[test]
    fn access_is_masked() {
        let flags = MethodAttributes::PUBLIC | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG;
        assert_eq!(flags.bits() & METHOD_ACCESS_MASK, MethodAttributes::PUBLIC.bits());
        assert!(flags.is_static());
        assert!(!MethodAttributes::PRIVATE.is_static());
    }
}
