use bitflags::bitflags;

bitflags! {
    /// Kind of an exception handling clause (ECMA-335 II.25.4.6)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// Typed catch clause
        const EXCEPTION = 0x0000;
        /// Filter and handler
        const FILTER = 0x0001;
        /// Finally clause
        const FINALLY = 0x0002;
        /// Fault clause
        const FAULT = 0x0004;
    }
}

/// One exception handling clause with byte offsets relative to the start of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Offset of the protected block
    pub try_offset: u32,
    /// Length of the protected block
    pub try_length: u32,
    /// Offset of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Catch type token for typed clauses, filter offset for filter clauses, 0 otherwise
    pub class_or_filter: u32,
}

impl ExceptionHandler {
    /// True if the clause fits the 12-byte small section layout
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= 0xFFFF
            && self.try_length <= 0xFF
            && self.handler_offset <= 0xFFFF
            && self.handler_length <= 0xFF
    }
}
