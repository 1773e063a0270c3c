//! Method body headers and exception sections (ECMA-335 II.25.4).
//!
//! [`MethodBody::read`] splits a method body into its header fields, the raw code bytes
//! and the exception clauses. [`MethodBody::write`] produces the smallest valid encoding: a tiny
//! header when the body has no locals, no clauses, a stack depth of at most 8 and less than 64
//! bytes of code, a fat header otherwise, and a small exception section whenever every clause
//! fits in it.

use crate::{
    file::io::{pad_to, read_le_at, write_le},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags},
        token::Token,
    },
    Result,
};

/// Stack depth implied by a tiny header
pub const TINY_MAX_STACK: u16 = 8;

/// Largest code size a tiny header can describe
const TINY_MAX_CODE: usize = 0x3F;

/// Largest number of clauses in a small exception section
const SMALL_SECTION_MAX_CLAUSES: usize = 20;

/// A decoded method body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodBody {
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// Zero-initialize local variables on entry
    pub init_locals: bool,
    /// `StandAloneSig` token of the local variable signature, null if there are no locals
    pub local_var_sig_token: Token,
    /// Raw CIL bytes
    pub code: Vec<u8>,
    /// Exception handling clauses in table order
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Decode the body at the start of `data`.
    ///
    /// Returns the body and the number of bytes it occupies, including data sections.
    ///
    /// # Errors
    /// Returns an error if the header is neither tiny nor fat or the body is truncated.
    pub fn read(data: &[u8]) -> Result<(MethodBody, usize)> {
        let mut offset = 0;
        let first_byte = read_le_at::<u8>(data, &mut offset)?;

        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b11)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = usize::from(first_byte >> 2);
                let Some(code) = data.get(1..1 + size_code) else {
                    return Err(out_of_bounds_error!());
                };

                Ok((
                    MethodBody {
                        max_stack: TINY_MAX_STACK,
                        init_locals: false,
                        local_var_sig_token: Token::new(0),
                        code: code.to_vec(),
                        exception_handlers: Vec::new(),
                    },
                    1 + size_code,
                ))
            }
            MethodBodyFlags::FAT_FORMAT => {
                offset = 0;
                let first_duo = read_le_at::<u16>(data, &mut offset)?;
                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header < 12 {
                    return Err(malformed_error!(
                        "Fat method header has invalid size - {}",
                        size_header
                    ));
                }
                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let max_stack = read_le_at::<u16>(data, &mut offset)?;
                let size_code = read_le_at::<u32>(data, &mut offset)? as usize;
                let local_var_sig_token = Token::new(read_le_at::<u32>(data, &mut offset)?);

                let Some(code) = size_header
                    .checked_add(size_code)
                    .and_then(|end| data.get(size_header..end))
                else {
                    return Err(out_of_bounds_error!());
                };

                let mut cursor = size_header + size_code;
                let mut exception_handlers = Vec::new();
                if flags.contains(MethodBodyFlags::MORE_SECTS) {
                    loop {
                        cursor = (cursor + 3) & !3;
                        let (section_flags, more) =
                            read_section(data, &mut cursor, &mut exception_handlers)?;
                        if !section_flags.contains(SectionFlags::EHTABLE) {
                            log::warn!("Skipping non exception data section in method body");
                        }
                        if !more {
                            break;
                        }
                    }
                }

                Ok((
                    MethodBody {
                        max_stack,
                        init_locals: flags.contains(MethodBodyFlags::INIT_LOCALS),
                        local_var_sig_token,
                        code: code.to_vec(),
                        exception_handlers,
                    },
                    cursor,
                ))
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// True if the body can be written with a tiny header
    #[must_use]
    pub fn fits_tiny(&self) -> bool {
        self.code.len() <= TINY_MAX_CODE
            && self.max_stack <= TINY_MAX_STACK
            && self.local_var_sig_token.is_null()
            && self.exception_handlers.is_empty()
    }

    /// Append the encoded body to `buffer`.
    ///
    /// Fat bodies are aligned to 4 bytes relative to the start of `buffer`.
    ///
    /// # Errors
    /// Returns an error if the code does not fit a 32-bit size.
    pub fn write(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if self.fits_tiny() {
            #[allow(clippy::cast_possible_truncation)]
            buffer.push(((self.code.len() as u8) << 2) | 0x2);
            buffer.extend_from_slice(&self.code);
            return Ok(());
        }

        let Ok(size_code) = u32::try_from(self.code.len()) else {
            return Err(malformed_error!("Method body is too large - {}", self.code.len()));
        };

        pad_to(buffer, 4);
        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if self.init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }
        if !self.exception_handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }

        write_le::<u16>(buffer, flags.bits() | (3 << 12));
        write_le::<u16>(buffer, self.max_stack);
        write_le::<u32>(buffer, size_code);
        write_le::<u32>(buffer, self.local_var_sig_token.value());
        buffer.extend_from_slice(&self.code);

        if !self.exception_handlers.is_empty() {
            pad_to(buffer, 4);
            self.write_exception_section(buffer)?;
        }

        Ok(())
    }

    fn write_exception_section(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let count = self.exception_handlers.len();
        let small = count <= SMALL_SECTION_MAX_CLAUSES
            && self.exception_handlers.iter().all(ExceptionHandler::fits_small);

        if small {
            buffer.push(SectionFlags::EHTABLE.bits());
            #[allow(clippy::cast_possible_truncation)]
            buffer.push((count * 12 + 4) as u8);
            write_le::<u16>(buffer, 0);
            #[allow(clippy::cast_possible_truncation)]
            for clause in &self.exception_handlers {
                write_le::<u16>(buffer, clause.flags.bits());
                write_le::<u16>(buffer, clause.try_offset as u16);
                write_le::<u8>(buffer, clause.try_length as u8);
                write_le::<u16>(buffer, clause.handler_offset as u16);
                write_le::<u8>(buffer, clause.handler_length as u8);
                write_le::<u32>(buffer, clause.class_or_filter);
            }
        } else {
            let size = count * 24 + 4;
            if size > 0x00FF_FFFF {
                return Err(malformed_error!("Too many exception clauses - {}", count));
            }
            #[allow(clippy::cast_possible_truncation)]
            let header = u32::from((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits())
                | ((size as u32) << 8);
            write_le::<u32>(buffer, header);
            for clause in &self.exception_handlers {
                write_le::<u32>(buffer, u32::from(clause.flags.bits()));
                write_le::<u32>(buffer, clause.try_offset);
                write_le::<u32>(buffer, clause.try_length);
                write_le::<u32>(buffer, clause.handler_offset);
                write_le::<u32>(buffer, clause.handler_length);
                write_le::<u32>(buffer, clause.class_or_filter);
            }
        }

        Ok(())
    }
}

fn read_section(
    data: &[u8],
    cursor: &mut usize,
    handlers: &mut Vec<ExceptionHandler>,
) -> Result<(SectionFlags, bool)> {
    let start = *cursor;
    let flags = SectionFlags::from_bits_truncate(read_le_at::<u8>(data, cursor)?);
    let more = flags.contains(SectionFlags::MORE_SECTS);

    if flags.contains(SectionFlags::FAT_FORMAT) {
        *cursor = start;
        let size = (read_le_at::<u32>(data, cursor)? >> 8) as usize;
        if size < 4 || start + size > data.len() {
            return Err(malformed_error!("Invalid fat exception section size - {}", size));
        }
        if !flags.contains(SectionFlags::EHTABLE) {
            *cursor = start + size;
            return Ok((flags, more));
        }

        for _ in 0..(size - 4) / 24 {
            let raw_flags = read_le_at::<u32>(data, cursor)?;
            #[allow(clippy::cast_possible_truncation)]
            handlers.push(ExceptionHandler {
                flags: ExceptionHandlerFlags::from_bits_truncate(raw_flags as u16),
                try_offset: read_le_at::<u32>(data, cursor)?,
                try_length: read_le_at::<u32>(data, cursor)?,
                handler_offset: read_le_at::<u32>(data, cursor)?,
                handler_length: read_le_at::<u32>(data, cursor)?,
                class_or_filter: read_le_at::<u32>(data, cursor)?,
            });
        }
        *cursor = start + size;
    } else {
        let size = usize::from(read_le_at::<u8>(data, cursor)?);
        if size < 4 || start + size > data.len() {
            return Err(malformed_error!("Invalid small exception section size - {}", size));
        }
        if !flags.contains(SectionFlags::EHTABLE) {
            *cursor = start + size;
            return Ok((flags, more));
        }

        *cursor = start + 4;
        for _ in 0..(size - 4) / 12 {
            handlers.push(ExceptionHandler {
                flags: ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(data, cursor)?),
                try_offset: u32::from(read_le_at::<u16>(data, cursor)?),
                try_length: u32::from(read_le_at::<u8>(data, cursor)?),
                handler_offset: u32::from(read_le_at::<u16>(data, cursor)?),
                handler_length: u32::from(read_le_at::<u8>(data, cursor)?),
                class_or_filter: read_le_at::<u32>(data, cursor)?,
            });
        }
        *cursor = start + size;
    }

    Ok((flags, more))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catch_clause(try_length: u32) -> ExceptionHandler {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_offset: 0,
            try_length,
            handler_offset: try_length,
            handler_length: 2,
            class_or_filter: 0x0100_0001,
        }
    }

    #[test]
    fn tiny() {
        // ldarg.0; ret
        let data = [0x0A, 0x02, 0x2A, 0xFF];
        let (body, size) = MethodBody::read(&data).unwrap();
        assert_eq!(size, 3);
        assert_eq!(body.code, [0x02, 0x2A]);
        assert_eq!(body.max_stack, TINY_MAX_STACK);
        assert!(body.fits_tiny());

        let mut out = Vec::new();
        body.write(&mut out).unwrap();
        assert_eq!(out, data[..3]);
    }

    #[test]
    fn fat_with_locals() {
        let body = MethodBody {
            max_stack: 2,
            init_locals: true,
            local_var_sig_token: Token::new(0x1100_0001),
            code: vec![0x16, 0x0A, 0x2A],
            exception_handlers: Vec::new(),
        };
        assert!(!body.fits_tiny());

        let mut out = Vec::new();
        body.write(&mut out).unwrap();
        assert_eq!(out.len(), 15);
        assert_eq!(out[0], 0x13);
        assert_eq!(out[1], 0x30);

        let (parsed, size) = MethodBody::read(&out).unwrap();
        assert_eq!(size, 15);
        assert_eq!(parsed, body);
    }

    #[test]
    fn small_exception_section() {
        let body = MethodBody {
            max_stack: 1,
            code: vec![0x00; 10],
            exception_handlers: vec![catch_clause(6)],
            ..MethodBody::default()
        };

        let mut out = Vec::new();
        body.write(&mut out).unwrap();
        // 12 header + 10 code + 2 padding + 16 section
        assert_eq!(out.len(), 40);
        assert_eq!(out[24], SectionFlags::EHTABLE.bits());
        assert_eq!(out[25], 16);

        let (parsed, size) = MethodBody::read(&out).unwrap();
        assert_eq!(size, 40);
        assert_eq!(parsed, body);
    }

    #[test]
    fn fat_exception_section() {
        let body = MethodBody {
            max_stack: 1,
            code: vec![0x00; 0x200],
            exception_handlers: vec![catch_clause(0x100), catch_clause(4)],
            ..MethodBody::default()
        };

        let mut out = Vec::new();
        body.write(&mut out).unwrap();
        let section = 12 + 0x200;
        assert_eq!(
            out[section],
            (SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits()
        );

        let (parsed, _) = MethodBody::read(&out).unwrap();
        assert_eq!(parsed.exception_handlers, body.exception_handlers);
    }

    #[test]
    fn truncated() {
        assert!(MethodBody::read(&[0x0A, 0x02]).is_err());
        assert!(MethodBody::read(&[0x13, 0x30, 0x02]).is_err());
        assert!(MethodBody::read(&[0x00]).is_err());
    }
}
