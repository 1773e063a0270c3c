//! Decoding of raw CIL into an [`InstructionStream`].
//!
//! Decoding runs in two passes. The first pass walks the code bytes and records every
//! instruction with its byte offset and raw operand; the second pass turns branch displacements
//! and exception clause offsets into [`InstrId`] handles. A branch or clause boundary that does
//! not land on an instruction start is rejected as malformed.

use std::collections::HashMap;

use widestring::U16String;

use crate::{
    assembly::{
        Body, ExceptionRegion, Immediate, InstrId, Instruction, InstructionStream, LocalSlot,
        OpCode, Operand, OperandType, RegionKind, PREFIX_FE,
    },
    file::parser::Parser,
    metadata::{
        method::{ExceptionHandlerFlags, MethodBody},
        signatures::TypeSignature,
        tables::TableId,
        token::Token,
    },
    module::{FieldRef, MemberToken, MethodRef},
    Result,
};

/// Maps metadata tokens found in code to symbolic operands.
///
/// Implemented by the module loader, which owns the heaps and tables the tokens point into.
pub trait OperandResolver {
    /// String literal behind a `#US` token
    ///
    /// # Errors
    /// Returns an error if the token does not point to a valid user string.
    fn user_string(&self, token: Token) -> Result<U16String>;

    /// Method behind a `MethodDef`, `MemberRef` or `MethodSpec` token
    ///
    /// # Errors
    /// Returns an error if the token does not name a method.
    fn method(&self, token: Token) -> Result<MethodRef>;

    /// Field behind a `Field` or `MemberRef` token
    ///
    /// # Errors
    /// Returns an error if the token does not name a field.
    fn field(&self, token: Token) -> Result<FieldRef>;

    /// Operand of `ldtoken`
    ///
    /// # Errors
    /// Returns an error if the token names neither a type nor a member.
    fn member(&self, token: Token) -> Result<MemberToken>;
}

enum RawOperand {
    None,
    Immediate(Immediate),
    Local(u16),
    Argument(u16),
    Branch(i64),
    Switch(Vec<i64>),
    Token(Token),
}

struct RawInstruction {
    offset: usize,
    end: usize,
    opcode: OpCode,
    operand: RawOperand,
}

fn decode_raw(parser: &mut Parser) -> Result<RawInstruction> {
    let offset = parser.pos();
    let first_byte = parser.read_le::<u8>()?;
    let value = if first_byte == PREFIX_FE {
        0xFE00 | u16::from(parser.read_le::<u8>()?)
    } else {
        u16::from(first_byte)
    };
    let Some(opcode) = OpCode::from_value(value) else {
        return Err(malformed_error!("Invalid opcode 0x{:X} at offset {}", value, offset));
    };

    let operand = match opcode.operand_type() {
        OperandType::None => RawOperand::None,
        OperandType::ShortI => RawOperand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::ShortU => RawOperand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::I => RawOperand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::I8 => RawOperand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::ShortR => RawOperand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::R => RawOperand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::ShortArg => RawOperand::Argument(u16::from(parser.read_le::<u8>()?)),
        OperandType::Arg => RawOperand::Argument(parser.read_le::<u16>()?),
        OperandType::ShortLocal => RawOperand::Local(u16::from(parser.read_le::<u8>()?)),
        OperandType::Local => RawOperand::Local(parser.read_le::<u16>()?),
        OperandType::ShortBranch => RawOperand::Branch(i64::from(parser.read_le::<i8>()?)),
        OperandType::Branch => RawOperand::Branch(i64::from(parser.read_le::<i32>()?)),
        OperandType::Switch => {
            let count = parser.read_le::<u32>()? as usize;
            if count > parser.remaining() / 4 {
                return Err(out_of_bounds_error!());
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(i64::from(parser.read_le::<i32>()?));
            }
            RawOperand::Switch(targets)
        }
        OperandType::Method
        | OperandType::Field
        | OperandType::Type
        | OperandType::String
        | OperandType::Sig
        | OperandType::Tok => RawOperand::Token(Token::new(parser.read_le::<u32>()?)),
    };

    Ok(RawInstruction {
        offset,
        end: parser.pos(),
        opcode,
        operand,
    })
}

fn check_table(token: Token, allowed: &[TableId], what: &str) -> Result<Token> {
    match TableId::from_u8(token.table()) {
        Some(table) if allowed.contains(&table) && !token.is_null() => Ok(token),
        _ => Err(malformed_error!("Token {} is not a valid {} operand", token, what)),
    }
}

fn lower_operand(
    opcode: OpCode,
    operand: RawOperand,
    end: usize,
    starts: &HashMap<usize, InstrId>,
    resolver: &dyn OperandResolver,
) -> Result<Operand> {
    let target = |displacement: i64| -> Result<InstrId> {
        let absolute = i64::try_from(end).unwrap_or(i64::MAX).saturating_add(displacement);
        usize::try_from(absolute)
            .ok()
            .and_then(|offset| starts.get(&offset).copied())
            .ok_or_else(|| {
                malformed_error!(
                    "{} at {} branches into the middle of an instruction",
                    opcode,
                    end
                )
            })
    };

    Ok(match operand {
        RawOperand::None => Operand::None,
        RawOperand::Immediate(value) => Operand::Immediate(value),
        RawOperand::Local(index) => Operand::Local(index),
        RawOperand::Argument(index) => Operand::Argument(index),
        RawOperand::Branch(displacement) => Operand::Target(target(displacement)?),
        RawOperand::Switch(displacements) => Operand::Switch(
            displacements
                .into_iter()
                .map(target)
                .collect::<Result<Vec<_>>>()?,
        ),
        RawOperand::Token(token) => match opcode.operand_type() {
            OperandType::String => Operand::String(resolver.user_string(token)?),
            OperandType::Method => Operand::Method(resolver.method(token)?),
            OperandType::Field => Operand::Field(resolver.field(token)?),
            OperandType::Type => Operand::Type(check_table(
                token,
                &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec],
                "type",
            )?),
            OperandType::Sig => {
                Operand::Signature(check_table(token, &[TableId::StandAloneSig], "signature")?)
            }
            _ => Operand::Token(resolver.member(token)?),
        },
    })
}

/// Decode a raw method body into an editable [`Body`].
///
/// `locals` are the slot types from the body's local variable signature.
///
/// # Errors
/// Returns an error for invalid opcodes, truncated operands, branches or clause boundaries that
/// do not land on an instruction, and tokens the resolver rejects.
pub fn decode_body(
    raw: &MethodBody,
    locals: Vec<TypeSignature>,
    resolver: &dyn OperandResolver,
) -> Result<Body> {
    let mut parser = Parser::new(&raw.code);
    let mut decoded = Vec::new();
    while parser.has_more_data() {
        decoded.push(decode_raw(&mut parser)?);
    }

    let mut stream = InstructionStream::new();
    let mut starts = HashMap::with_capacity(decoded.len());
    let mut ends = HashMap::with_capacity(decoded.len());
    let mut placeholders = Vec::with_capacity(decoded.len());
    for instr in &decoded {
        let id = stream.push(Instruction::simple(OpCode::Nop));
        starts.insert(instr.offset, id);
        ends.insert(instr.end, id);
        placeholders.push(id);
    }

    for (instr, id) in decoded.into_iter().zip(placeholders) {
        let operand = lower_operand(instr.opcode, instr.operand, instr.end, &starts, resolver)?;
        if let Some(slot) = stream.get_mut(id) {
            *slot = Instruction {
                opcode: instr.opcode,
                operand,
            };
        }
    }

    for (index, clause) in raw.exception_handlers.iter().enumerate() {
        let at = |offset: u32, map: &HashMap<usize, InstrId>| -> Result<InstrId> {
            map.get(&(offset as usize)).copied().ok_or_else(|| {
                malformed_error!(
                    "Exception clause {} boundary {} is not on an instruction boundary",
                    index,
                    offset
                )
            })
        };

        let try_end = clause.try_offset.saturating_add(clause.try_length);
        let handler_end = clause.handler_offset.saturating_add(clause.handler_length);
        let kind = if clause.flags.contains(ExceptionHandlerFlags::FILTER) {
            RegionKind::Filter(at(clause.class_or_filter, &starts)?)
        } else if clause.flags.contains(ExceptionHandlerFlags::FINALLY) {
            RegionKind::Finally
        } else if clause.flags.contains(ExceptionHandlerFlags::FAULT) {
            RegionKind::Fault
        } else {
            RegionKind::Catch(check_table(
                Token::new(clause.class_or_filter),
                &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec],
                "catch type",
            )?)
        };

        stream.add_region(ExceptionRegion {
            kind,
            try_start: at(clause.try_offset, &starts)?,
            try_end: at(try_end, &ends)?,
            handler_start: at(clause.handler_offset, &starts)?,
            handler_end: at(handler_end, &ends)?,
        })?;
    }

    Ok(Body {
        instructions: stream,
        locals: locals.into_iter().map(|ty| LocalSlot { ty }).collect(),
        init_locals: raw.init_locals,
        local_sig: (!raw.local_var_sig_token.is_null()).then_some(raw.local_var_sig_token),
    })
}

/// Decode raw code bytes into a flat list of opcodes and byte offsets, without resolving any
/// operand. Used for listings of bodies that can not be fully resolved.
///
/// # Errors
/// Returns an error for invalid opcodes or truncated operands.
pub fn decode_opcodes(code: &[u8]) -> Result<Vec<(usize, OpCode)>> {
    let mut parser = Parser::new(code);
    let mut result = Vec::new();
    while parser.has_more_data() {
        let instr = decode_raw(&mut parser)?;
        result.push((instr.offset, instr.opcode));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::method::ExceptionHandler,
        module::{FieldId, MethodId},
    };

    struct Resolver;

    impl OperandResolver for Resolver {
        fn user_string(&self, token: Token) -> Result<U16String> {
            if token.table() == 0x70 {
                Ok(U16String::from_str("hello"))
            } else {
                Err(malformed_error!("not a string"))
            }
        }

        fn method(&self, token: Token) -> Result<MethodRef> {
            Ok(MethodRef::Def(MethodId(token.row() - 1)))
        }

        fn field(&self, token: Token) -> Result<FieldRef> {
            Ok(FieldRef::Def(FieldId(token.row() - 1)))
        }

        fn member(&self, token: Token) -> Result<MemberToken> {
            Ok(MemberToken::Type(token))
        }
    }

    fn raw(code: Vec<u8>) -> MethodBody {
        MethodBody {
            max_stack: 8,
            code,
            ..MethodBody::default()
        }
    }

    #[test]
    fn operands() {
        // ldstr "hello"; call 0x06000002; ldloc.s 4; ldarg 0x0102; ret
        let code = vec![
            0x72, 0x01, 0x00, 0x00, 0x70, 0x28, 0x02, 0x00, 0x00, 0x06, 0x11, 0x04, 0xFE, 0x09,
            0x02, 0x01, 0x2A,
        ];
        let body = decode_body(&raw(code), Vec::new(), &Resolver).unwrap();
        let instrs: Vec<&Instruction> = body.instructions.iter().map(|(_, i)| i).collect();

        assert_eq!(instrs.len(), 5);
        assert_eq!(instrs[0].operand, Operand::String(U16String::from_str("hello")));
        assert_eq!(instrs[1].operand, Operand::Method(MethodRef::Def(MethodId(1))));
        assert_eq!(instrs[2].operand, Operand::Local(4));
        assert_eq!(instrs[3].opcode, OpCode::Ldarg);
        assert_eq!(instrs[3].operand, Operand::Argument(0x0102));
        assert_eq!(instrs[4].opcode, OpCode::Ret);
    }

    #[test]
    fn branches() {
        // br.s +1; nop; ret
        let code = vec![0x2B, 0x01, 0x00, 0x2A];
        let body = decode_body(&raw(code), Vec::new(), &Resolver).unwrap();
        let ids = body.instructions.ids().to_vec();
        assert_eq!(
            body.instructions.get(ids[0]).unwrap().operand,
            Operand::Target(ids[2])
        );

        // br.s into the operand of itself
        let code = vec![0x2B, 0xFF, 0x2A];
        assert!(decode_body(&raw(code), Vec::new(), &Resolver).is_err());
    }

    #[test]
    fn switch_targets() {
        // switch (0, 1); ret; ret
        let code = vec![
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x2A,
            0x2A,
        ];
        let body = decode_body(&raw(code), Vec::new(), &Resolver).unwrap();
        let ids = body.instructions.ids().to_vec();
        assert_eq!(
            body.instructions.get(ids[0]).unwrap().targets(),
            vec![ids[1], ids[2]]
        );
    }

    #[test]
    fn exception_clauses() {
        // try { nop; leave.s +3 } catch { pop; leave.s +0 } ret
        let code = vec![0x00, 0xDE, 0x03, 0x26, 0xDE, 0x00, 0x2A];
        let mut body = raw(code);
        body.exception_handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 3,
            class_or_filter: 0x0100_0001,
        });

        let decoded = decode_body(&body, vec![TypeSignature::I4], &Resolver).unwrap();
        let ids = decoded.instructions.ids().to_vec();
        let region = decoded.instructions.regions()[0];
        assert_eq!(region.kind, RegionKind::Catch(Token::new(0x0100_0001)));
        assert_eq!(region.try_start, ids[0]);
        assert_eq!(region.try_end, ids[1]);
        assert_eq!(region.handler_start, ids[2]);
        assert_eq!(region.handler_end, ids[3]);
        assert_eq!(decoded.locals.len(), 1);
        decoded.instructions.validate().unwrap();

        body.exception_handlers[0].try_length = 2;
        assert!(decode_body(&body, Vec::new(), &Resolver).is_err());
    }

    #[test]
    fn invalid_opcode() {
        assert!(decode_body(&raw(vec![0x24]), Vec::new(), &Resolver).is_err());
        assert!(decode_body(&raw(vec![0x20, 0x01]), Vec::new(), &Resolver).is_err());
        assert_eq!(
            decode_opcodes(&[0x00, 0xFE, 0x01, 0x2A]).unwrap(),
            vec![(0, OpCode::Nop), (1, OpCode::Ceq), (3, OpCode::Ret)]
        );
    }
}
