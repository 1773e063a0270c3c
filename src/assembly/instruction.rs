//! Instructions and operands of the in-memory stream.

use std::fmt;

use widestring::U16String;

use crate::{
    assembly::{InstrId, OpCode, OperandType},
    metadata::token::Token,
    module::{FieldRef, MemberToken, MethodRef},
    Error, Result,
};

/// An inline literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit
    Int8(i8),
    /// Unsigned 8-bit
    UInt8(u8),
    /// Signed 32-bit
    Int32(i32),
    /// Signed 64-bit
    Int64(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(v) => write!(f, "{v}"),
            Immediate::UInt8(v) => write!(f, "{v}"),
            Immediate::Int32(v) => write!(f, "{v}"),
            Immediate::Int64(v) => write!(f, "{v}"),
            Immediate::Float32(v) => write!(f, "{v}"),
            Immediate::Float64(v) => write!(f, "{v}"),
        }
    }
}

/// Operand of an instruction, with references kept symbolic.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Inline literal
    Immediate(Immediate),
    /// Local variable slot index
    Local(u16),
    /// Argument index
    Argument(u16),
    /// Branch target in the same stream
    Target(InstrId),
    /// Jump table targets in the same stream
    Switch(Vec<InstrId>),
    /// String literal of `ldstr`
    String(U16String),
    /// Called or loaded method
    Method(MethodRef),
    /// Accessed field
    Field(FieldRef),
    /// `TypeDef`, `TypeRef` or `TypeSpec` token
    Type(Token),
    /// `StandAloneSig` token of a `calli` call site
    Signature(Token),
    /// Operand of `ldtoken`
    Token(MemberToken),
}

/// One instruction: an opcode and its operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The operand, which must match the opcode's operand encoding
    pub operand: Operand,
}

impl Instruction {
    /// Create an instruction, checking that the operand matches the opcode.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInstruction`] if the operand kind does not fit the opcode.
    pub fn new(opcode: OpCode, operand: Operand) -> Result<Self> {
        let instruction = Instruction { opcode, operand };
        instruction.check_operand()?;
        Ok(instruction)
    }

    /// An instruction without operand.
    ///
    /// Callers pass opcodes whose operand encoding is empty; [`Instruction::check_operand`]
    /// reports mistakes when the stream is validated.
    #[must_use]
    pub fn simple(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// `call` to `method`
    #[must_use]
    pub fn call(method: impl Into<MethodRef>) -> Self {
        Instruction {
            opcode: OpCode::Call,
            operand: Operand::Method(method.into()),
        }
    }

    /// A branch or `leave` to `target`
    #[must_use]
    pub fn branch(opcode: OpCode, target: InstrId) -> Self {
        Instruction {
            opcode,
            operand: Operand::Target(target),
        }
    }

    /// `ldstr` of `value`
    #[must_use]
    pub fn ldstr(value: &str) -> Self {
        Instruction {
            opcode: OpCode::Ldstr,
            operand: Operand::String(U16String::from_str(value)),
        }
    }

    /// Shortest `ldc.i4` form for `value`
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        let opcode = match value {
            -1 => OpCode::LdcI4M1,
            0 => OpCode::LdcI40,
            1 => OpCode::LdcI41,
            2 => OpCode::LdcI42,
            3 => OpCode::LdcI43,
            4 => OpCode::LdcI44,
            5 => OpCode::LdcI45,
            6 => OpCode::LdcI46,
            7 => OpCode::LdcI47,
            8 => OpCode::LdcI48,
            _ => {
                return match i8::try_from(value) {
                    Ok(short) => Instruction {
                        opcode: OpCode::LdcI4S,
                        operand: Operand::Immediate(Immediate::Int8(short)),
                    },
                    Err(_) => Instruction {
                        opcode: OpCode::LdcI4,
                        operand: Operand::Immediate(Immediate::Int32(value)),
                    },
                }
            }
        };
        Instruction::simple(opcode)
    }

    /// Shortest `ldloc` form for slot `index`
    #[must_use]
    pub fn ldloc(index: u16) -> Self {
        match index {
            0 => Instruction::simple(OpCode::Ldloc0),
            1 => Instruction::simple(OpCode::Ldloc1),
            2 => Instruction::simple(OpCode::Ldloc2),
            3 => Instruction::simple(OpCode::Ldloc3),
            4..=255 => Instruction {
                opcode: OpCode::LdlocS,
                operand: Operand::Local(index),
            },
            _ => Instruction {
                opcode: OpCode::Ldloc,
                operand: Operand::Local(index),
            },
        }
    }

    /// Shortest `stloc` form for slot `index`
    #[must_use]
    pub fn stloc(index: u16) -> Self {
        match index {
            0 => Instruction::simple(OpCode::Stloc0),
            1 => Instruction::simple(OpCode::Stloc1),
            2 => Instruction::simple(OpCode::Stloc2),
            3 => Instruction::simple(OpCode::Stloc3),
            4..=255 => Instruction {
                opcode: OpCode::StlocS,
                operand: Operand::Local(index),
            },
            _ => Instruction {
                opcode: OpCode::Stloc,
                operand: Operand::Local(index),
            },
        }
    }

    /// Branch targets referenced by the operand
    #[must_use]
    pub fn targets(&self) -> Vec<InstrId> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Mutable access to the referenced branch targets
    pub fn targets_mut(&mut self) -> Vec<&mut InstrId> {
        match &mut self.operand {
            Operand::Target(target) => vec![target],
            Operand::Switch(targets) => targets.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// The called method, for instructions with a method operand
    #[must_use]
    pub fn method(&self) -> Option<&MethodRef> {
        match &self.operand {
            Operand::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Check that the operand kind and range fit the opcode.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInstruction`] on a mismatch.
    pub fn check_operand(&self) -> Result<()> {
        let fits = match (self.opcode.operand_type(), &self.operand) {
            (OperandType::None, Operand::None)
            | (OperandType::ShortI, Operand::Immediate(Immediate::Int8(_)))
            | (OperandType::ShortU, Operand::Immediate(Immediate::UInt8(_)))
            | (OperandType::I, Operand::Immediate(Immediate::Int32(_)))
            | (OperandType::I8, Operand::Immediate(Immediate::Int64(_)))
            | (OperandType::ShortR, Operand::Immediate(Immediate::Float32(_)))
            | (OperandType::R, Operand::Immediate(Immediate::Float64(_)))
            | (OperandType::Arg, Operand::Argument(_))
            | (OperandType::Local, Operand::Local(_))
            | (OperandType::ShortBranch | OperandType::Branch, Operand::Target(_))
            | (OperandType::Switch, Operand::Switch(_))
            | (OperandType::Method, Operand::Method(_))
            | (OperandType::Field, Operand::Field(_))
            | (OperandType::Type, Operand::Type(_))
            | (OperandType::String, Operand::String(_))
            | (OperandType::Sig, Operand::Signature(_))
            | (OperandType::Tok, Operand::Token(_)) => true,
            (OperandType::ShortArg, Operand::Argument(index))
            | (OperandType::ShortLocal, Operand::Local(index)) => *index <= 0xFF,
            _ => false,
        };

        if fits {
            Ok(())
        } else {
            Err(Error::InvalidInstruction(format!(
                "{} can not take operand {:?}",
                self.opcode, self.operand
            )))
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(value) => write!(f, " {value}"),
            Operand::Local(index) => write!(f, " V_{index}"),
            Operand::Argument(index) => write!(f, " A_{index}"),
            Operand::Target(target) => write!(f, " {target}"),
            Operand::Switch(targets) => {
                f.write_str(" (")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{target}")?;
                }
                f.write_str(")")
            }
            Operand::String(value) => write!(f, " {:?}", value.to_string_lossy()),
            Operand::Method(method) => write!(f, " {method:?}"),
            Operand::Field(field) => write!(f, " {field:?}"),
            Operand::Type(token) | Operand::Signature(token) => write!(f, " {token}"),
            Operand::Token(member) => write!(f, " {member:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortest_forms() {
        assert_eq!(Instruction::ldc_i4(1).opcode, OpCode::LdcI41);
        assert_eq!(Instruction::ldc_i4(-1).opcode, OpCode::LdcI4M1);
        assert_eq!(
            Instruction::ldc_i4(100).operand,
            Operand::Immediate(Immediate::Int8(100))
        );
        assert_eq!(Instruction::ldc_i4(1000).opcode, OpCode::LdcI4);
        assert_eq!(Instruction::ldloc(1).opcode, OpCode::Ldloc1);
        assert_eq!(Instruction::stloc(7).opcode, OpCode::StlocS);
        assert_eq!(Instruction::stloc(300).opcode, OpCode::Stloc);
    }

    #[test]
    fn operand_checks() {
        assert!(Instruction::new(OpCode::Ret, Operand::None).is_ok());
        assert!(Instruction::new(OpCode::Ret, Operand::Local(0)).is_err());
        assert!(Instruction::new(OpCode::LdlocS, Operand::Local(256)).is_err());
        assert!(Instruction::new(OpCode::Ldloc, Operand::Local(256)).is_ok());
        assert!(Instruction::new(OpCode::Ldstr, Operand::Type(Token::new(0x0100_0001))).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Instruction::ldstr("SRML2/Libs").to_string(), "ldstr \"SRML2/Libs\"");
        assert_eq!(Instruction::ldc_i4(42).to_string(), "ldc.i4.s 42");
    }
}
