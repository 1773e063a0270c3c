//! CIL instruction model, decoding and encoding.
//!
//! Method bodies are edited as an [`InstructionStream`]: an arena of [`Instruction`]s addressed
//! by [`InstrId`] handles, with branch targets and exception region boundaries stored as handles
//! rather than byte offsets. Operands that name metadata (methods, fields, strings) are kept
//! symbolic, so an edited stream can be lowered again into any module.
//!
//! # Key Components
//!
//! - [`OpCode`] - the opcode table with operand encodings, stack effects and flow kinds
//! - [`Instruction`], [`Operand`] - one decoded instruction
//! - [`InstructionStream`], [`Body`] - an editable method body
//! - [`decode_body`] / [`encode_body`] - conversion from and to raw [`crate::metadata::method::MethodBody`]
//!
//! # Example
//!
//! ```rust
//! use cilpatch::assembly::{Body, Instruction, OpCode};
//!
//! let mut body = Body::new();
//! let ret = body.instructions.push(Instruction::simple(OpCode::Ret));
//! body.instructions.insert_before(ret, Instruction::ldc_i4(42))?;
//! body.instructions.insert_before(ret, Instruction::simple(OpCode::Pop))?;
//!
//! let listing: Vec<String> = body.instructions.iter().map(|(_, i)| i.to_string()).collect();
//! assert_eq!(listing, ["ldc.i4.s 42", "pop", "ret"]);
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod instructions;
mod stream;

pub use decoder::{decode_body, decode_opcodes, OperandResolver};
pub use encoder::{encode_body, TokenProvider};
pub use instruction::{Immediate, Instruction, Operand};
pub use instructions::{FlowType, OpCode, OpCodeInfo, OperandType, PREFIX_FE, VARIABLE};
pub use stream::{Body, ExceptionRegion, InstrId, InstructionStream, LocalSlot, RegionKind};
