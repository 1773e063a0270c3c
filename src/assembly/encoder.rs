//! Lowering of an [`InstructionStream`] back into raw CIL.
//!
//! This is the inverse of [`super::decode_body`]. Symbolic operands are turned into metadata
//! tokens through a [`TokenProvider`], branch forms are fixed, the maximum stack depth is
//! recomputed and the exception regions are lowered into clauses.
//!
//! # Branch forms
//!
//! Branches keep the form they were created with unless a short form can not reach its target,
//! in which case it is widened to the 32-bit form. Branches are never shortened, so encoding a
//! decoded body yields the bytes it was decoded from.
//!
//! # Stack depth
//!
//! The maximum depth is computed by a worklist over the control flow graph. Every instruction is
//! visited once with the first depth that reaches it; catch and filter blocks start with the
//! exception object on the stack, finally and fault blocks start empty.

use std::collections::VecDeque;

use widestring::U16Str;

use crate::{
    assembly::{
        Body, FlowType, Immediate, InstrId, Instruction, OpCode, Operand, OperandType, RegionKind,
        VARIABLE,
    },
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        token::Token,
    },
    module::{FieldRef, MemberToken, MethodRef},
    Error, Result,
};

/// Lowers symbolic operands to metadata tokens.
///
/// Implemented by the module writer; requests may allocate new rows or heap entries.
pub trait TokenProvider {
    /// `#US` token for a string literal
    ///
    /// # Errors
    /// Returns an error if the heap can not take the string.
    fn string_token(&mut self, value: &U16Str) -> Result<Token>;

    /// `MethodDef`, `MemberRef` or `MethodSpec` token for a method
    ///
    /// # Errors
    /// Returns an error if the method can not be lowered.
    fn method_token(&mut self, method: &MethodRef) -> Result<Token>;

    /// `Field` or `MemberRef` token for a field
    ///
    /// # Errors
    /// Returns an error if the field can not be lowered.
    fn field_token(&mut self, field: FieldRef) -> Result<Token>;

    /// Token of an `ldtoken` operand
    ///
    /// # Errors
    /// Returns an error if the member can not be lowered.
    fn member_token(&mut self, member: &MemberToken) -> Result<Token>;

    /// Values popped and pushed by `opcode` (`call`, `callvirt`, `newobj`, `jmp` or `ldftn`
    /// style) when applied to `method`
    ///
    /// # Errors
    /// Returns an error if the method signature is unavailable.
    fn call_stack_effect(&mut self, method: &MethodRef, opcode: OpCode) -> Result<(u16, u16)>;

    /// Values popped and pushed by a `calli` through the call site signature `sig`
    ///
    /// # Errors
    /// Returns an error if the signature is unavailable.
    fn calli_stack_effect(&mut self, sig: Token) -> Result<(u16, u16)>;
}

fn operand_size(instruction: &Instruction, opcode: OpCode) -> usize {
    match (&instruction.operand, opcode.operand_type().size()) {
        (Operand::Switch(targets), None) => 4 + 4 * targets.len(),
        (_, Some(size)) => size,
        (_, None) => 4,
    }
}

/// Pick the branch form of every instruction and compute byte offsets.
///
/// Returns the opcode to emit for each position and `len + 1` offsets, the last being the code
/// size.
fn layout(instructions: &[(InstrId, &Instruction)]) -> Result<(Vec<OpCode>, Vec<usize>)> {
    let position = |target: InstrId| -> Result<usize> {
        instructions
            .iter()
            .position(|(id, _)| *id == target)
            .ok_or_else(|| Error::DanglingReference(format!("branch to removed instruction {target}")))
    };

    let mut targets = Vec::with_capacity(instructions.len());
    for (_, instr) in instructions {
        targets.push(match &instr.operand {
            Operand::Target(target) if instr.opcode.is_branch() => Some(position(*target)?),
            _ => None,
        });
    }

    let mut opcodes: Vec<OpCode> = instructions.iter().map(|(_, i)| i.opcode).collect();
    loop {
        let mut offsets = Vec::with_capacity(instructions.len() + 1);
        let mut offset = 0usize;
        for ((_, instr), opcode) in instructions.iter().zip(&opcodes) {
            offsets.push(offset);
            offset += opcode.size() + operand_size(instr, *opcode);
        }
        offsets.push(offset);

        let mut widened = false;
        for (index, target) in targets.iter().enumerate() {
            let Some(target) = target else {
                continue;
            };
            let opcode = opcodes[index];
            if opcode.operand_type() != OperandType::ShortBranch {
                continue;
            }
            let displacement = offsets[*target] as i64 - offsets[index + 1] as i64;
            if i8::try_from(displacement).is_err() {
                opcodes[index] = opcode.long_form();
                widened = true;
            }
        }

        if !widened {
            return Ok((opcodes, offsets));
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn emit(
    instructions: &[(InstrId, &Instruction)],
    opcodes: &[OpCode],
    offsets: &[usize],
    provider: &mut dyn TokenProvider,
) -> Result<Vec<u8>> {
    let offset_of = |target: InstrId| -> Result<i64> {
        instructions
            .iter()
            .position(|(id, _)| *id == target)
            .map(|index| offsets[index] as i64)
            .ok_or_else(|| Error::DanglingReference(format!("branch to removed instruction {target}")))
    };

    let mut code = Vec::with_capacity(offsets.last().copied().unwrap_or_default());
    for (index, (_, instr)) in instructions.iter().enumerate() {
        let opcode = opcodes[index];
        let next = offsets[index + 1] as i64;
        opcode.write(&mut code);

        match (opcode.operand_type(), &instr.operand) {
            (OperandType::None, _) => {}
            (_, Operand::Immediate(Immediate::Int8(v))) => code.push(*v as u8),
            (_, Operand::Immediate(Immediate::UInt8(v))) => code.push(*v),
            (_, Operand::Immediate(Immediate::Int32(v))) => code.extend_from_slice(&v.to_le_bytes()),
            (_, Operand::Immediate(Immediate::Int64(v))) => code.extend_from_slice(&v.to_le_bytes()),
            (_, Operand::Immediate(Immediate::Float32(v))) => {
                code.extend_from_slice(&v.to_le_bytes());
            }
            (_, Operand::Immediate(Immediate::Float64(v))) => {
                code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::ShortArg, Operand::Argument(i))
            | (OperandType::ShortLocal, Operand::Local(i)) => code.push(*i as u8),
            (_, Operand::Argument(i) | Operand::Local(i)) => code.extend_from_slice(&i.to_le_bytes()),
            (OperandType::ShortBranch, Operand::Target(target)) => {
                code.push((offset_of(*target)? - next) as i8 as u8);
            }
            (_, Operand::Target(target)) => {
                let displacement = (offset_of(*target)? - next) as i32;
                code.extend_from_slice(&displacement.to_le_bytes());
            }
            (_, Operand::Switch(targets)) => {
                code.extend_from_slice(&(targets.len() as u32).to_le_bytes());
                for target in targets {
                    let displacement = (offset_of(*target)? - next) as i32;
                    code.extend_from_slice(&displacement.to_le_bytes());
                }
            }
            (_, Operand::String(value)) => {
                let token = provider.string_token(value)?;
                code.extend_from_slice(&token.value().to_le_bytes());
            }
            (_, Operand::Method(method)) => {
                let token = provider.method_token(method)?;
                code.extend_from_slice(&token.value().to_le_bytes());
            }
            (_, Operand::Field(field)) => {
                let token = provider.field_token(*field)?;
                code.extend_from_slice(&token.value().to_le_bytes());
            }
            (_, Operand::Token(member)) => {
                let token = provider.member_token(member)?;
                code.extend_from_slice(&token.value().to_le_bytes());
            }
            (_, Operand::Type(token) | Operand::Signature(token)) => {
                code.extend_from_slice(&token.value().to_le_bytes());
            }
            (_, Operand::None) => {
                return Err(Error::InvalidInstruction(format!(
                    "{opcode} is missing its operand"
                )))
            }
        }
    }

    Ok(code)
}

fn stack_effect(
    instr: &Instruction,
    returns_value: bool,
    provider: &mut dyn TokenProvider,
) -> Result<(u16, u16)> {
    let info = instr.opcode.info();
    if info.pops != VARIABLE && info.pushes != VARIABLE {
        return Ok((u16::from(info.pops), u16::from(info.pushes)));
    }

    match (&instr.operand, instr.opcode) {
        (_, OpCode::Ret) => Ok((u16::from(returns_value), 0)),
        (Operand::Method(method), opcode) => provider.call_stack_effect(method, opcode),
        (Operand::Signature(sig), OpCode::Calli) => {
            let (pops, pushes) = provider.calli_stack_effect(*sig)?;
            // the function pointer
            Ok((pops + 1, pushes))
        }
        _ => Err(Error::InvalidInstruction(format!(
            "{} has no known stack effect",
            instr.opcode
        ))),
    }
}

/// Maximum evaluation stack depth over all reachable instructions.
fn max_stack(
    instructions: &[(InstrId, &Instruction)],
    body: &Body,
    returns_value: bool,
    provider: &mut dyn TokenProvider,
) -> Result<u16> {
    let index_of = |target: InstrId| -> Result<usize> {
        body.instructions.position(target).ok_or_else(|| {
            Error::DanglingReference(format!("reference to removed instruction {target}"))
        })
    };

    let mut entry: Vec<Option<u16>> = vec![None; instructions.len()];
    let mut worklist = VecDeque::new();
    let mut seed = |index: usize, depth: u16, entry: &mut Vec<Option<u16>>| {
        if entry[index].is_none() {
            entry[index] = Some(depth);
            worklist.push_back(index);
        }
    };

    if !instructions.is_empty() {
        seed(0, 0, &mut entry);
    }
    for region in body.instructions.regions() {
        let handler_depth = match region.kind {
            RegionKind::Catch(_) | RegionKind::Filter(_) => 1,
            RegionKind::Finally | RegionKind::Fault => 0,
        };
        seed(index_of(region.handler_start)?, handler_depth, &mut entry);
        if let RegionKind::Filter(filter) = region.kind {
            seed(index_of(filter)?, 1, &mut entry);
        }
    }

    let mut max = 0u16;
    while let Some(index) = worklist.pop_front() {
        let depth = entry[index].unwrap_or_default();
        let instr = instructions[index].1;
        let (pops, pushes) = stack_effect(instr, returns_value, provider)?;
        let after = depth.saturating_sub(pops).saturating_add(pushes);
        max = max.max(depth).max(after);

        let mut successors: Vec<(usize, u16)> = Vec::new();
        let fall_through = index + 1 < instructions.len();
        match instr.opcode.flow() {
            FlowType::Sequential | FlowType::Call | FlowType::Prefix => {
                if fall_through {
                    successors.push((index + 1, after));
                }
            }
            FlowType::ConditionalBranch | FlowType::Switch => {
                if fall_through {
                    successors.push((index + 1, after));
                }
                for target in instr.targets() {
                    successors.push((index_of(target)?, after));
                }
            }
            FlowType::UnconditionalBranch => {
                for target in instr.targets() {
                    successors.push((index_of(target)?, after));
                }
            }
            FlowType::Leave => {
                for target in instr.targets() {
                    successors.push((index_of(target)?, 0));
                }
            }
            FlowType::Return | FlowType::Throw | FlowType::EndFinally => {}
        }

        for (successor, depth) in successors {
            if entry[successor].is_none() {
                entry[successor] = Some(depth);
                worklist.push_back(successor);
            }
        }
    }

    Ok(max)
}

fn lower_regions(
    body: &Body,
    instructions: &[(InstrId, &Instruction)],
    offsets: &[usize],
) -> Result<Vec<ExceptionHandler>> {
    let index_of = |target: InstrId| -> Result<usize> {
        instructions
            .iter()
            .position(|(id, _)| *id == target)
            .ok_or_else(|| {
                Error::DanglingReference(format!("region boundary {target} was removed"))
            })
    };
    #[allow(clippy::cast_possible_truncation)]
    let start = |id: InstrId| -> Result<u32> { Ok(offsets[index_of(id)?] as u32) };
    #[allow(clippy::cast_possible_truncation)]
    let end = |id: InstrId| -> Result<u32> { Ok(offsets[index_of(id)? + 1] as u32) };

    let mut handlers = Vec::with_capacity(body.instructions.regions().len());
    for region in body.instructions.regions() {
        let (flags, class_or_filter) = match region.kind {
            RegionKind::Catch(token) => (ExceptionHandlerFlags::EXCEPTION, token.value()),
            RegionKind::Filter(filter) => (ExceptionHandlerFlags::FILTER, start(filter)?),
            RegionKind::Finally => (ExceptionHandlerFlags::FINALLY, 0),
            RegionKind::Fault => (ExceptionHandlerFlags::FAULT, 0),
        };
        let try_offset = start(region.try_start)?;
        let handler_offset = start(region.handler_start)?;
        handlers.push(ExceptionHandler {
            flags,
            try_offset,
            try_length: end(region.try_end)? - try_offset,
            handler_offset,
            handler_length: end(region.handler_end)? - handler_offset,
            class_or_filter,
        });
    }

    Ok(handlers)
}

/// Lower a [`Body`] into a raw method body.
///
/// `local_sig` is the `StandAloneSig` token describing the body's locals, or the null token when
/// there are none. `returns_value` tells whether `ret` pops a value.
///
/// # Errors
/// Returns [`Error::DanglingReference`] or [`Error::InvalidInstruction`] if the stream fails
/// [`super::InstructionStream::validate`], and any error raised by the provider.
pub fn encode_body(
    body: &Body,
    local_sig: Token,
    returns_value: bool,
    provider: &mut dyn TokenProvider,
) -> Result<MethodBody> {
    body.instructions.validate()?;
    if body.instructions.is_empty() {
        return Err(Error::InvalidInstruction("method body is empty".to_string()));
    }

    let instructions: Vec<(InstrId, &Instruction)> = body.instructions.iter().collect();
    let (opcodes, offsets) = layout(&instructions)?;
    let code = emit(&instructions, &opcodes, &offsets, provider)?;
    let max_stack = max_stack(&instructions, body, returns_value, provider)?;
    let exception_handlers = lower_regions(body, &instructions, &offsets)?;

    Ok(MethodBody {
        max_stack,
        init_locals: body.init_locals,
        local_var_sig_token: local_sig,
        code,
        exception_handlers,
    })
}
