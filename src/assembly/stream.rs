//! The editable instruction stream of a method body.
//!
//! Instructions live in an arena and are addressed by [`InstrId`] handles that stay valid across
//! edits; a separate list holds the live handles in program order. Branch operands and exception
//! region boundaries store handles, never positions, so inserting an instruction does not touch
//! any of them.
//!
//! Removing an instruction tombstones its arena slot. Every reference to it is moved first:
//! branch targets and region start boundaries to the following instruction, region end
//! boundaries to the preceding one. A removal that would leave a reference with nowhere to go
//! fails with [`Error::DanglingReference`] and leaves the stream unchanged.
//!
//! # Example
//!
//! ```rust
//! use cilpatch::assembly::{Instruction, InstructionStream, OpCode};
//!
//! let mut stream = InstructionStream::new();
//! let ret = stream.push(Instruction::simple(OpCode::Ret));
//! let nop = stream.insert_before(ret, Instruction::simple(OpCode::Nop))?;
//! assert_eq!(stream.first(), Some(nop));
//! stream.remove(nop)?;
//! assert_eq!(stream.first(), Some(ret));
//! # Ok::<(), cilpatch::Error>(())
//! ```

use std::fmt;

use crate::{
    assembly::Instruction,
    metadata::{signatures::TypeSignature, token::Token},
    Error, Result,
};

/// Stable handle of an instruction inside one [`InstructionStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A typed local variable slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalSlot {
    /// Slot type as it appears in the local variable signature
    pub ty: TypeSignature,
}

/// Kind of an exception handling clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Typed catch, with the caught type's `TypeDefOrRef` token
    Catch(Token),
    /// Filtered catch, with the first instruction of the filter block
    Filter(InstrId),
    /// Finally block
    Finally,
    /// Fault block
    Fault,
}

/// A protected block and its handler.
///
/// All four boundaries are inclusive and name live instructions of the owning stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionRegion {
    /// Clause kind and caught type
    pub kind: RegionKind,
    /// First protected instruction
    pub try_start: InstrId,
    /// Last protected instruction
    pub try_end: InstrId,
    /// First handler instruction
    pub handler_start: InstrId,
    /// Last handler instruction
    pub handler_end: InstrId,
}

impl ExceptionRegion {
    fn starts_mut(&mut self) -> impl Iterator<Item = &mut InstrId> {
        let filter = match &mut self.kind {
            RegionKind::Filter(start) => Some(start),
            _ => None,
        };
        [&mut self.try_start, &mut self.handler_start]
            .into_iter()
            .chain(filter)
    }

    fn ends_mut(&mut self) -> impl Iterator<Item = &mut InstrId> {
        [&mut self.try_end, &mut self.handler_end].into_iter()
    }

    /// Every instruction referenced by the region
    #[must_use]
    pub fn boundaries(&self) -> Vec<InstrId> {
        let mut ids = vec![
            self.try_start,
            self.try_end,
            self.handler_start,
            self.handler_end,
        ];
        if let RegionKind::Filter(start) = self.kind {
            ids.push(start);
        }
        ids
    }
}

/// Ordered, editable sequence of instructions with its exception regions.
///
/// Two streams are equal when they hold the same instructions in the same order with branch
/// targets and region boundaries at the same positions, whatever their handles.
#[derive(Debug, Clone, Default)]
pub struct InstructionStream {
    arena: Vec<Option<Instruction>>,
    order: Vec<InstrId>,
    regions: Vec<ExceptionRegion>,
}

impl InstructionStream {
    /// Create an empty stream
    #[must_use]
    pub fn new() -> Self {
        InstructionStream::default()
    }

    fn alloc(&mut self, instruction: Instruction) -> InstrId {
        #[allow(clippy::cast_possible_truncation)]
        let id = InstrId(self.arena.len() as u32);
        self.arena.push(Some(instruction));
        id
    }

    fn index_of(&self, id: InstrId) -> Result<usize> {
        self.position(id).ok_or_else(|| {
            Error::DanglingReference(format!("instruction {id} is not part of the stream"))
        })
    }

    /// Append an instruction at the end
    pub fn push(&mut self, instruction: Instruction) -> InstrId {
        let id = self.alloc(instruction);
        self.order.push(id);
        id
    }

    /// Insert an instruction directly before `anchor`.
    ///
    /// References to `anchor` are not moved: a branch to `anchor` skips the new instruction.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] if `anchor` is not live.
    pub fn insert_before(&mut self, anchor: InstrId, instruction: Instruction) -> Result<InstrId> {
        let index = self.index_of(anchor)?;
        let id = self.alloc(instruction);
        self.order.insert(index, id);
        Ok(id)
    }

    /// Insert an instruction directly after `anchor`.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] if `anchor` is not live.
    pub fn insert_after(&mut self, anchor: InstrId, instruction: Instruction) -> Result<InstrId> {
        let index = self.index_of(anchor)?;
        let id = self.alloc(instruction);
        self.order.insert(index + 1, id);
        Ok(id)
    }

    /// Insert an instruction at the start of the stream
    pub fn push_front(&mut self, instruction: Instruction) -> InstrId {
        let id = self.alloc(instruction);
        self.order.insert(0, id);
        id
    }

    /// Remove an instruction, moving every reference to it.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] if `id` is not live, if it is still referenced and
    /// has no neighbor to take over the reference, or if a region would become empty.
    pub fn remove(&mut self, id: InstrId) -> Result<Instruction> {
        let index = self.index_of(id)?;
        let next = self.order.get(index + 1).copied();
        let prev = index.checked_sub(1).map(|i| self.order[i]);

        let branch_referenced = self
            .iter()
            .any(|(other, instr)| other != id && instr.targets().contains(&id));
        let start_referenced = self.regions.iter_mut().any(|r| r.starts_mut().any(|b| *b == id));
        let end_referenced = self.regions.iter_mut().any(|r| r.ends_mut().any(|b| *b == id));

        if (branch_referenced || start_referenced) && next.is_none() {
            return Err(Error::DanglingReference(format!(
                "removing last instruction {id} that is still referenced"
            )));
        }
        if end_referenced && prev.is_none() {
            return Err(Error::DanglingReference(format!(
                "removing first instruction {id} that ends a region"
            )));
        }
        for region in &self.regions {
            if (region.try_start == id && region.try_end == id)
                || (region.handler_start == id && region.handler_end == id)
            {
                return Err(Error::DanglingReference(format!(
                    "removing {id} would empty an exception region"
                )));
            }
        }

        if let Some(next) = next {
            for (_, instr) in self.iter_mut() {
                for target in instr.targets_mut() {
                    if *target == id {
                        *target = next;
                    }
                }
            }
            for region in &mut self.regions {
                for boundary in region.starts_mut() {
                    if *boundary == id {
                        *boundary = next;
                    }
                }
            }
        }
        if let Some(prev) = prev {
            for region in &mut self.regions {
                for boundary in region.ends_mut() {
                    if *boundary == id {
                        *boundary = prev;
                    }
                }
            }
        }

        self.order.remove(index);
        self.arena[id.0 as usize].take().ok_or_else(|| {
            Error::DanglingReference(format!("instruction {id} was already removed"))
        })
    }

    /// First instruction in program order
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.order.first().copied()
    }

    /// Last instruction in program order
    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.order.last().copied()
    }

    /// The instruction following `id`
    #[must_use]
    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        let index = self.position(id)?;
        self.order.get(index + 1).copied()
    }

    /// Look up a live instruction
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.arena.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Look up a live instruction for modification
    pub fn get_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.arena.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Iterate over live instructions in program order
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> {
        self.order
            .iter()
            .filter_map(|id| self.get(*id).map(|instr| (*id, instr)))
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (InstrId, &mut Instruction)> {
        self.arena
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                #[allow(clippy::cast_possible_truncation)]
                slot.as_mut().map(|instr| (InstrId(index as u32), instr))
            })
    }

    /// Live handles in program order
    #[must_use]
    pub fn ids(&self) -> &[InstrId] {
        &self.order
    }

    /// Program order position of `id`, `None` if it is not live
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        if self.get(id).is_none() {
            return None;
        }
        self.order.iter().position(|other| *other == id)
    }

    /// Number of live instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if the stream holds no instruction
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Exception regions, innermost first
    #[must_use]
    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    /// Append an exception region. Regions must be added innermost first.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] if a boundary is not a live instruction.
    pub fn add_region(&mut self, region: ExceptionRegion) -> Result<()> {
        for boundary in region.boundaries() {
            self.index_of(boundary)?;
        }
        self.regions.push(region);
        Ok(())
    }

    /// Check the structural invariants of the stream.
    ///
    /// Every branch target and region boundary must be live, operands must fit their opcodes,
    /// each region must have ordered, disjoint protected and handler ranges, and nested regions
    /// must be listed before the regions enclosing them.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] or [`Error::InvalidInstruction`] describing the first
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        for (id, instr) in self.iter() {
            instr.check_operand()?;
            for target in instr.targets() {
                if self.position(target).is_none() {
                    return Err(Error::DanglingReference(format!(
                        "{id} ({}) branches to removed instruction {target}",
                        instr.opcode
                    )));
                }
            }
        }

        let mut spans = Vec::with_capacity(self.regions.len());
        for (index, region) in self.regions.iter().enumerate() {
            let try_span = (self.index_of(region.try_start)?, self.index_of(region.try_end)?);
            let handler_span = (
                self.index_of(region.handler_start)?,
                self.index_of(region.handler_end)?,
            );
            if try_span.0 > try_span.1 || handler_span.0 > handler_span.1 {
                return Err(Error::InvalidInstruction(format!(
                    "exception region {index} has reversed boundaries"
                )));
            }
            if !(try_span.1 < handler_span.0 || handler_span.1 < try_span.0) {
                return Err(Error::InvalidInstruction(format!(
                    "exception region {index} protects its own handler"
                )));
            }
            if let RegionKind::Filter(filter) = region.kind {
                let filter = self.index_of(filter)?;
                if filter >= handler_span.0 || filter <= try_span.1 {
                    return Err(Error::InvalidInstruction(format!(
                        "exception region {index} has its filter outside try and handler"
                    )));
                }
            }
            spans.push((try_span, handler_span));
        }

        let contains = |outer: (usize, usize), inner: (usize, usize)| {
            outer.0 <= inner.0 && inner.1 <= outer.1 && outer != inner
        };
        for (i, (try_i, handler_i)) in spans.iter().enumerate() {
            for (try_j, handler_j) in spans.iter().skip(i + 1) {
                if contains(*try_i, *try_j)
                    || contains(*handler_i, *try_j)
                    || contains(*try_i, *handler_j)
                    || contains(*handler_i, *handler_j)
                {
                    return Err(Error::InvalidInstruction(format!(
                        "exception region {i} encloses a region listed after it"
                    )));
                }
            }
        }

        Ok(())
    }
}

impl InstructionStream {
    /// Copy of the stream with handles renumbered by program order
    fn canonical(&self) -> (Vec<Instruction>, Vec<ExceptionRegion>) {
        #[allow(clippy::cast_possible_truncation)]
        let renumber = |id: &mut InstrId| {
            if let Some(position) = self.position(*id) {
                *id = InstrId(position as u32);
            }
        };

        let instructions = self
            .iter()
            .map(|(_, instr)| {
                let mut instr = instr.clone();
                for target in instr.targets_mut() {
                    renumber(target);
                }
                instr
            })
            .collect();
        let regions = self
            .regions
            .iter()
            .map(|region| {
                let mut region = *region;
                region.starts_mut().for_each(&renumber);
                region.ends_mut().for_each(&renumber);
                region
            })
            .collect();
        (instructions, regions)
    }
}

impl PartialEq for InstructionStream {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.regions.len() == other.regions.len()
            && self.canonical() == other.canonical()
    }
}

/// A method body: instructions, local slots and header options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    /// The instruction stream
    pub instructions: InstructionStream,
    /// Local variable slots in declaration order
    pub locals: Vec<LocalSlot>,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
    pub(crate) local_sig: Option<Token>,
}

impl Body {
    /// Create an empty body that zero-initializes its locals
    #[must_use]
    pub fn new() -> Self {
        Body {
            init_locals: true,
            ..Body::default()
        }
    }

    /// Declare a local slot and return its index.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInstruction`] once 65535 slots are declared.
    pub fn add_local(&mut self, ty: TypeSignature) -> Result<u16> {
        let Ok(index) = u16::try_from(self.locals.len()) else {
            return Err(Error::InvalidInstruction("too many local slots".to_string()));
        };
        if index == u16::MAX {
            return Err(Error::InvalidInstruction("too many local slots".to_string()));
        }
        self.locals.push(LocalSlot { ty });
        Ok(index)
    }

    /// Local slot types in declaration order
    #[must_use]
    pub fn local_types(&self) -> Vec<TypeSignature> {
        self.locals.iter().map(|slot| slot.ty.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::OpCode;

    fn simple(opcode: OpCode) -> Instruction {
        Instruction::simple(opcode)
    }

    #[test]
    fn insert_and_order() {
        let mut stream = InstructionStream::new();
        let a = stream.push(simple(OpCode::Nop));
        let c = stream.push(simple(OpCode::Ret));
        let b = stream.insert_after(a, simple(OpCode::Pop)).unwrap();
        let z = stream.insert_before(a, simple(OpCode::Dup)).unwrap();

        assert_eq!(stream.ids(), &[z, a, b, c]);
        assert_eq!(stream.position(b), Some(2));
        assert_eq!(stream.next(b), Some(c));
        assert_eq!(stream.len(), 4);
    }

    #[test]
    fn remove_moves_branch_targets_forward() {
        let mut stream = InstructionStream::new();
        let nop = stream.push(simple(OpCode::Nop));
        let ret = stream.push(simple(OpCode::Ret));
        let br = stream.push_front(Instruction::branch(OpCode::BrS, nop));

        stream.remove(nop).unwrap();
        assert_eq!(stream.get(br).unwrap().targets(), vec![ret]);
        assert!(stream.get(nop).is_none());
        assert!(stream.position(nop).is_none());
        stream.validate().unwrap();
    }

    #[test]
    fn remove_last_referenced_fails() {
        let mut stream = InstructionStream::new();
        let ret = stream.push(simple(OpCode::Ret));
        stream.push_front(Instruction::branch(OpCode::BrS, ret));

        assert!(matches!(stream.remove(ret), Err(Error::DanglingReference(_))));
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn remove_moves_region_boundaries() {
        let mut stream = InstructionStream::new();
        let t0 = stream.push(simple(OpCode::Nop));
        let t1 = stream.push(simple(OpCode::Nop));
        let leave_try = stream.push(simple(OpCode::Nop));
        let h0 = stream.push(simple(OpCode::Pop));
        let h1 = stream.push(simple(OpCode::Nop));
        let ret = stream.push(simple(OpCode::Ret));
        for id in [leave_try, h1] {
            if let Some(instr) = stream.get_mut(id) {
                *instr = Instruction::branch(OpCode::LeaveS, ret);
            }
        }
        stream
            .add_region(ExceptionRegion {
                kind: RegionKind::Catch(Token::new(0x0100_0001)),
                try_start: t0,
                try_end: leave_try,
                handler_start: h0,
                handler_end: h1,
            })
            .unwrap();

        stream.remove(t0).unwrap();
        assert_eq!(stream.regions()[0].try_start, t1);

        let h2 = stream.insert_after(h1, simple(OpCode::Nop)).unwrap();
        stream.remove(h2).unwrap();
        assert_eq!(stream.regions()[0].handler_end, h1);
        stream.validate().unwrap();

        stream.remove(t1).unwrap();
        assert!(matches!(
            stream.remove(leave_try),
            Err(Error::DanglingReference(_))
        ));
    }

    #[test]
    fn validate_detects_bad_regions() {
        let mut stream = InstructionStream::new();
        let a = stream.push(simple(OpCode::Nop));
        let b = stream.push(simple(OpCode::Nop));
        let c = stream.push(simple(OpCode::Nop));
        let d = stream.push(simple(OpCode::Nop));
        stream.push(simple(OpCode::Ret));

        let outer = ExceptionRegion {
            kind: RegionKind::Finally,
            try_start: a,
            try_end: c,
            handler_start: d,
            handler_end: d,
        };
        let inner = ExceptionRegion {
            kind: RegionKind::Fault,
            try_start: a,
            try_end: a,
            handler_start: b,
            handler_end: b,
        };

        let mut wrong_order = stream.clone();
        wrong_order.add_region(outer).unwrap();
        wrong_order.add_region(inner).unwrap();
        assert!(wrong_order.validate().is_err());

        let mut right_order = stream.clone();
        right_order.add_region(inner).unwrap();
        right_order.add_region(outer).unwrap();
        right_order.validate().unwrap();

        let mut overlapping = stream;
        overlapping
            .add_region(ExceptionRegion {
                kind: RegionKind::Finally,
                try_start: a,
                try_end: c,
                handler_start: b,
                handler_end: d,
            })
            .unwrap();
        assert!(overlapping.validate().is_err());
    }

    #[test]
    fn handler_nested_in_earlier_try_is_out_of_order() {
        let mut stream = InstructionStream::new();
        let ids: Vec<InstrId> = (0..6).map(|_| stream.push(simple(OpCode::Nop))).collect();
        stream.push(simple(OpCode::Ret));

        // the handler of `inner` lies inside the try block of `outer`
        let outer = ExceptionRegion {
            kind: RegionKind::Finally,
            try_start: ids[2],
            try_end: ids[4],
            handler_start: ids[5],
            handler_end: ids[5],
        };
        let inner = ExceptionRegion {
            kind: RegionKind::Fault,
            try_start: ids[0],
            try_end: ids[1],
            handler_start: ids[3],
            handler_end: ids[3],
        };

        let mut wrong_order = stream.clone();
        wrong_order.add_region(outer).unwrap();
        wrong_order.add_region(inner).unwrap();
        assert!(wrong_order.validate().is_err());

        let mut right_order = stream;
        right_order.add_region(inner).unwrap();
        right_order.add_region(outer).unwrap();
        right_order.validate().unwrap();
    }

    #[test]
    fn locals() {
        let mut body = Body::new();
        assert_eq!(body.add_local(TypeSignature::I4).unwrap(), 0);
        assert_eq!(body.add_local(TypeSignature::String).unwrap(), 1);
        assert_eq!(
            body.local_types(),
            vec![TypeSignature::I4, TypeSignature::String]
        );
    }

    #[test]
    fn equality_ignores_handles() {
        let mut edited = InstructionStream::new();
        let ret = edited.push(Instruction::simple(OpCode::Ret));
        edited.push_front(Instruction::branch(OpCode::BrS, ret));
        let nop = edited.push_front(Instruction::simple(OpCode::Nop));
        edited.remove(nop).unwrap();

        let mut fresh = InstructionStream::new();
        let ret = fresh.push(Instruction::simple(OpCode::Ret));
        fresh.push_front(Instruction::branch(OpCode::BrS, ret));
        assert_eq!(edited, fresh);

        fresh.push_front(Instruction::simple(OpCode::Nop));
        assert_ne!(edited, fresh);
    }
}
