//! The CIL opcode table (ECMA-335 Partition III).
//!
//! Every opcode carries its mnemonic, the encoding of its inline operand, its fixed stack
//! behavior and its control flow kind. Calls and returns pop and push a signature-dependent
//! number of values, recorded as [`VARIABLE`].

use std::fmt;

use strum::{EnumCount, EnumIter};

/// Marker for a stack effect that depends on the call signature
pub const VARIABLE: u8 = 0xFF;

/// Prefix byte of the two-byte opcodes
pub const PREFIX_FE: u8 = 0xFE;

/// How an instruction's operand is encoded in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit literal
    ShortI,
    /// Unsigned 8-bit literal, used by prefixes
    ShortU,
    /// Signed 32-bit literal
    I,
    /// Signed 64-bit literal
    I8,
    /// 32-bit float literal
    ShortR,
    /// 64-bit float literal
    R,
    /// 8-bit argument index
    ShortArg,
    /// 16-bit argument index
    Arg,
    /// 8-bit local index
    ShortLocal,
    /// 16-bit local index
    Local,
    /// 8-bit relative branch offset
    ShortBranch,
    /// 32-bit relative branch offset
    Branch,
    /// Jump table
    Switch,
    /// `MethodDef`, `MemberRef` or `MethodSpec` token
    Method,
    /// `Field` or `MemberRef` token
    Field,
    /// `TypeDef`, `TypeRef` or `TypeSpec` token
    Type,
    /// `#US` heap token
    String,
    /// `StandAloneSig` token
    Sig,
    /// Any member or type token
    Tok,
}

impl OperandType {
    /// Encoded operand size in bytes, `None` for the variable sized jump table
    #[must_use]
    pub const fn size(self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::ShortI
            | OperandType::ShortU
            | OperandType::ShortArg
            | OperandType::ShortLocal
            | OperandType::ShortBranch => Some(1),
            OperandType::Arg | OperandType::Local => Some(2),
            OperandType::I
            | OperandType::ShortR
            | OperandType::Branch
            | OperandType::Method
            | OperandType::Field
            | OperandType::Type
            | OperandType::String
            | OperandType::Sig
            | OperandType::Tok => Some(4),
            OperandType::I8 | OperandType::R => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// Control flow kind of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Falls through or jumps
    ConditionalBranch,
    /// Always jumps
    UnconditionalBranch,
    /// Calls and falls through
    Call,
    /// Leaves the method
    Return,
    /// Jump table, falls through on no match
    Switch,
    /// Raises an exception
    Throw,
    /// Ends a finally, fault or filter block
    EndFinally,
    /// Exits a protected region
    Leave,
    /// Modifies the following instruction
    Prefix,
}

/// Static description of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCodeInfo {
    /// Mnemonic as written in CIL assembly
    pub name: &'static str,
    /// Operand encoding
    pub operand: OperandType,
    /// Values popped, or [`VARIABLE`]
    pub pops: u8,
    /// Values pushed, or [`VARIABLE`]
    pub pushes: u8,
    /// Control flow kind
    pub flow: FlowType,
}

macro_rules! opcodes {
    ($($variant:ident = $value:literal, $name:literal, $operand:ident, $pops:expr, $pushes:expr, $flow:ident;)*) => {
        /// A CIL opcode. Two-byte opcodes are numbered `0xFE00 | second byte`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
        #[repr(u16)]
        pub enum OpCode {
            $(
                #[doc = $name]
                $variant = $value,
            )*
        }

        impl OpCode {
            /// Look up an opcode by its numeric value
            #[must_use]
            pub fn from_value(value: u16) -> Option<OpCode> {
                match value {
                    $($value => Some(OpCode::$variant),)*
                    _ => None,
                }
            }

            /// Static description of this opcode
            #[must_use]
            pub const fn info(self) -> OpCodeInfo {
                match self {
                    $(
                        OpCode::$variant => OpCodeInfo {
                            name: $name,
                            operand: OperandType::$operand,
                            pops: $pops,
                            pushes: $pushes,
                            flow: FlowType::$flow,
                        },
                    )*
                }
            }
        }
    };
}

const V: u8 = VARIABLE;

opcodes! {
    Nop = 0x00, "nop", None, 0, 0, Sequential;
    Break = 0x01, "break", None, 0, 0, Sequential;
    Ldarg0 = 0x02, "ldarg.0", None, 0, 1, Sequential;
    Ldarg1 = 0x03, "ldarg.1", None, 0, 1, Sequential;
    Ldarg2 = 0x04, "ldarg.2", None, 0, 1, Sequential;
    Ldarg3 = 0x05, "ldarg.3", None, 0, 1, Sequential;
    Ldloc0 = 0x06, "ldloc.0", None, 0, 1, Sequential;
    Ldloc1 = 0x07, "ldloc.1", None, 0, 1, Sequential;
    Ldloc2 = 0x08, "ldloc.2", None, 0, 1, Sequential;
    Ldloc3 = 0x09, "ldloc.3", None, 0, 1, Sequential;
    Stloc0 = 0x0A, "stloc.0", None, 1, 0, Sequential;
    Stloc1 = 0x0B, "stloc.1", None, 1, 0, Sequential;
    Stloc2 = 0x0C, "stloc.2", None, 1, 0, Sequential;
    Stloc3 = 0x0D, "stloc.3", None, 1, 0, Sequential;
    LdargS = 0x0E, "ldarg.s", ShortArg, 0, 1, Sequential;
    LdargaS = 0x0F, "ldarga.s", ShortArg, 0, 1, Sequential;
    StargS = 0x10, "starg.s", ShortArg, 1, 0, Sequential;
    LdlocS = 0x11, "ldloc.s", ShortLocal, 0, 1, Sequential;
    LdlocaS = 0x12, "ldloca.s", ShortLocal, 0, 1, Sequential;
    StlocS = 0x13, "stloc.s", ShortLocal, 1, 0, Sequential;
    Ldnull = 0x14, "ldnull", None, 0, 1, Sequential;
    LdcI4M1 = 0x15, "ldc.i4.m1", None, 0, 1, Sequential;
    LdcI40 = 0x16, "ldc.i4.0", None, 0, 1, Sequential;
    LdcI41 = 0x17, "ldc.i4.1", None, 0, 1, Sequential;
    LdcI42 = 0x18, "ldc.i4.2", None, 0, 1, Sequential;
    LdcI43 = 0x19, "ldc.i4.3", None, 0, 1, Sequential;
    LdcI44 = 0x1A, "ldc.i4.4", None, 0, 1, Sequential;
    LdcI45 = 0x1B, "ldc.i4.5", None, 0, 1, Sequential;
    LdcI46 = 0x1C, "ldc.i4.6", None, 0, 1, Sequential;
    LdcI47 = 0x1D, "ldc.i4.7", None, 0, 1, Sequential;
    LdcI48 = 0x1E, "ldc.i4.8", None, 0, 1, Sequential;
    LdcI4S = 0x1F, "ldc.i4.s", ShortI, 0, 1, Sequential;
    LdcI4 = 0x20, "ldc.i4", I, 0, 1, Sequential;
    LdcI8 = 0x21, "ldc.i8", I8, 0, 1, Sequential;
    LdcR4 = 0x22, "ldc.r4", ShortR, 0, 1, Sequential;
    LdcR8 = 0x23, "ldc.r8", R, 0, 1, Sequential;
    Dup = 0x25, "dup", None, 1, 2, Sequential;
    Pop = 0x26, "pop", None, 1, 0, Sequential;
    Jmp = 0x27, "jmp", Method, 0, 0, Return;
    Call = 0x28, "call", Method, V, V, Call;
    Calli = 0x29, "calli", Sig, V, V, Call;
    Ret = 0x2A, "ret", None, V, 0, Return;
    BrS = 0x2B, "br.s", ShortBranch, 0, 0, UnconditionalBranch;
    BrfalseS = 0x2C, "brfalse.s", ShortBranch, 1, 0, ConditionalBranch;
    BrtrueS = 0x2D, "brtrue.s", ShortBranch, 1, 0, ConditionalBranch;
    BeqS = 0x2E, "beq.s", ShortBranch, 2, 0, ConditionalBranch;
    BgeS = 0x2F, "bge.s", ShortBranch, 2, 0, ConditionalBranch;
    BgtS = 0x30, "bgt.s", ShortBranch, 2, 0, ConditionalBranch;
    BleS = 0x31, "ble.s", ShortBranch, 2, 0, ConditionalBranch;
    BltS = 0x32, "blt.s", ShortBranch, 2, 0, ConditionalBranch;
    BneUnS = 0x33, "bne.un.s", ShortBranch, 2, 0, ConditionalBranch;
    BgeUnS = 0x34, "bge.un.s", ShortBranch, 2, 0, ConditionalBranch;
    BgtUnS = 0x35, "bgt.un.s", ShortBranch, 2, 0, ConditionalBranch;
    BleUnS = 0x36, "ble.un.s", ShortBranch, 2, 0, ConditionalBranch;
    BltUnS = 0x37, "blt.un.s", ShortBranch, 2, 0, ConditionalBranch;
    Br = 0x38, "br", Branch, 0, 0, UnconditionalBranch;
    Brfalse = 0x39, "brfalse", Branch, 1, 0, ConditionalBranch;
    Brtrue = 0x3A, "brtrue", Branch, 1, 0, ConditionalBranch;
    Beq = 0x3B, "beq", Branch, 2, 0, ConditionalBranch;
    Bge = 0x3C, "bge", Branch, 2, 0, ConditionalBranch;
    Bgt = 0x3D, "bgt", Branch, 2, 0, ConditionalBranch;
    Ble = 0x3E, "ble", Branch, 2, 0, ConditionalBranch;
    Blt = 0x3F, "blt", Branch, 2, 0, ConditionalBranch;
    BneUn = 0x40, "bne.un", Branch, 2, 0, ConditionalBranch;
    BgeUn = 0x41, "bge.un", Branch, 2, 0, ConditionalBranch;
    BgtUn = 0x42, "bgt.un", Branch, 2, 0, ConditionalBranch;
    BleUn = 0x43, "ble.un", Branch, 2, 0, ConditionalBranch;
    BltUn = 0x44, "blt.un", Branch, 2, 0, ConditionalBranch;
    Switch = 0x45, "switch", Switch, 1, 0, Switch;
    LdindI1 = 0x46, "ldind.i1", None, 1, 1, Sequential;
    LdindU1 = 0x47, "ldind.u1", None, 1, 1, Sequential;
    LdindI2 = 0x48, "ldind.i2", None, 1, 1, Sequential;
    LdindU2 = 0x49, "ldind.u2", None, 1, 1, Sequential;
    LdindI4 = 0x4A, "ldind.i4", None, 1, 1, Sequential;
    LdindU4 = 0x4B, "ldind.u4", None, 1, 1, Sequential;
    LdindI8 = 0x4C, "ldind.i8", None, 1, 1, Sequential;
    LdindI = 0x4D, "ldind.i", None, 1, 1, Sequential;
    LdindR4 = 0x4E, "ldind.r4", None, 1, 1, Sequential;
    LdindR8 = 0x4F, "ldind.r8", None, 1, 1, Sequential;
    LdindRef = 0x50, "ldind.ref", None, 1, 1, Sequential;
    StindRef = 0x51, "stind.ref", None, 2, 0, Sequential;
    StindI1 = 0x52, "stind.i1", None, 2, 0, Sequential;
    StindI2 = 0x53, "stind.i2", None, 2, 0, Sequential;
    StindI4 = 0x54, "stind.i4", None, 2, 0, Sequential;
    StindI8 = 0x55, "stind.i8", None, 2, 0, Sequential;
    StindR4 = 0x56, "stind.r4", None, 2, 0, Sequential;
    StindR8 = 0x57, "stind.r8", None, 2, 0, Sequential;
    Add = 0x58, "add", None, 2, 1, Sequential;
    Sub = 0x59, "sub", None, 2, 1, Sequential;
    Mul = 0x5A, "mul", None, 2, 1, Sequential;
    Div = 0x5B, "div", None, 2, 1, Sequential;
    DivUn = 0x5C, "div.un", None, 2, 1, Sequential;
    Rem = 0x5D, "rem", None, 2, 1, Sequential;
    RemUn = 0x5E, "rem.un", None, 2, 1, Sequential;
    And = 0x5F, "and", None, 2, 1, Sequential;
    Or = 0x60, "or", None, 2, 1, Sequential;
    Xor = 0x61, "xor", None, 2, 1, Sequential;
    Shl = 0x62, "shl", None, 2, 1, Sequential;
    Shr = 0x63, "shr", None, 2, 1, Sequential;
    ShrUn = 0x64, "shr.un", None, 2, 1, Sequential;
    Neg = 0x65, "neg", None, 1, 1, Sequential;
    Not = 0x66, "not", None, 1, 1, Sequential;
    ConvI1 = 0x67, "conv.i1", None, 1, 1, Sequential;
    ConvI2 = 0x68, "conv.i2", None, 1, 1, Sequential;
    ConvI4 = 0x69, "conv.i4", None, 1, 1, Sequential;
    ConvI8 = 0x6A, "conv.i8", None, 1, 1, Sequential;
    ConvR4 = 0x6B, "conv.r4", None, 1, 1, Sequential;
    ConvR8 = 0x6C, "conv.r8", None, 1, 1, Sequential;
    ConvU4 = 0x6D, "conv.u4", None, 1, 1, Sequential;
    ConvU8 = 0x6E, "conv.u8", None, 1, 1, Sequential;
    Callvirt = 0x6F, "callvirt", Method, V, V, Call;
    Cpobj = 0x70, "cpobj", Type, 2, 0, Sequential;
    Ldobj = 0x71, "ldobj", Type, 1, 1, Sequential;
    Ldstr = 0x72, "ldstr", String, 0, 1, Sequential;
    Newobj = 0x73, "newobj", Method, V, 1, Call;
    Castclass = 0x74, "castclass", Type, 1, 1, Sequential;
    Isinst = 0x75, "isinst", Type, 1, 1, Sequential;
    ConvRUn = 0x76, "conv.r.un", None, 1, 1, Sequential;
    Unbox = 0x79, "unbox", Type, 1, 1, Sequential;
    Throw = 0x7A, "throw", None, 1, 0, Throw;
    Ldfld = 0x7B, "ldfld", Field, 1, 1, Sequential;
    Ldflda = 0x7C, "ldflda", Field, 1, 1, Sequential;
    Stfld = 0x7D, "stfld", Field, 2, 0, Sequential;
    Ldsfld = 0x7E, "ldsfld", Field, 0, 1, Sequential;
    Ldsflda = 0x7F, "ldsflda", Field, 0, 1, Sequential;
    Stsfld = 0x80, "stsfld", Field, 1, 0, Sequential;
    Stobj = 0x81, "stobj", Type, 2, 0, Sequential;
    ConvOvfI1Un = 0x82, "conv.ovf.i1.un", None, 1, 1, Sequential;
    ConvOvfI2Un = 0x83, "conv.ovf.i2.un", None, 1, 1, Sequential;
    ConvOvfI4Un = 0x84, "conv.ovf.i4.un", None, 1, 1, Sequential;
    ConvOvfI8Un = 0x85, "conv.ovf.i8.un", None, 1, 1, Sequential;
    ConvOvfU1Un = 0x86, "conv.ovf.u1.un", None, 1, 1, Sequential;
    ConvOvfU2Un = 0x87, "conv.ovf.u2.un", None, 1, 1, Sequential;
    ConvOvfU4Un = 0x88, "conv.ovf.u4.un", None, 1, 1, Sequential;
    ConvOvfU8Un = 0x89, "conv.ovf.u8.un", None, 1, 1, Sequential;
    ConvOvfIUn = 0x8A, "conv.ovf.i.un", None, 1, 1, Sequential;
    ConvOvfUUn = 0x8B, "conv.ovf.u.un", None, 1, 1, Sequential;
    Box = 0x8C, "box", Type, 1, 1, Sequential;
    Newarr = 0x8D, "newarr", Type, 1, 1, Sequential;
    Ldlen = 0x8E, "ldlen", None, 1, 1, Sequential;
    Ldelema = 0x8F, "ldelema", Type, 2, 1, Sequential;
    LdelemI1 = 0x90, "ldelem.i1", None, 2, 1, Sequential;
    LdelemU1 = 0x91, "ldelem.u1", None, 2, 1, Sequential;
    LdelemI2 = 0x92, "ldelem.i2", None, 2, 1, Sequential;
    LdelemU2 = 0x93, "ldelem.u2", None, 2, 1, Sequential;
    LdelemI4 = 0x94, "ldelem.i4", None, 2, 1, Sequential;
    LdelemU4 = 0x95, "ldelem.u4", None, 2, 1, Sequential;
    LdelemI8 = 0x96, "ldelem.i8", None, 2, 1, Sequential;
    LdelemI = 0x97, "ldelem.i", None, 2, 1, Sequential;
    LdelemR4 = 0x98, "ldelem.r4", None, 2, 1, Sequential;
    LdelemR8 = 0x99, "ldelem.r8", None, 2, 1, Sequential;
    LdelemRef = 0x9A, "ldelem.ref", None, 2, 1, Sequential;
    StelemI = 0x9B, "stelem.i", None, 3, 0, Sequential;
    StelemI1 = 0x9C, "stelem.i1", None, 3, 0, Sequential;
    StelemI2 = 0x9D, "stelem.i2", None, 3, 0, Sequential;
    StelemI4 = 0x9E, "stelem.i4", None, 3, 0, Sequential;
    StelemI8 = 0x9F, "stelem.i8", None, 3, 0, Sequential;
    StelemR4 = 0xA0, "stelem.r4", None, 3, 0, Sequential;
    StelemR8 = 0xA1, "stelem.r8", None, 3, 0, Sequential;
    StelemRef = 0xA2, "stelem.ref", None, 3, 0, Sequential;
    Ldelem = 0xA3, "ldelem", Type, 2, 1, Sequential;
    Stelem = 0xA4, "stelem", Type, 3, 0, Sequential;
    UnboxAny = 0xA5, "unbox.any", Type, 1, 1, Sequential;
    ConvOvfI1 = 0xB3, "conv.ovf.i1", None, 1, 1, Sequential;
    ConvOvfU1 = 0xB4, "conv.ovf.u1", None, 1, 1, Sequential;
    ConvOvfI2 = 0xB5, "conv.ovf.i2", None, 1, 1, Sequential;
    ConvOvfU2 = 0xB6, "conv.ovf.u2", None, 1, 1, Sequential;
    ConvOvfI4 = 0xB7, "conv.ovf.i4", None, 1, 1, Sequential;
    ConvOvfU4 = 0xB8, "conv.ovf.u4", None, 1, 1, Sequential;
    ConvOvfI8 = 0xB9, "conv.ovf.i8", None, 1, 1, Sequential;
    ConvOvfU8 = 0xBA, "conv.ovf.u8", None, 1, 1, Sequential;
    Refanyval = 0xC2, "refanyval", Type, 1, 1, Sequential;
    Ckfinite = 0xC3, "ckfinite", None, 1, 1, Sequential;
    Mkrefany = 0xC6, "mkrefany", Type, 1, 1, Sequential;
    Ldtoken = 0xD0, "ldtoken", Tok, 0, 1, Sequential;
    ConvU2 = 0xD1, "conv.u2", None, 1, 1, Sequential;
    ConvU1 = 0xD2, "conv.u1", None, 1, 1, Sequential;
    ConvI = 0xD3, "conv.i", None, 1, 1, Sequential;
    ConvOvfI = 0xD4, "conv.ovf.i", None, 1, 1, Sequential;
    ConvOvfU = 0xD5, "conv.ovf.u", None, 1, 1, Sequential;
    AddOvf = 0xD6, "add.ovf", None, 2, 1, Sequential;
    AddOvfUn = 0xD7, "add.ovf.un", None, 2, 1, Sequential;
    MulOvf = 0xD8, "mul.ovf", None, 2, 1, Sequential;
    MulOvfUn = 0xD9, "mul.ovf.un", None, 2, 1, Sequential;
    SubOvf = 0xDA, "sub.ovf", None, 2, 1, Sequential;
    SubOvfUn = 0xDB, "sub.ovf.un", None, 2, 1, Sequential;
    Endfinally = 0xDC, "endfinally", None, 0, 0, EndFinally;
    Leave = 0xDD, "leave", Branch, 0, 0, Leave;
    LeaveS = 0xDE, "leave.s", ShortBranch, 0, 0, Leave;
    StindI = 0xDF, "stind.i", None, 2, 0, Sequential;
    ConvU = 0xE0, "conv.u", None, 1, 1, Sequential;
    Arglist = 0xFE00, "arglist", None, 0, 1, Sequential;
    Ceq = 0xFE01, "ceq", None, 2, 1, Sequential;
    Cgt = 0xFE02, "cgt", None, 2, 1, Sequential;
    CgtUn = 0xFE03, "cgt.un", None, 2, 1, Sequential;
    Clt = 0xFE04, "clt", None, 2, 1, Sequential;
    CltUn = 0xFE05, "clt.un", None, 2, 1, Sequential;
    Ldftn = 0xFE06, "ldftn", Method, 0, 1, Sequential;
    Ldvirtftn = 0xFE07, "ldvirtftn", Method, 1, 1, Sequential;
    Ldarg = 0xFE09, "ldarg", Arg, 0, 1, Sequential;
    Ldarga = 0xFE0A, "ldarga", Arg, 0, 1, Sequential;
    Starg = 0xFE0B, "starg", Arg, 1, 0, Sequential;
    Ldloc = 0xFE0C, "ldloc", Local, 0, 1, Sequential;
    Ldloca = 0xFE0D, "ldloca", Local, 0, 1, Sequential;
    Stloc = 0xFE0E, "stloc", Local, 1, 0, Sequential;
    Localloc = 0xFE0F, "localloc", None, 1, 1, Sequential;
    Endfilter = 0xFE11, "endfilter", None, 1, 0, EndFinally;
    Unaligned = 0xFE12, "unaligned.", ShortU, 0, 0, Prefix;
    Volatile = 0xFE13, "volatile.", None, 0, 0, Prefix;
    Tail = 0xFE14, "tail.", None, 0, 0, Prefix;
    Initobj = 0xFE15, "initobj", Type, 1, 0, Sequential;
    Constrained = 0xFE16, "constrained.", Type, 0, 0, Prefix;
    Cpblk = 0xFE17, "cpblk", None, 3, 0, Sequential;
    Initblk = 0xFE18, "initblk", None, 3, 0, Sequential;
    No = 0xFE19, "no.", ShortU, 0, 0, Prefix;
    Rethrow = 0xFE1A, "rethrow", None, 0, 0, Throw;
    Sizeof = 0xFE1C, "sizeof", Type, 0, 1, Sequential;
    Refanytype = 0xFE1D, "refanytype", None, 1, 1, Sequential;
    Readonly = 0xFE1E, "readonly.", None, 0, 0, Prefix;
}

impl OpCode {
    /// Numeric value, `0xFE00 | byte` for two-byte opcodes
    #[must_use]
    pub const fn value(self) -> u16 {
        self as u16
    }

    /// Mnemonic as written in CIL assembly
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.info().name
    }

    /// Operand encoding
    #[must_use]
    pub const fn operand_type(self) -> OperandType {
        self.info().operand
    }

    /// Control flow kind
    #[must_use]
    pub const fn flow(self) -> FlowType {
        self.info().flow
    }

    /// Number of bytes of the opcode itself
    #[must_use]
    pub const fn size(self) -> usize {
        if self.value() > 0xFF {
            2
        } else {
            1
        }
    }

    /// Append the opcode bytes to `buffer`
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(self, buffer: &mut Vec<u8>) {
        let value = self.value();
        if value > 0xFF {
            buffer.push(PREFIX_FE);
        }
        buffer.push(value as u8);
    }

    /// True for opcodes taking a relative branch target
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(
            self.operand_type(),
            OperandType::ShortBranch | OperandType::Branch
        )
    }

    /// The 32-bit offset form of a short branch, itself for every other opcode
    #[must_use]
    pub const fn long_form(self) -> OpCode {
        match self {
            OpCode::BrS => OpCode::Br,
            OpCode::BrfalseS => OpCode::Brfalse,
            OpCode::BrtrueS => OpCode::Brtrue,
            OpCode::BeqS => OpCode::Beq,
            OpCode::BgeS => OpCode::Bge,
            OpCode::BgtS => OpCode::Bgt,
            OpCode::BleS => OpCode::Ble,
            OpCode::BltS => OpCode::Blt,
            OpCode::BneUnS => OpCode::BneUn,
            OpCode::BgeUnS => OpCode::BgeUn,
            OpCode::BgtUnS => OpCode::BgtUn,
            OpCode::BleUnS => OpCode::BleUn,
            OpCode::BltUnS => OpCode::BltUn,
            OpCode::LeaveS => OpCode::Leave,
            other => other,
        }
    }

    /// The 8-bit offset form of a long branch, itself for every other opcode
    #[must_use]
    pub const fn short_form(self) -> OpCode {
        match self {
            OpCode::Br => OpCode::BrS,
            OpCode::Brfalse => OpCode::BrfalseS,
            OpCode::Brtrue => OpCode::BrtrueS,
            OpCode::Beq => OpCode::BeqS,
            OpCode::Bge => OpCode::BgeS,
            OpCode::Bgt => OpCode::BgtS,
            OpCode::Ble => OpCode::BleS,
            OpCode::Blt => OpCode::BltS,
            OpCode::BneUn => OpCode::BneUnS,
            OpCode::BgeUn => OpCode::BgeUnS,
            OpCode::BgtUn => OpCode::BgtUnS,
            OpCode::BleUn => OpCode::BleUnS,
            OpCode::BltUn => OpCode::BltUnS,
            OpCode::Leave => OpCode::LeaveS,
            other => other,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn lookup_matches_value() {
        for opcode in OpCode::iter() {
            assert_eq!(OpCode::from_value(opcode.value()), Some(opcode));
        }
        assert_eq!(OpCode::from_value(0x24), None);
        assert_eq!(OpCode::from_value(0xFE08), None);
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut names: Vec<&str> = OpCode::iter().map(OpCode::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OpCode::COUNT);
    }

    #[test]
    fn branch_forms_pair_up() {
        for opcode in OpCode::iter().filter(|o| o.operand_type() == OperandType::ShortBranch) {
            let long = opcode.long_form();
            assert_eq!(long.operand_type(), OperandType::Branch, "{opcode}");
            assert_eq!(long.short_form(), opcode);
            assert_eq!(long.flow(), opcode.flow());
        }
        assert_eq!(OpCode::Nop.long_form(), OpCode::Nop);
    }

    #[test]
    fn encoding() {
        let mut buffer = Vec::new();
        OpCode::Ldstr.write(&mut buffer);
        OpCode::Ceq.write(&mut buffer);
        assert_eq!(buffer, [0x72, 0xFE, 0x01]);
        assert_eq!(OpCode::Ceq.size(), 2);
        assert_eq!(OpCode::LeaveS.to_string(), "leave.s");
    }
}
