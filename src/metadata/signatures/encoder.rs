//! Signature blob encoding, the inverse of [`super::SignatureParser`].

use crate::{
    file::io::{write_compressed_int, write_compressed_uint},
    metadata::{
        signatures::{
            SignatureLocalVariables, SignatureMethod, SignatureMethodSpec, TypeSignature,
            CALLING_CONVENTION, ELEMENT_TYPE,
        },
        tables::TableId,
        token::Token,
    },
    Result,
};

/// Append a `TypeDefOrRef` token in its compressed signature form.
///
/// # Errors
/// Returns an error if the token does not point into `TypeDef`, `TypeRef` or `TypeSpec`.
pub fn encode_compressed_token(buffer: &mut Vec<u8>, token: Token) -> Result<()> {
    let tag = match TableId::from_u8(token.table()) {
        Some(TableId::TypeDef) => 0,
        Some(TableId::TypeRef) => 1,
        Some(TableId::TypeSpec) => 2,
        _ => {
            return Err(malformed_error!(
                "Token {} can not be used as a TypeDefOrRef",
                token
            ))
        }
    };

    write_compressed_uint(buffer, (token.row() << 2) | tag)
}

/// Append a single type.
///
/// # Errors
/// Returns an error for tokens that can not be encoded or values out of the compressed range.
pub fn encode_type(buffer: &mut Vec<u8>, sig: &TypeSignature) -> Result<()> {
    match sig {
        TypeSignature::Void => buffer.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => buffer.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => buffer.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => buffer.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => buffer.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => buffer.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => buffer.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => buffer.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => buffer.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => buffer.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => buffer.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => buffer.push(ELEMENT_TYPE::R8),
        TypeSignature::String => buffer.push(ELEMENT_TYPE::STRING),
        TypeSignature::I => buffer.push(ELEMENT_TYPE::I),
        TypeSignature::U => buffer.push(ELEMENT_TYPE::U),
        TypeSignature::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::TypedByRef => buffer.push(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::Ptr(inner) => {
            buffer.push(ELEMENT_TYPE::PTR);
            encode_type(buffer, inner)?;
        }
        TypeSignature::ByRef(inner) => {
            buffer.push(ELEMENT_TYPE::BYREF);
            encode_type(buffer, inner)?;
        }
        TypeSignature::Pinned(inner) => {
            buffer.push(ELEMENT_TYPE::PINNED);
            encode_type(buffer, inner)?;
        }
        TypeSignature::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            encode_compressed_token(buffer, *token)?;
        }
        TypeSignature::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            encode_compressed_token(buffer, *token)?;
        }
        TypeSignature::GenericParamType(index) => {
            buffer.push(ELEMENT_TYPE::VAR);
            write_compressed_uint(buffer, *index)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            buffer.push(ELEMENT_TYPE::MVAR);
            write_compressed_uint(buffer, *index)?;
        }
        TypeSignature::Array(array) => {
            buffer.push(ELEMENT_TYPE::ARRAY);
            encode_type(buffer, &array.base)?;
            write_compressed_uint(buffer, array.rank)?;
            write_count(buffer, array.sizes.len())?;
            for size in &array.sizes {
                write_compressed_uint(buffer, *size)?;
            }
            write_count(buffer, array.lower_bounds.len())?;
            for bound in &array.lower_bounds {
                write_compressed_int(buffer, *bound)?;
            }
        }
        TypeSignature::SzArray(inner) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_type(buffer, inner)?;
        }
        TypeSignature::GenericInst(base, args) => {
            buffer.push(ELEMENT_TYPE::GENERICINST);
            encode_type(buffer, base)?;
            write_count(buffer, args.len())?;
            for arg in args {
                encode_type(buffer, arg)?;
            }
        }
        TypeSignature::FnPtr(method) => {
            buffer.push(ELEMENT_TYPE::FNPTR);
            encode_method_into(buffer, method)?;
        }
        TypeSignature::Modified {
            required,
            modifier,
            base,
        } => {
            buffer.push(if *required {
                ELEMENT_TYPE::CMOD_REQD
            } else {
                ELEMENT_TYPE::CMOD_OPT
            });
            encode_compressed_token(buffer, *modifier)?;
            encode_type(buffer, base)?;
        }
    }

    Ok(())
}

fn write_count(buffer: &mut Vec<u8>, count: usize) -> Result<()> {
    let Ok(count) = u32::try_from(count) else {
        return Err(malformed_error!("Count {} is out of range", count));
    };
    write_compressed_uint(buffer, count)
}

fn encode_method_into(buffer: &mut Vec<u8>, sig: &SignatureMethod) -> Result<()> {
    let mut convention = sig.calling_convention & CALLING_CONVENTION::KIND_MASK;
    if sig.has_this {
        convention |= CALLING_CONVENTION::HASTHIS;
    }
    if sig.explicit_this {
        convention |= CALLING_CONVENTION::EXPLICITTHIS;
    }
    if sig.generic_param_count > 0 {
        convention |= CALLING_CONVENTION::GENERIC;
    }
    buffer.push(convention);

    if sig.generic_param_count > 0 {
        write_compressed_uint(buffer, sig.generic_param_count)?;
    }
    write_count(buffer, sig.params.len())?;
    encode_type(buffer, &sig.return_type)?;
    for (index, param) in sig.params.iter().enumerate() {
        if sig.sentinel == Some(index) {
            buffer.push(ELEMENT_TYPE::SENTINEL);
        }
        encode_type(buffer, param)?;
    }

    Ok(())
}

/// Encode a method signature blob.
///
/// # Errors
/// Returns an error if a contained type can not be encoded.
pub fn encode_method_signature(sig: &SignatureMethod) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_method_into(&mut buffer, sig)?;
    Ok(buffer)
}

/// Encode a field signature blob.
///
/// # Errors
/// Returns an error if the type can not be encoded.
pub fn encode_field_signature(base: &TypeSignature) -> Result<Vec<u8>> {
    let mut buffer = vec![CALLING_CONVENTION::FIELD];
    encode_type(&mut buffer, base)?;
    Ok(buffer)
}

/// Encode a local variable signature blob.
///
/// # Errors
/// Returns an error if a slot type can not be encoded.
pub fn encode_local_var_signature(sig: &SignatureLocalVariables) -> Result<Vec<u8>> {
    let mut buffer = vec![CALLING_CONVENTION::LOCAL_SIG];
    write_count(&mut buffer, sig.locals.len())?;
    for local in &sig.locals {
        encode_type(&mut buffer, local)?;
    }
    Ok(buffer)
}

/// Encode a method instantiation blob.
///
/// # Errors
/// Returns an error if a generic argument can not be encoded.
pub fn encode_method_spec_signature(sig: &SignatureMethodSpec) -> Result<Vec<u8>> {
    let mut buffer = vec![CALLING_CONVENTION::GENERICINST];
    write_count(&mut buffer, sig.generic_args.len())?;
    for arg in &sig.generic_args {
        encode_type(&mut buffer, arg)?;
    }
    Ok(buffer)
}

/// Encode a type specification blob.
///
/// # Errors
/// Returns an error if the type can not be encoded.
pub fn encode_type_spec_signature(sig: &TypeSignature) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_type(&mut buffer, sig)?;
    Ok(buffer)
}
