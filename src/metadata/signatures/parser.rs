use crate::{
    file::parser::Parser,
    metadata::signatures::{
        SignatureArray, SignatureField, SignatureLocalVariables, SignatureMethod,
        SignatureMethodSpec, TypeSignature, CALLING_CONVENTION, ELEMENT_TYPE,
    },
    Error::RecursionLimit,
    Result,
};

/// Maximum nesting depth of a single signature
const MAX_RECURSION_DEPTH: usize = 50;

/// Decoder for the signature blobs of ECMA-335 II.23.2
///
/// # Example
///
/// ```rust
/// use cilpatch::metadata::signatures::{SignatureParser, TypeSignature};
/// let data = &[0x00, 0x01, 0x01, 0x0E];
/// let mut parser = SignatureParser::new(data);
/// let sig = parser.parse_method_signature()?;
/// assert_eq!(sig.params, vec![TypeSignature::String]);
/// # Ok::<(), cilpatch::Error>(())
/// ```
///
/// A parser instance is meant for exactly one blob.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a new `SignatureParser` over a blob without its length prefix
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_type_inner(&mut self) -> Result<TypeSignature> {
        let current_byte = self.parser.read_le::<u8>()?;
        match current_byte {
            ELEMENT_TYPE::VOID => Ok(TypeSignature::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(TypeSignature::Boolean),
            ELEMENT_TYPE::CHAR => Ok(TypeSignature::Char),
            ELEMENT_TYPE::I1 => Ok(TypeSignature::I1),
            ELEMENT_TYPE::U1 => Ok(TypeSignature::U1),
            ELEMENT_TYPE::I2 => Ok(TypeSignature::I2),
            ELEMENT_TYPE::U2 => Ok(TypeSignature::U2),
            ELEMENT_TYPE::I4 => Ok(TypeSignature::I4),
            ELEMENT_TYPE::U4 => Ok(TypeSignature::U4),
            ELEMENT_TYPE::I8 => Ok(TypeSignature::I8),
            ELEMENT_TYPE::U8 => Ok(TypeSignature::U8),
            ELEMENT_TYPE::R4 => Ok(TypeSignature::R4),
            ELEMENT_TYPE::R8 => Ok(TypeSignature::R8),
            ELEMENT_TYPE::STRING => Ok(TypeSignature::String),
            ELEMENT_TYPE::PTR => Ok(TypeSignature::Ptr(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::BYREF => Ok(TypeSignature::ByRef(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::PINNED => Ok(TypeSignature::Pinned(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::VALUETYPE => Ok(TypeSignature::ValueType(
                self.parser.read_compressed_token()?,
            )),
            ELEMENT_TYPE::CLASS => Ok(TypeSignature::Class(self.parser.read_compressed_token()?)),
            ELEMENT_TYPE::VAR => Ok(TypeSignature::GenericParamType(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::MVAR => Ok(TypeSignature::GenericParamMethod(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::ARRAY => {
                let base = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                let mut sizes = Vec::with_capacity(num_sizes.min(rank) as usize);
                for _ in 0..num_sizes {
                    sizes.push(self.parser.read_compressed_uint()?);
                }

                let num_lo_bounds = self.parser.read_compressed_uint()?;
                let mut lower_bounds = Vec::with_capacity(num_lo_bounds.min(rank) as usize);
                for _ in 0..num_lo_bounds {
                    lower_bounds.push(self.parser.read_compressed_int()?);
                }

                Ok(TypeSignature::Array(SignatureArray {
                    base: Box::new(base),
                    rank,
                    sizes,
                    lower_bounds,
                }))
            }
            ELEMENT_TYPE::SZARRAY => Ok(TypeSignature::SzArray(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                let base_type = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;

                let mut type_args = Vec::with_capacity(arg_count.min(64) as usize);
                for _ in 0..arg_count {
                    type_args.push(self.parse_type()?);
                }

                Ok(TypeSignature::GenericInst(Box::new(base_type), type_args))
            }
            ELEMENT_TYPE::TYPEDBYREF => Ok(TypeSignature::TypedByRef),
            ELEMENT_TYPE::I => Ok(TypeSignature::I),
            ELEMENT_TYPE::U => Ok(TypeSignature::U),
            ELEMENT_TYPE::OBJECT => Ok(TypeSignature::Object),
            ELEMENT_TYPE::FNPTR => Ok(TypeSignature::FnPtr(Box::new(
                self.parse_method_signature()?,
            ))),
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                let modifier = self.parser.read_compressed_token()?;
                Ok(TypeSignature::Modified {
                    required: current_byte == ELEMENT_TYPE::CMOD_REQD,
                    modifier,
                    base: Box::new(self.parse_type()?),
                })
            }
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {}",
                current_byte
            )),
        }
    }

    /// Parse a method signature - `MethodDefSig`, `MethodRefSig` or `StandAloneMethodSig`
    ///
    /// # Errors
    /// Returns an error if the blob is truncated or holds an unknown element type
    pub fn parse_method_signature(&mut self) -> Result<SignatureMethod> {
        let convention_byte = self.parser.read_le::<u8>()?;
        let kind = convention_byte & CALLING_CONVENTION::KIND_MASK;
        if kind > CALLING_CONVENTION::VARARG {
            return Err(malformed_error!(
                "SignatureMethod - invalid calling convention - {}",
                convention_byte
            ));
        }

        let generic_param_count = if convention_byte & CALLING_CONVENTION::GENERIC != 0 {
            self.parser.read_compressed_uint()?
        } else {
            0
        };
        let param_count = self.parser.read_compressed_uint()?;
        let return_type = self.parse_type()?;

        let mut params = Vec::with_capacity(param_count.min(64) as usize);
        let mut sentinel = None;
        while params.len() < param_count as usize {
            if self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                if sentinel.is_some() {
                    return Err(malformed_error!("SignatureMethod - duplicate sentinel"));
                }
                self.parser.read_le::<u8>()?;
                sentinel = Some(params.len());
                continue;
            }

            params.push(self.parse_type()?);
        }

        Ok(SignatureMethod {
            has_this: convention_byte & CALLING_CONVENTION::HASTHIS != 0,
            explicit_this: convention_byte & CALLING_CONVENTION::EXPLICITTHIS != 0,
            calling_convention: kind,
            generic_param_count,
            return_type,
            params,
            sentinel,
        })
    }

    /// Parse a `FieldSig`
    ///
    /// # Errors
    /// Returns an error if the blob does not start with `FIELD` or is otherwise malformed
    pub fn parse_field_signature(&mut self) -> Result<SignatureField> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != CALLING_CONVENTION::FIELD {
            return Err(malformed_error!(
                "SignatureField - invalid start - {}",
                head_byte
            ));
        }

        Ok(SignatureField {
            base: self.parse_type()?,
        })
    }

    /// Parse a `LocalVarSig`
    ///
    /// # Errors
    /// Returns an error if the blob does not start with `LOCAL_SIG` or is otherwise malformed
    pub fn parse_local_var_signature(&mut self) -> Result<SignatureLocalVariables> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != CALLING_CONVENTION::LOCAL_SIG {
            return Err(malformed_error!(
                "SignatureLocalVar - invalid start - {}",
                head_byte
            ));
        }

        let count = self.parser.read_compressed_uint()?;
        if count > 0xFFFE {
            return Err(malformed_error!("SignatureLocalVar - too many locals - {}", count));
        }

        let mut locals = Vec::with_capacity(count as usize);
        for _ in 0..count {
            locals.push(self.parse_type()?);
        }

        Ok(SignatureLocalVariables { locals })
    }

    /// Parse a `MethodSpec` instantiation blob
    ///
    /// # Errors
    /// Returns an error if the blob does not start with `GENERICINST` or is otherwise malformed
    pub fn parse_method_spec_signature(&mut self) -> Result<SignatureMethodSpec> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != CALLING_CONVENTION::GENERICINST {
            return Err(malformed_error!(
                "SignatureMethodSpec - invalid start - {}",
                head_byte
            ));
        }

        let arg_count = self.parser.read_compressed_uint()?;
        let mut generic_args = Vec::with_capacity(arg_count.min(64) as usize);
        for _ in 0..arg_count {
            generic_args.push(self.parse_type()?);
        }

        Ok(SignatureMethodSpec { generic_args })
    }

    /// Parse a `TypeSpec` blob, which is a single type
    ///
    /// # Errors
    /// Returns an error if the blob is malformed
    pub fn parse_type_spec_signature(&mut self) -> Result<TypeSignature> {
        self.parse_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    #[test]
    fn test_parse_primitive_types() {
        let test_cases = [
            (vec![0x01], TypeSignature::Void),
            (vec![0x02], TypeSignature::Boolean),
            (vec![0x03], TypeSignature::Char),
            (vec![0x08], TypeSignature::I4),
            (vec![0x0B], TypeSignature::U8),
            (vec![0x0D], TypeSignature::R8),
            (vec![0x0E], TypeSignature::String),
            (vec![0x1C], TypeSignature::Object),
            (vec![0x18], TypeSignature::I),
            (vec![0x16], TypeSignature::TypedByRef),
        ];

        for (bytes, expected_type) in test_cases {
            let mut parser = SignatureParser::new(&bytes);
            assert_eq!(parser.parse_type().unwrap(), expected_type);
        }
    }

    #[test]
    fn test_parse_class_and_valuetype() {
        let mut parser = SignatureParser::new(&[0x12, 0x42]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::Class(Token::new(0x1B00_0010))
        );

        let mut parser = SignatureParser::new(&[0x11, 0x35]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::ValueType(Token::new(0x0100_000D))
        );
    }

    #[test]
    fn test_parse_arrays() {
        let mut parser = SignatureParser::new(&[0x1D, 0x0E]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::SzArray(Box::new(TypeSignature::String))
        );

        // int32[0...2, -1...] as rank 2, one size, two lower bounds
        let mut parser = SignatureParser::new(&[0x14, 0x08, 0x02, 0x01, 0x03, 0x02, 0x00, 0x7F]);
        let TypeSignature::Array(array) = parser.parse_type().unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(*array.base, TypeSignature::I4);
        assert_eq!(array.rank, 2);
        assert_eq!(array.sizes, vec![3]);
        assert_eq!(array.lower_bounds, vec![0, -1]);
    }

    #[test]
    fn test_parse_modifiers_and_pinned() {
        let mut parser = SignatureParser::new(&[0x1F, 0x05, 0x45, 0x10, 0x08]);
        let sig = parser.parse_type().unwrap();
        assert_eq!(
            sig,
            TypeSignature::Modified {
                required: true,
                modifier: Token::new(0x0100_0001),
                base: Box::new(TypeSignature::Pinned(Box::new(TypeSignature::ByRef(
                    Box::new(TypeSignature::I4)
                )))),
            }
        );
    }

    #[test]
    fn test_generic_inst_requires_class() {
        let mut parser = SignatureParser::new(&[0x15, 0x08, 0x01, 0x08]);
        assert!(parser.parse_type().is_err());

        let mut parser = SignatureParser::new(&[0x15, 0x12, 0x49, 0x01, 0x08]);
        let TypeSignature::GenericInst(base, args) = parser.parse_type().unwrap() else {
            panic!("expected a generic instance");
        };
        assert!(matches!(*base, TypeSignature::Class(_)));
        assert_eq!(args, vec![TypeSignature::I4]);
    }

    #[test]
    fn test_method_signatures() {
        // instance void (string, int32)
        let mut parser = SignatureParser::new(&[0x20, 0x02, 0x01, 0x0E, 0x08]);
        let sig = parser.parse_method_signature().unwrap();
        assert!(sig.has_this);
        assert!(sig.return_type.is_void());
        assert_eq!(sig.params, vec![TypeSignature::String, TypeSignature::I4]);

        // generic <1> !!0 (!!0)
        let mut parser = SignatureParser::new(&[0x10, 0x01, 0x01, 0x1E, 0x00, 0x1E, 0x00]);
        let sig = parser.parse_method_signature().unwrap();
        assert_eq!(sig.generic_param_count, 1);
        assert_eq!(sig.return_type, TypeSignature::GenericParamMethod(0));

        // vararg void (int32, ..., string)
        let mut parser = SignatureParser::new(&[0x05, 0x02, 0x01, 0x08, 0x41, 0x0E]);
        let sig = parser.parse_method_signature().unwrap();
        assert_eq!(sig.calling_convention, CALLING_CONVENTION::VARARG);
        assert_eq!(sig.sentinel, Some(1));
        assert_eq!(sig.params.len(), 2);
    }

    #[test]
    fn test_field_and_locals() {
        let mut parser = SignatureParser::new(&[0x06, 0x0E]);
        assert_eq!(
            parser.parse_field_signature().unwrap().base,
            TypeSignature::String
        );

        let mut parser = SignatureParser::new(&[0x07, 0x02, 0x1D, 0x0E, 0x08]);
        let locals = parser.parse_local_var_signature().unwrap();
        assert_eq!(
            locals.locals,
            vec![
                TypeSignature::SzArray(Box::new(TypeSignature::String)),
                TypeSignature::I4
            ]
        );

        let mut parser = SignatureParser::new(&[0x06, 0x02]);
        assert!(parser.parse_local_var_signature().is_err());
    }

    #[test]
    fn test_method_spec() {
        let mut parser = SignatureParser::new(&[0x0A, 0x02, 0x08, 0x0E]);
        let spec = parser.parse_method_spec_signature().unwrap();
        assert_eq!(
            spec.generic_args,
            vec![TypeSignature::I4, TypeSignature::String]
        );
    }

    #[test]
    fn test_recursion_limit() {
        let mut data = vec![0x0F; 100];
        data.push(0x08);
        let mut parser = SignatureParser::new(&data);
        assert!(matches!(parser.parse_type(), Err(RecursionLimit(_))));
    }

    #[test]
    fn test_truncated() {
        let mut parser = SignatureParser::new(&[0x20, 0x02, 0x01, 0x0E]);
        assert!(parser.parse_method_signature().is_err());
    }
}
