use strum::{Display, EnumCount, EnumIter};

use crate::metadata::token::Token;

/// Metadata tables a compressed `#~` stream can carry, numbered as in ECMA-335 II.22.
///
/// The `*Ptr` indirection tables and the edit-and-continue log only appear in uncompressed
/// `#-` streams and are not listed.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy, EnumIter, EnumCount, Display)]
#[repr(u8)]
pub enum TableId {
    /// `Module` (0x00)
    Module = 0x00,
    /// `TypeRef` (0x01)
    TypeRef = 0x01,
    /// `TypeDef` (0x02)
    TypeDef = 0x02,
    /// `Field` (0x04)
    Field = 0x04,
    /// `MethodDef` (0x06)
    MethodDef = 0x06,
    /// `Param` (0x08)
    Param = 0x08,
    /// `InterfaceImpl` (0x09)
    InterfaceImpl = 0x09,
    /// `MemberRef` (0x0A)
    MemberRef = 0x0A,
    /// `Constant` (0x0B)
    Constant = 0x0B,
    /// `CustomAttribute` (0x0C)
    CustomAttribute = 0x0C,
    /// `FieldMarshal` (0x0D)
    FieldMarshal = 0x0D,
    /// `DeclSecurity` (0x0E)
    DeclSecurity = 0x0E,
    /// `ClassLayout` (0x0F)
    ClassLayout = 0x0F,
    /// `FieldLayout` (0x10)
    FieldLayout = 0x10,
    /// `StandAloneSig` (0x11)
    StandAloneSig = 0x11,
    /// `EventMap` (0x12)
    EventMap = 0x12,
    /// `Event` (0x14)
    Event = 0x14,
    /// `PropertyMap` (0x15)
    PropertyMap = 0x15,
    /// `Property` (0x17)
    Property = 0x17,
    /// `MethodSemantics` (0x18)
    MethodSemantics = 0x18,
    /// `MethodImpl` (0x19)
    MethodImpl = 0x19,
    /// `ModuleRef` (0x1A)
    ModuleRef = 0x1A,
    /// `TypeSpec` (0x1B)
    TypeSpec = 0x1B,
    /// `ImplMap` (0x1C)
    ImplMap = 0x1C,
    /// `FieldRVA` (0x1D)
    FieldRVA = 0x1D,
    /// `Assembly` (0x20)
    Assembly = 0x20,
    /// `AssemblyProcessor` (0x21)
    AssemblyProcessor = 0x21,
    /// `AssemblyOS` (0x22)
    AssemblyOS = 0x22,
    /// `AssemblyRef` (0x23)
    AssemblyRef = 0x23,
    /// `AssemblyRefProcessor` (0x24)
    AssemblyRefProcessor = 0x24,
    /// `AssemblyRefOS` (0x25)
    AssemblyRefOS = 0x25,
    /// `File` (0x26)
    File = 0x26,
    /// `ExportedType` (0x27)
    ExportedType = 0x27,
    /// `ManifestResource` (0x28)
    ManifestResource = 0x28,
    /// `NestedClass` (0x29)
    NestedClass = 0x29,
    /// `GenericParam` (0x2A)
    GenericParam = 0x2A,
    /// `MethodSpec` (0x2B)
    MethodSpec = 0x2B,
    /// `GenericParamConstraint` (0x2C)
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Map a table number to a supported table
    #[must_use]
    pub fn from_u8(value: u8) -> Option<TableId> {
        use strum::IntoEnumIterator;
        TableId::iter().find(|id| *id as u8 == value)
    }

    /// Token for `row` of this table
    #[must_use]
    pub fn token(self, row: u32) -> Token {
        Token::new((u32::from(self as u8) << 24) | row)
    }

    /// True for the tables the module model decodes into owned rows.
    ///
    /// All other tables are retained row by row, see [`crate::metadata::tables::Column`].
    #[must_use]
    pub fn is_modeled(self) -> bool {
        matches!(
            self,
            TableId::Module
                | TableId::TypeRef
                | TableId::TypeDef
                | TableId::Field
                | TableId::MethodDef
                | TableId::Param
                | TableId::MemberRef
                | TableId::StandAloneSig
                | TableId::ModuleRef
                | TableId::TypeSpec
                | TableId::Assembly
                | TableId::AssemblyRef
                | TableId::MethodSpec
        )
    }
}

/// Kinds of coded index (ECMA-335 II.24.2.6).
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
pub enum CodedIndexType {
    /// `TypeDef`, `TypeRef`, `TypeSpec`
    TypeDefOrRef,
    /// `Field`, `Param`, `Property`
    HasConstant,
    /// Any row a custom attribute can be attached to
    HasCustomAttribute,
    /// `Field`, `Param`
    HasFieldMarshal,
    /// `TypeDef`, `MethodDef`, `Assembly`
    HasDeclSecurity,
    /// `TypeDef`, `TypeRef`, `ModuleRef`, `MethodDef`, `TypeSpec`
    MemberRefParent,
    /// `Event`, `Property`
    HasSemantics,
    /// `MethodDef`, `MemberRef`
    MethodDefOrRef,
    /// `Field`, `MethodDef`
    MemberForwarded,
    /// `File`, `AssemblyRef`, `ExportedType`
    Implementation,
    /// `MethodDef` (tag 2), `MemberRef` (tag 3)
    CustomAttributeType,
    /// `Module`, `ModuleRef`, `AssemblyRef`, `TypeRef`
    ResolutionScope,
    /// `TypeDef`, `MethodDef`
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// Tables addressable by this coded index.
    ///
    /// The position of a table is its tag, except for [`CodedIndexType::CustomAttributeType`]
    /// whose tags 0, 1 and 4 are unused; see [`CodedIndexType::tag_of`].
    #[must_use]
    pub fn tables(&self) -> &'static [TableId] {
        match self {
            CodedIndexType::TypeDefOrRef => {
                &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec]
            }
            CodedIndexType::HasConstant => &[TableId::Field, TableId::Param, TableId::Property],
            CodedIndexType::HasCustomAttribute => &[
                TableId::MethodDef,
                TableId::Field,
                TableId::TypeRef,
                TableId::TypeDef,
                TableId::Param,
                TableId::InterfaceImpl,
                TableId::MemberRef,
                TableId::Module,
                TableId::DeclSecurity,
                TableId::Property,
                TableId::Event,
                TableId::StandAloneSig,
                TableId::ModuleRef,
                TableId::TypeSpec,
                TableId::Assembly,
                TableId::AssemblyRef,
                TableId::File,
                TableId::ExportedType,
                TableId::ManifestResource,
                TableId::GenericParam,
                TableId::GenericParamConstraint,
                TableId::MethodSpec,
            ],
            CodedIndexType::HasFieldMarshal => &[TableId::Field, TableId::Param],
            CodedIndexType::HasDeclSecurity => {
                &[TableId::TypeDef, TableId::MethodDef, TableId::Assembly]
            }
            CodedIndexType::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedIndexType::HasSemantics => &[TableId::Event, TableId::Property],
            CodedIndexType::MethodDefOrRef => &[TableId::MethodDef, TableId::MemberRef],
            CodedIndexType::MemberForwarded => &[TableId::Field, TableId::MethodDef],
            CodedIndexType::Implementation => {
                &[TableId::File, TableId::AssemblyRef, TableId::ExportedType]
            }
            CodedIndexType::CustomAttributeType => &[TableId::MethodDef, TableId::MemberRef],
            CodedIndexType::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
            CodedIndexType::TypeOrMethodDef => &[TableId::TypeDef, TableId::MethodDef],
        }
    }

    /// Tag that selects `table`, `None` if the table is not addressable
    #[must_use]
    pub fn tag_of(&self, table: TableId) -> Option<u32> {
        let position = self.tables().iter().position(|t| *t == table)?;
        #[allow(clippy::cast_possible_truncation)]
        let position = position as u32;
        match self {
            CodedIndexType::CustomAttributeType => Some(position + 2),
            _ => Some(position),
        }
    }

    /// Table selected by `tag`, `None` for an unused tag
    #[must_use]
    pub fn table_of(&self, tag: u32) -> Option<TableId> {
        let position = match self {
            CodedIndexType::CustomAttributeType => tag.checked_sub(2)?,
            _ => tag,
        };
        self.tables().get(position as usize).copied()
    }

    /// Number of low bits holding the table tag
    #[must_use]
    pub fn tag_bits(&self) -> u32 {
        match self {
            CodedIndexType::HasFieldMarshal
            | CodedIndexType::HasSemantics
            | CodedIndexType::MethodDefOrRef
            | CodedIndexType::MemberForwarded
            | CodedIndexType::TypeOrMethodDef => 1,
            CodedIndexType::TypeDefOrRef
            | CodedIndexType::HasConstant
            | CodedIndexType::HasDeclSecurity
            | CodedIndexType::Implementation
            | CodedIndexType::ResolutionScope => 2,
            CodedIndexType::MemberRefParent | CodedIndexType::CustomAttributeType => 3,
            CodedIndexType::HasCustomAttribute => 5,
        }
    }
}

/// A decoded coded index: target table and 1-based row (0 means null).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CodedIndex {
    /// Target table
    pub tag: TableId,
    /// Row in the target table, 0 for a null reference
    pub row: u32,
}

impl CodedIndex {
    /// Create a coded index
    #[must_use]
    pub fn new(tag: TableId, row: u32) -> CodedIndex {
        CodedIndex { tag, row }
    }

    /// A null reference into the first table of `ci_type`
    #[must_use]
    pub fn null(ci_type: CodedIndexType) -> CodedIndex {
        CodedIndex {
            tag: ci_type.tables()[0],
            row: 0,
        }
    }

    /// True for a null reference
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row == 0
    }

    /// The metadata token this index refers to
    #[must_use]
    pub fn token(&self) -> Token {
        self.tag.token(self.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ids() {
        assert_eq!(TableId::from_u8(0x06), Some(TableId::MethodDef));
        assert_eq!(TableId::from_u8(0x03), None);
        assert_eq!(TableId::from_u8(0x0C), Some(TableId::CustomAttribute));
        assert!(TableId::MemberRef.is_modeled());
        assert!(!TableId::CustomAttribute.is_modeled());
        assert_eq!(TableId::MemberRef.token(7), Token::new(0x0A00_0007));
        assert_eq!(TableId::TypeDef.to_string(), "TypeDef");
    }

    #[test]
    fn coded_index_shapes() {
        use strum::IntoEnumIterator;
        for ci in CodedIndexType::iter() {
            for table in ci.tables() {
                let tag = ci.tag_of(*table).unwrap();
                assert!(tag < 1 << ci.tag_bits(), "{ci:?}");
                assert_eq!(ci.table_of(tag), Some(*table));
            }
        }
        let ca = CodedIndexType::CustomAttributeType;
        assert_eq!(ca.tag_of(TableId::MethodDef), Some(2));
        assert_eq!(ca.tag_of(TableId::MemberRef), Some(3));
        assert_eq!(ca.table_of(0), None);
        assert_eq!(ca.table_of(4), None);

        let null = CodedIndex::null(CodedIndexType::TypeDefOrRef);
        assert!(null.is_null());
        assert_eq!(null.tag, TableId::TypeDef);
        assert_eq!(CodedIndex::new(TableId::TypeRef, 2).token(), Token::new(0x0100_0002));
    }
}
