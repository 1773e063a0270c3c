//! Rows of the tables the model does not interpret.
//!
//! Custom attributes, constants, properties, generic parameters and the other tables outside the
//! model are carried as [`RetainedRow`]s: one [`Cell`] per column, with heap indices resolved to
//! their strings and blobs. References to methods, fields and parameters are handles, so the
//! rows follow their targets when the writer renumbers them, and a row dies with its target.
//!
//! References into other retained tables are tokens whose row is the 1-based position in
//! [`super::Module::retained`].

use crate::{
    metadata::{tables::TableId, token::Token},
    module::{FieldId, MethodId},
};

/// One column value of a [`RetainedRow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Constant, flags or sizes
    Value(u32),
    /// `#Strings` entry
    String(String),
    /// `#Blob` entry
    Blob(Vec<u8>),
    /// A single row of another table
    Ref(RowRef),
    /// First row of a run in another retained table, 1-based
    List(u32),
}

/// Target of a [`Cell::Ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowRef {
    /// Row of a table whose numbering the writer keeps; row 0 is a null reference
    Token(Token),
    /// Method definition
    Method(MethodId),
    /// Field definition
    Field(FieldId),
    /// Parameter: owning method and position in its parameter list
    Param(MethodId, usize),
}

impl RowRef {
    /// Build the reference for row `row` of `table`, given the owner of every parameter row.
    pub(crate) fn from_row(table: TableId, row: u32, param_owners: &[(MethodId, usize)]) -> RowRef {
        let index = row.checked_sub(1);
        match (table, index) {
            (TableId::MethodDef, Some(index)) => RowRef::Method(MethodId(index)),
            (TableId::Field, Some(index)) => RowRef::Field(FieldId(index)),
            (TableId::Param, Some(index)) => match param_owners.get(index as usize) {
                Some((owner, position)) => RowRef::Param(*owner, *position),
                None => RowRef::Token(table.token(row)),
            },
            _ => RowRef::Token(table.token(row)),
        }
    }
}

/// A row of a table outside the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedRow(pub Vec<Cell>);

impl RetainedRow {
    /// References held by the row
    pub fn refs(&self) -> impl Iterator<Item = &RowRef> {
        self.0.iter().filter_map(|cell| match cell {
            Cell::Ref(target) => Some(target),
            _ => None,
        })
    }

    /// Tokens held by the row, excluding null references
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.refs().filter_map(|target| match target {
            RowRef::Token(token) if !token.is_null() => Some(*token),
            _ => None,
        })
    }
}
