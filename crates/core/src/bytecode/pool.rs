//! Constant pool model.
//!
//! Entries keep their raw encoding so that an unmodified pool serializes back to the exact
//! input bytes. Mutation is append-only: existing entries are never reordered, so indices
//! held by instructions and attributes stay valid.

use crate::bytecode::mutf8;
use crate::bytecode::reader::ByteReader;
use crate::error::ParseError;

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

/// Highest index a constant pool can address.
const MAX_POOL_INDEX: usize = u16::MAX as usize - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Field,
    Method,
    InterfaceMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Slot 0 and the second slot of a Long/Double.
    Unusable,
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class { name: u16 },
    String { value: u16 },
    MemberRef { kind: RefKind, class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { descriptor: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module { name: u16 },
    Package { name: u16 },
}

/// A resolved `Fieldref`/`Methodref`/`InterfaceMethodref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub kind: RefKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// An empty pool (only the unusable slot 0).
    pub fn new() -> Self {
        Self { entries: vec![Constant::Unusable] }
    }

    pub(crate) fn parse(reader: &mut ByteReader<'_>) -> Result<Self, ParseError> {
        let count = reader.u16()? as usize;
        if count == 0 {
            return Err(ParseError::BadIndex { index: 0, reason: "constant pool count is zero" });
        }
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);
        while entries.len() < count {
            let index = entries.len() as u16;
            let tag = reader.u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = reader.u16()? as usize;
                    Constant::Utf8(reader.bytes(len)?.to_vec())
                }
                TAG_INTEGER => Constant::Integer(reader.u32()? as i32),
                TAG_FLOAT => Constant::Float(reader.u32()?),
                TAG_LONG => Constant::Long(reader.u64()?),
                TAG_DOUBLE => Constant::Double(reader.u64()?),
                TAG_CLASS => Constant::Class { name: reader.u16()? },
                TAG_STRING => Constant::String { value: reader.u16()? },
                TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF => {
                    let kind = match tag {
                        TAG_FIELDREF => RefKind::Field,
                        TAG_METHODREF => RefKind::Method,
                        _ => RefKind::InterfaceMethod,
                    };
                    Constant::MemberRef { kind, class: reader.u16()?, name_and_type: reader.u16()? }
                }
                TAG_NAME_AND_TYPE => {
                    Constant::NameAndType { name: reader.u16()?, descriptor: reader.u16()? }
                }
                TAG_METHOD_HANDLE => {
                    Constant::MethodHandle { kind: reader.u8()?, reference: reader.u16()? }
                }
                TAG_METHOD_TYPE => Constant::MethodType { descriptor: reader.u16()? },
                TAG_DYNAMIC => {
                    Constant::Dynamic { bootstrap: reader.u16()?, name_and_type: reader.u16()? }
                }
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                TAG_MODULE => Constant::Module { name: reader.u16()? },
                TAG_PACKAGE => Constant::Package { name: reader.u16()? },
                other => return Err(ParseError::UnknownConstantTag { tag: other, index }),
            };
            let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
            entries.push(constant);
            if wide {
                if entries.len() >= count {
                    return Err(ParseError::BadIndex {
                        index,
                        reason: "8-byte constant occupies the last pool slot",
                    });
                }
                entries.push(Constant::Unusable);
            }
        }
        let pool = Self { entries };
        pool.validate()?;
        Ok(pool)
    }

    /// Check that every cross-reference inside the pool points at an entry of the right kind.
    fn validate(&self) -> Result<(), ParseError> {
        for constant in &self.entries {
            match *constant {
                Constant::Class { name }
                | Constant::Module { name }
                | Constant::Package { name } => self.expect_utf8(name)?,
                Constant::String { value } => self.expect_utf8(value)?,
                Constant::MethodType { descriptor } => self.expect_utf8(descriptor)?,
                Constant::NameAndType { name, descriptor } => {
                    self.expect_utf8(name)?;
                    self.expect_utf8(descriptor)?;
                }
                Constant::MemberRef { class, name_and_type, .. } => {
                    self.expect_class(class)?;
                    self.expect_name_and_type(name_and_type)?;
                }
                Constant::Dynamic { name_and_type, .. }
                | Constant::InvokeDynamic { name_and_type, .. } => {
                    self.expect_name_and_type(name_and_type)?;
                }
                Constant::MethodHandle { kind, reference } => {
                    if !(1..=9).contains(&kind) {
                        return Err(ParseError::BadIndex {
                            index: reference,
                            reason: "method handle kind out of range",
                        });
                    }
                    match self.get(reference)? {
                        Constant::MemberRef { .. } => {}
                        _ => {
                            return Err(ParseError::BadIndex {
                                index: reference,
                                reason: "method handle must reference a member",
                            })
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(bytes) => {
                    out.push(TAG_UTF8);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(bytes);
                }
                Constant::Integer(v) => {
                    out.push(TAG_INTEGER);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                Constant::Float(bits) => {
                    out.push(TAG_FLOAT);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Long(bits) => {
                    out.push(TAG_LONG);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Double(bits) => {
                    out.push(TAG_DOUBLE);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Class { name } => push_u16_entry(out, TAG_CLASS, &[*name]),
                Constant::String { value } => push_u16_entry(out, TAG_STRING, &[*value]),
                Constant::MemberRef { kind, class, name_and_type } => {
                    let tag = match kind {
                        RefKind::Field => TAG_FIELDREF,
                        RefKind::Method => TAG_METHODREF,
                        RefKind::InterfaceMethod => TAG_INTERFACE_METHODREF,
                    };
                    push_u16_entry(out, tag, &[*class, *name_and_type]);
                }
                Constant::NameAndType { name, descriptor } => {
                    push_u16_entry(out, TAG_NAME_AND_TYPE, &[*name, *descriptor])
                }
                Constant::MethodHandle { kind, reference } => {
                    out.push(TAG_METHOD_HANDLE);
                    out.push(*kind);
                    out.extend_from_slice(&reference.to_be_bytes());
                }
                Constant::MethodType { descriptor } => {
                    push_u16_entry(out, TAG_METHOD_TYPE, &[*descriptor])
                }
                Constant::Dynamic { bootstrap, name_and_type } => {
                    push_u16_entry(out, TAG_DYNAMIC, &[*bootstrap, *name_and_type])
                }
                Constant::InvokeDynamic { bootstrap, name_and_type } => {
                    push_u16_entry(out, TAG_INVOKE_DYNAMIC, &[*bootstrap, *name_and_type])
                }
                Constant::Module { name } => push_u16_entry(out, TAG_MODULE, &[*name]),
                Constant::Package { name } => push_u16_entry(out, TAG_PACKAGE, &[*name]),
            }
        }
    }

    /// Number of slots, including the unusable slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn entries(&self) -> &[Constant] {
        &self.entries
    }

    pub fn get(&self, index: u16) -> Result<&Constant, ParseError> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => {
                Err(ParseError::BadIndex { index, reason: "no usable constant at this index" })
            }
            Some(c) => Ok(c),
        }
    }

    pub(crate) fn get_mut(&mut self, index: u16) -> Option<&mut Constant> {
        self.entries.get_mut(index as usize)
    }

    /// How many more single-slot entries can be appended.
    pub fn free_slots(&self) -> usize {
        (MAX_POOL_INDEX + 1).saturating_sub(self.entries.len())
    }

    /// Append a constant, returning its index, or `None` when the pool is full.
    pub fn push(&mut self, constant: Constant) -> Option<u16> {
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        let needed = if wide { 2 } else { 1 };
        if self.free_slots() < needed {
            return None;
        }
        let index = self.entries.len() as u16;
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Some(index)
    }

    /// Find an existing entry equal to `constant` or append it.
    pub fn intern(&mut self, constant: Constant) -> Option<u16> {
        if let Some(pos) = self.entries.iter().position(|c| *c == constant) {
            if pos != 0 {
                return Some(pos as u16);
            }
        }
        self.push(constant)
    }

    pub fn intern_utf8(&mut self, value: &str) -> Option<u16> {
        self.intern(Constant::Utf8(mutf8::encode(value)))
    }

    pub fn utf8(&self, index: u16) -> Option<String> {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(bytes)) => Some(mutf8::decode(bytes)),
            _ => None,
        }
    }

    pub fn class_name(&self, index: u16) -> Option<String> {
        match self.entries.get(index as usize) {
            Some(Constant::Class { name }) => self.utf8(*name),
            _ => None,
        }
    }

    /// Text of a `CONSTANT_String`.
    pub fn string(&self, index: u16) -> Option<String> {
        match self.entries.get(index as usize) {
            Some(Constant::String { value }) => self.utf8(*value),
            _ => None,
        }
    }

    pub fn name_and_type(&self, index: u16) -> Option<(String, String)> {
        match self.entries.get(index as usize) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Some((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => None,
        }
    }

    pub fn member_ref(&self, index: u16) -> Option<MemberRef> {
        match self.entries.get(index as usize) {
            Some(Constant::MemberRef { kind, class, name_and_type }) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Some(MemberRef { kind: *kind, owner: self.class_name(*class)?, name, descriptor })
            }
            _ => None,
        }
    }

    pub fn integer(&self, index: u16) -> Option<i32> {
        match self.entries.get(index as usize) {
            Some(Constant::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub(crate) fn expect_utf8(&self, index: u16) -> Result<(), ParseError> {
        match self.get(index)? {
            Constant::Utf8(_) => Ok(()),
            _ => Err(ParseError::BadIndex { index, reason: "expected a Utf8 constant" }),
        }
    }

    pub(crate) fn expect_class(&self, index: u16) -> Result<(), ParseError> {
        match self.get(index)? {
            Constant::Class { .. } => Ok(()),
            _ => Err(ParseError::BadIndex { index, reason: "expected a Class constant" }),
        }
    }

    fn expect_name_and_type(&self, index: u16) -> Result<(), ParseError> {
        match self.get(index)? {
            Constant::NameAndType { .. } => Ok(()),
            _ => Err(ParseError::BadIndex { index, reason: "expected a NameAndType constant" }),
        }
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

fn push_u16_entry(out: &mut Vec<u8>, tag: u8, values: &[u16]) {
    out.push(tag);
    for v in values {
        out.extend_from_slice(&v.to_be_bytes());
    }
}
