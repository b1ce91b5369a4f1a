//! Bytecode model: JVM class files parsed into a mutable, losslessly re-serializable form.
//!
//! `serialize(parse(bytes)) == bytes` holds for every class this module accepts. Every
//! structure is kept at its original encoding (Utf8 constants as raw modified UTF-8,
//! non-`Code` attributes as opaque bytes), and mutators only append pool entries, repoint
//! indices, or patch instruction bytes in place without changing instruction lengths.

pub mod builder;
pub mod code;
pub mod descriptor;
pub mod mutf8;
pub mod opcodes;
pub mod pool;
pub mod reader;

use serde::Serialize;

use crate::error::ParseError;

pub use builder::ClassBuilder;
pub use code::{CodeAttribute, ExceptionEntry, Instruction, Operand};
pub use pool::{Constant, ConstantPool, MemberRef, RefKind};
use reader::ByteReader;

pub const MAGIC: u32 = 0xCAFE_BABE;
pub const MIN_MAJOR_VERSION: u16 = 45;
pub const MAX_MAJOR_VERSION: u16 = 69;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;

/// An attribute kept as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl AttributeInfo {
    pub(crate) fn parse_list(r: &mut ByteReader<'_>) -> Result<Vec<Self>, ParseError> {
        let count = r.u16()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name_index = r.u16()?;
            let len = r.u32()? as usize;
            out.push(Self { name_index, info: r.bytes(len)?.to_vec() });
        }
        Ok(out)
    }

    pub(crate) fn write_list(list: &[Self], out: &mut Vec<u8>) {
        out.extend_from_slice(&(list.len() as u16).to_be_bytes());
        for attr in list {
            out.extend_from_slice(&attr.name_index.to_be_bytes());
            out.extend_from_slice(&(attr.info.len() as u32).to_be_bytes());
            out.extend_from_slice(&attr.info);
        }
    }
}

/// A member attribute: either a decoded `Code` body or an opaque attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Code { name_index: u16, body: CodeAttribute },
    Other(AttributeInfo),
}

/// A `field_info` or `method_info` structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    pub fn is_native(&self) -> bool {
        self.access_flags & ACC_NATIVE != 0
    }

    pub fn is_private(&self) -> bool {
        self.access_flags & ACC_PRIVATE != 0
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.access_flags & ACC_SYNTHETIC != 0
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Code { body, .. } => Some(body),
            Attribute::Other(_) => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().find_map(|a| match a {
            Attribute::Code { body, .. } => Some(body),
            Attribute::Other(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Field,
    Method,
}

/// One entry of a unit's symbol table view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: String,
    pub descriptor: String,
}

/// A parsed class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassUnit {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
}

/// Parse a raw class file.
pub fn parse(bytes: &[u8]) -> Result<ClassUnit, ParseError> {
    ClassUnit::parse(bytes)
}

/// Serialize a unit back to class file bytes.
pub fn serialize(unit: &ClassUnit) -> Vec<u8> {
    unit.to_bytes()
}

impl ClassUnit {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut r = ByteReader::new(bytes);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ParseError::BadMagic(magic));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
            return Err(ParseError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }
        let pool = ConstantPool::parse(&mut r)?;
        let access_flags = r.u16()?;
        let this_class = r.u16()?;
        pool.expect_class(this_class)?;
        let super_class = r.u16()?;
        if super_class != 0 {
            pool.expect_class(super_class)?;
        }
        let interface_count = r.u16()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            let idx = r.u16()?;
            pool.expect_class(idx)?;
            interfaces.push(idx);
        }
        let fields = parse_members(&mut r, &pool)?;
        let methods = parse_members(&mut r, &pool)?;
        let attributes = AttributeInfo::parse_list(&mut r)?;
        for attr in &attributes {
            pool.expect_utf8(attr.name_index)?;
        }
        if r.remaining() != 0 {
            return Err(ParseError::TrailingBytes(r.remaining()));
        }
        Ok(Self {
            minor_version,
            major_version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&self.minor_version.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());
        self.pool.write(&mut out);
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for i in &self.interfaces {
            out.extend_from_slice(&i.to_be_bytes());
        }
        write_members(&self.fields, &mut out);
        write_members(&self.methods, &mut out);
        AttributeInfo::write_list(&self.attributes, &mut out);
        out
    }

    /// Internal name of the class, e.g. `com/example/Client`.
    pub fn class_name(&self) -> String {
        self.pool.class_name(self.this_class).unwrap_or_default()
    }

    pub fn member_name(&self, member: &MemberInfo) -> String {
        self.pool.utf8(member.name_index).unwrap_or_default()
    }

    pub fn member_descriptor(&self, member: &MemberInfo) -> String {
        self.pool.utf8(member.descriptor_index).unwrap_or_default()
    }

    /// `Class.name(descriptor)` label used in log lines.
    pub fn method_label(&self, method: &MemberInfo) -> String {
        format!(
            "{}.{}{}",
            self.class_name(),
            self.member_name(method),
            self.member_descriptor(method)
        )
    }

    /// Symbol table view: the class, then fields, then methods, in declaration order.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut out = Vec::with_capacity(1 + self.fields.len() + self.methods.len());
        let class = Symbol {
            kind: SymbolKind::Class,
            name: self.class_name(),
            descriptor: String::new(),
        };
        out.push(class);
        let declared = [(SymbolKind::Field, &self.fields), (SymbolKind::Method, &self.methods)];
        for (kind, members) in declared {
            for m in members {
                out.push(Symbol {
                    kind,
                    name: self.member_name(m),
                    descriptor: self.member_descriptor(m),
                });
            }
        }
        out
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| self.member_name(m) == name && self.member_descriptor(m) == descriptor)
    }

    /// Whether the class carries an attribute with the given name.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| self.pool.utf8(a.name_index).as_deref() == Some(name))
    }
}

fn parse_members(
    r: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<MemberInfo>, ParseError> {
    let count = r.u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = r.u16()?;
        let name_index = r.u16()?;
        let descriptor_index = r.u16()?;
        pool.expect_utf8(name_index)?;
        pool.expect_utf8(descriptor_index)?;
        let raw = AttributeInfo::parse_list(r)?;
        let mut attributes = Vec::with_capacity(raw.len());
        for attr in raw {
            pool.expect_utf8(attr.name_index)?;
            if pool.utf8(attr.name_index).as_deref() == Some("Code") {
                let body = CodeAttribute::parse(&attr.info)?;
                attributes.push(Attribute::Code { name_index: attr.name_index, body });
            } else {
                attributes.push(Attribute::Other(attr));
            }
        }
        out.push(MemberInfo { access_flags, name_index, descriptor_index, attributes });
    }
    Ok(out)
}

fn write_members(members: &[MemberInfo], out: &mut Vec<u8>) {
    out.extend_from_slice(&(members.len() as u16).to_be_bytes());
    for m in members {
        out.extend_from_slice(&m.access_flags.to_be_bytes());
        out.extend_from_slice(&m.name_index.to_be_bytes());
        out.extend_from_slice(&m.descriptor_index.to_be_bytes());
        out.extend_from_slice(&(m.attributes.len() as u16).to_be_bytes());
        for attr in &m.attributes {
            match attr {
                Attribute::Code { name_index, body } => {
                    let bytes = body.to_bytes();
                    out.extend_from_slice(&name_index.to_be_bytes());
                    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    out.extend_from_slice(&bytes);
                }
                Attribute::Other(info) => {
                    out.extend_from_slice(&info.name_index.to_be_bytes());
                    out.extend_from_slice(&(info.info.len() as u32).to_be_bytes());
                    out.extend_from_slice(&info.info);
                }
            }
        }
    }
}
