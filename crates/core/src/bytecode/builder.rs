//! Minimal class file assembler for fixtures and demos.
//!
//! The builder writes exactly what it is told: no stack map frames are computed and
//! `max_stack`/`max_locals` are fixed generous values, so the output is structurally valid
//! but not necessarily verifiable by a JVM.

use crate::bytecode::{
    mutf8, Attribute, AttributeInfo, ClassUnit, CodeAttribute, Constant, ConstantPool,
    ExceptionEntry, MemberInfo, RefKind, ACC_PUBLIC,
};

const ACC_SUPER: u16 = 0x0020;

/// Incrementally assembles a [`ClassUnit`].
///
/// # Panics
///
/// Pool helpers panic if the constant pool overflows (65535 entries), which fixtures never
/// approach.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    unit: ClassUnit,
}

impl ClassBuilder {
    /// Start a public class extending `java/lang/Object`, class file version 52 (Java 8).
    pub fn new(class_name: &str) -> Self {
        let mut unit = ClassUnit {
            minor_version: 0,
            major_version: 52,
            pool: ConstantPool::new(),
            access_flags: ACC_PUBLIC | ACC_SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        };
        unit.this_class = intern_class(&mut unit.pool, class_name);
        unit.super_class = intern_class(&mut unit.pool, "java/lang/Object");
        Self { unit }
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        intern(&mut self.unit.pool, Constant::Utf8(mutf8::encode(value)))
    }

    pub fn class_ref(&mut self, name: &str) -> u16 {
        intern_class(&mut self.unit.pool, name)
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        intern(&mut self.unit.pool, Constant::String { value })
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        intern(&mut self.unit.pool, Constant::Integer(value))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        intern(&mut self.unit.pool, Constant::NameAndType { name, descriptor })
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(RefKind::Method, owner, name, descriptor)
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(RefKind::Field, owner, name, descriptor)
    }

    pub fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(RefKind::InterfaceMethod, owner, name, descriptor)
    }

    /// A `CONSTANT_MethodHandle` with `REF_invokeStatic` pointing at `reference`.
    pub fn static_method_handle(&mut self, reference: u16) -> u16 {
        intern(&mut self.unit.pool, Constant::MethodHandle { kind: 6, reference })
    }

    fn member_ref(&mut self, kind: RefKind, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class_ref(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        intern(&mut self.unit.pool, Constant::MemberRef { kind, class, name_and_type })
    }

    pub fn field(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let member = self.member(access, name, descriptor, Vec::new());
        self.unit.fields.push(member);
        self
    }

    /// Add a method with a body.
    pub fn method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
    ) -> &mut Self {
        self.method_with_handlers(access, name, descriptor, code, Vec::new())
    }

    pub fn method_with_handlers(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        exception_table: Vec<ExceptionEntry>,
    ) -> &mut Self {
        let name_index = self.utf8("Code");
        let body = CodeAttribute {
            max_stack: 8,
            max_locals: 8,
            code,
            exception_table,
            attributes: Vec::new(),
        };
        let attributes = vec![Attribute::Code { name_index, body }];
        let member = self.member(access, name, descriptor, attributes);
        self.unit.methods.push(member);
        self
    }

    /// Add a method without a body (native or abstract, depending on `access`).
    pub fn bodiless_method(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let member = self.member(access, name, descriptor, Vec::new());
        self.unit.methods.push(member);
        self
    }

    pub fn class_attribute(&mut self, name: &str, info: Vec<u8>) -> &mut Self {
        let name_index = self.utf8(name);
        self.unit.attributes.push(AttributeInfo { name_index, info });
        self
    }

    fn member(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<Attribute>,
    ) -> MemberInfo {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        MemberInfo { access_flags, name_index, descriptor_index, attributes }
    }

    pub fn build(&self) -> ClassUnit {
        self.unit.clone()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.unit.to_bytes()
    }
}

fn intern(pool: &mut ConstantPool, constant: Constant) -> u16 {
    match pool.intern(constant) {
        Some(idx) => idx,
        None => panic!("fixture constant pool overflow"),
    }
}

fn intern_class(pool: &mut ConstantPool, name: &str) -> u16 {
    let name = intern(pool, Constant::Utf8(mutf8::encode(name)));
    intern(pool, Constant::Class { name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcodes::RETURN;
    use crate::bytecode::{parse, serialize, SymbolKind};

    #[test]
    fn built_class_round_trips() {
        let mut b = ClassBuilder::new("demo/Widget");
        b.field(0x0002, "a", "I").method(0x0001, "b", "()V", vec![RETURN]);
        let bytes = b.to_bytes();
        let unit = parse(&bytes).expect("parse built class");
        assert_eq!(serialize(&unit), bytes);
        assert_eq!(unit.class_name(), "demo/Widget");

        let symbols = unit.symbols();
        assert_eq!(symbols.len(), 3);
        assert_eq!(symbols[0].kind, SymbolKind::Class);
        assert_eq!(symbols[1].name, "a");
        assert_eq!(symbols[2].descriptor, "()V");
    }
}
