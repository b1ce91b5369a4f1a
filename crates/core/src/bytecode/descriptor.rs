//! Just enough descriptor parsing to derive structural features.

/// Coarse classification of a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Void,
    Boolean,
    Primitive,
    Reference,
}

impl ValueKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'V' => Some(ValueKind::Void),
            b'Z' => Some(ValueKind::Boolean),
            b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D' => Some(ValueKind::Primitive),
            b'L' | b'[' => Some(ValueKind::Reference),
            _ => None,
        }
    }

    /// Numeric indicator fed to the name predictor.
    pub fn indicator(self) -> f64 {
        match self {
            ValueKind::Void => 0.0,
            ValueKind::Boolean => 1.0,
            ValueKind::Primitive => 2.0,
            ValueKind::Reference => 3.0,
        }
    }
}

/// Parameter count and return kind of a method descriptor such as `(ILjava/lang/String;)Z`.
pub fn method_shape(descriptor: &str) -> Option<(usize, ValueKind)> {
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return None;
    }
    let mut i = 1;
    let mut arity = 0;
    while i < bytes.len() && bytes[i] != b')' {
        i = skip_field_type(bytes, i)?;
        arity += 1;
    }
    let ret = *bytes.get(i + 1)?;
    Some((arity, ValueKind::from_tag(ret)?))
}

/// Kind of a field descriptor such as `Ljava/lang/Object;`.
pub fn field_kind(descriptor: &str) -> Option<ValueKind> {
    let first = *descriptor.as_bytes().first()?;
    match ValueKind::from_tag(first)? {
        ValueKind::Void => None,
        kind => Some(kind),
    }
}

fn skip_field_type(bytes: &[u8], mut i: usize) -> Option<usize> {
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i)? {
        b'L' => {
            let end = bytes[i..].iter().position(|b| *b == b';')?;
            Some(i + end + 1)
        }
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(i + 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_parameters() {
        assert_eq!(method_shape("()V"), Some((0, ValueKind::Void)));
        assert_eq!(
            method_shape("(I[JLjava/lang/String;[[Ljava/util/List;)Z"),
            Some((4, ValueKind::Boolean))
        );
        assert_eq!(method_shape("(D)Ljava/lang/String;"), Some((1, ValueKind::Reference)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(method_shape("I"), None);
        assert_eq!(method_shape("(Q)V"), None);
        assert_eq!(field_kind("V"), None);
        assert_eq!(field_kind("[I"), Some(ValueKind::Reference));
    }
}
