//! Externally implemented methods are never rewritten, only renamed.

use crate::bytecode::ClassUnit;

pub const MANUAL_REVIEW: &str = "manual review required";

/// Labels of the unit's native methods, in declaration order.
pub fn native_methods(unit: &ClassUnit) -> Vec<String> {
    unit.methods.iter().filter(|m| m.is_native()).map(|m| unit.method_label(m)).collect()
}
