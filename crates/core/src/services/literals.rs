//! Static recovery of literals hidden behind a decrypt helper.
//!
//! A helper is a static `(String)String` method of the unit. Its decoding rule is read off its
//! own body and must be one of a small fixed set; anything else is reported as unsupported
//! rather than guessed. Every call site of the form `ldc "…"; invokestatic helper` then has
//! its literal decoded at analysis time, the pool updated with the plaintext and the invoke
//! replaced by `nop`s, so a recovered site is never decoded twice.

use std::collections::{BTreeMap, BTreeSet};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::bytecode::opcodes::*;
use crate::bytecode::{mutf8, ClassUnit, Constant, Instruction, MemberInfo, Operand};
use crate::error::LiteralRecoveryFailure;

pub const HELPER_DESCRIPTOR: &str = "(Ljava/lang/String;)Ljava/lang/String;";

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const BASE64_STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Decoding rules a helper body can be recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoding {
    /// `aload_0; areturn`
    Identity,
    /// `new String(Base64.getDecoder().decode(s))`
    Base64 { url_safe: bool },
    /// Base64, then every byte XORed with `key`.
    Base64Xor { url_safe: bool, key: u8 },
    /// Every UTF-16 unit XORed with `key`.
    CharXor { key: u16 },
    /// Every UTF-8 byte XORed with `key`.
    ByteXor { key: u8 },
}

impl Decoding {
    /// Evaluate the rule on the UTF-16 units of an encoded literal.
    pub fn decode(&self, encoded: &[u16]) -> Result<String, String> {
        let text = || String::from_utf16(encoded).map_err(|e| e.to_string());
        let utf8 = |bytes: Vec<u8>| String::from_utf8(bytes).map_err(|e| e.to_string());
        match *self {
            Decoding::Identity => text(),
            Decoding::Base64 { url_safe } => utf8(base64_decode(&text()?, url_safe)?),
            Decoding::Base64Xor { url_safe, key } => {
                let bytes = base64_decode(&text()?, url_safe)?;
                utf8(bytes.into_iter().map(|b| b ^ key).collect())
            }
            Decoding::CharXor { key } => {
                let units: Vec<u16> = encoded.iter().map(|u| u ^ key).collect();
                String::from_utf16(&units).map_err(|e| e.to_string())
            }
            Decoding::ByteXor { key } => {
                utf8(text()?.into_bytes().into_iter().map(|b| b ^ key).collect())
            }
        }
    }
}

fn base64_decode(text: &str, url_safe: bool) -> Result<Vec<u8>, String> {
    let engine = if url_safe { &BASE64_URL } else { &BASE64_STANDARD };
    engine.decode(text).map_err(|e| e.to_string())
}

/// Integer pushed by `insn`, if it is a constant push.
fn pushed_int(unit: &ClassUnit, insn: &Instruction) -> Option<i32> {
    match (insn.opcode, &insn.operand) {
        (op @ ICONST_M1..=ICONST_5, _) => Some(op as i32 - 3),
        (BIPUSH, Operand::Byte(v)) => Some(*v as i32),
        (SIPUSH, Operand::Short(v)) => Some(*v as i32),
        (LDC | LDC_W, Operand::Pool(idx)) => unit.pool.integer(*idx),
        _ => None,
    }
}

fn is_load_first_arg(insn: &Instruction) -> bool {
    insn.opcode == ALOAD_0 || (insn.opcode == ALOAD && insn.operand == Operand::Local(0))
}

/// Infer the decoding rule implemented by `method`.
pub fn infer_decoding(
    unit: &ClassUnit,
    method: &MemberInfo,
) -> Result<Decoding, LiteralRecoveryFailure> {
    let unsupported = || LiteralRecoveryFailure::UnsupportedDecoding(unit.method_label(method));
    let code = method.code().ok_or_else(unsupported)?;
    let insns = code.instructions().map_err(|_| unsupported())?;

    let body: Vec<&Instruction> = insns.iter().filter(|i| i.opcode != NOP).collect();
    if body.len() == 2 && is_load_first_arg(body[0]) && body[1].opcode == ARETURN {
        return Ok(Decoding::Identity);
    }

    let (mut base64, mut url_safe, mut chars, mut bytes) = (false, false, false, false);
    let mut keys = Vec::new();
    for (i, insn) in insns.iter().enumerate() {
        if insn.opcode == IXOR {
            let key = i.checked_sub(1).and_then(|p| pushed_int(unit, &insns[p]));
            keys.push(key.ok_or_else(unsupported)?);
        }
        if !is_invoke(insn.opcode) {
            continue;
        }
        let Some(r) = insn.pool_index().and_then(|idx| unit.pool.member_ref(idx)) else {
            continue;
        };
        match (r.owner.as_str(), r.name.as_str()) {
            ("java/util/Base64$Decoder", "decode") => base64 = true,
            ("java/util/Base64", "getUrlDecoder") => url_safe = true,
            ("java/util/Base64", "getMimeDecoder") => return Err(unsupported()),
            ("java/lang/String", "toCharArray" | "charAt") => chars = true,
            ("java/lang/String", "getBytes") => bytes = true,
            _ => {}
        }
    }
    if keys.len() > 1 {
        return Err(unsupported());
    }

    match (base64, keys.first().copied(), chars, bytes) {
        (true, None, _, _) => Ok(Decoding::Base64 { url_safe }),
        (true, Some(key), false, _) => Ok(Decoding::Base64Xor { url_safe, key: key as u8 }),
        (false, Some(key), true, false) => Ok(Decoding::CharXor { key: key as u16 }),
        (false, Some(key), false, true) => Ok(Decoding::ByteXor { key: key as u8 }),
        _ => Err(unsupported()),
    }
}

/// A decrypt helper candidate of the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helper {
    pub method_index: usize,
    pub name: String,
    pub label: String,
    pub decoding: Result<Decoding, LiteralRecoveryFailure>,
}

/// Static, non-native `(String)String` methods with a body.
pub fn find_helpers(unit: &ClassUnit) -> Vec<Helper> {
    unit.methods
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            m.is_static()
                && !m.is_native()
                && m.code().is_some()
                && unit.member_descriptor(m) == HELPER_DESCRIPTOR
        })
        .map(|(i, m)| Helper {
            method_index: i,
            name: unit.member_name(m),
            label: unit.method_label(m),
            decoding: infer_decoding(unit, m),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredLiteral {
    pub method: String,
    pub offset: usize,
    pub plaintext: String,
}

/// A helper all of whose call sites in the unit were recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentHelper {
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiteralReport {
    pub recovered: Vec<RecoveredLiteral>,
    pub failures: Vec<LiteralRecoveryFailure>,
    pub spent: Vec<SpentHelper>,
}

#[derive(Debug, Clone)]
struct Site {
    method: usize,
    ldc: Instruction,
    invoke: Instruction,
    helper: usize,
    string_index: u16,
}

/// String constants referenced from attributes we keep opaque (`ConstantValue`,
/// `BootstrapMethods`), which must never be edited in place.
fn attribute_string_uses(unit: &ClassUnit) -> BTreeSet<u16> {
    let mut out = BTreeSet::new();
    let be = |b: &[u8], at: usize| b.get(at..at + 2).map(|s| u16::from_be_bytes([s[0], s[1]]));
    for field in &unit.fields {
        for attr in &field.attributes {
            if let crate::bytecode::Attribute::Other(info) = attr {
                if unit.pool.utf8(info.name_index).as_deref() == Some("ConstantValue") {
                    out.extend(be(&info.info, 0));
                }
            }
        }
    }
    for attr in &unit.attributes {
        if unit.pool.utf8(attr.name_index).as_deref() != Some("BootstrapMethods") {
            continue;
        }
        let info = &attr.info;
        let count = be(info, 0).unwrap_or(0) as usize;
        let mut at = 2;
        for _ in 0..count {
            let Some(nargs) = be(info, at + 2) else { break };
            at += 4;
            for _ in 0..nargs {
                out.extend(be(info, at));
                at += 2;
            }
        }
    }
    out
}

/// Recover every helper-decoded literal of `unit`.
///
/// All literals are decoded from the pool as it was on entry before any change is applied.
/// Native methods and the helpers themselves are not scanned.
pub fn recover_literals(unit: &mut ClassUnit) -> LiteralReport {
    let mut report = LiteralReport::default();
    let helpers = find_helpers(unit);
    if helpers.is_empty() {
        return report;
    }
    let own = unit.class_name();
    let helper_methods: BTreeSet<usize> = helpers.iter().map(|h| h.method_index).collect();

    for h in &helpers {
        if let Err(err) = &h.decoding {
            report.failures.push(err.clone());
        }
    }

    let mut sites = Vec::new();
    let mut total_sites = vec![0usize; helpers.len()];
    let mut ldc_uses: BTreeMap<u16, usize> = BTreeMap::new();

    for (j, method) in unit.methods.iter().enumerate() {
        if method.is_native() {
            continue;
        }
        let Some(code) = method.code() else { continue };
        let Ok(insns) = code.instructions() else { continue };
        for insn in &insns {
            if matches!(insn.opcode, LDC | LDC_W) {
                if let Some(idx) = insn.pool_index().filter(|i| unit.pool.string(*i).is_some()) {
                    *ldc_uses.entry(idx).or_insert(0) += 1;
                }
            }
        }
        if helper_methods.contains(&j) {
            continue;
        }
        let targets = code.jump_targets(&insns);
        for (k, insn) in insns.iter().enumerate() {
            if insn.opcode != INVOKESTATIC {
                continue;
            }
            let Some(r) = insn.pool_index().and_then(|idx| unit.pool.member_ref(idx)) else {
                continue;
            };
            if r.owner != own || r.descriptor != HELPER_DESCRIPTOR {
                continue;
            }
            let Some(h) = helpers.iter().position(|h| h.name == r.name) else {
                if unit.find_method(&r.name, &r.descriptor).is_none() {
                    report
                        .failures
                        .push(LiteralRecoveryFailure::HelperNotFound(format!("{own}.{}", r.name)));
                }
                continue;
            };
            total_sites[h] += 1;
            let ldc = k
                .checked_sub(1)
                .map(|p| &insns[p])
                .filter(|p| matches!(p.opcode, LDC | LDC_W) && !targets.contains(&insn.offset))
                .and_then(|p| {
                    p.pool_index().filter(|i| unit.pool.string(*i).is_some()).map(|i| (p, i))
                });
            match ldc {
                Some((ldc, string_index)) => sites.push(Site {
                    method: j,
                    ldc: ldc.clone(),
                    invoke: insn.clone(),
                    helper: h,
                    string_index,
                }),
                None => report.failures.push(LiteralRecoveryFailure::NonConstantArgument {
                    helper: helpers[h].label.clone(),
                    method: unit.method_label(method),
                    offset: insn.offset,
                }),
            }
        }
    }

    // Decode everything against the untouched pool.
    let mut decoded: Vec<(Site, String, bool)> = Vec::new();
    for site in sites {
        let Ok(decoding) = &helpers[site.helper].decoding else { continue };
        let Some(Constant::String { value }) = unit.pool.get(site.string_index).ok().cloned()
        else {
            continue;
        };
        let Ok(Constant::Utf8(raw)) = unit.pool.get(value) else { continue };
        let units = mutf8::decode_utf16(raw);
        match decoding.decode(&units) {
            Ok(plain) => {
                let unchanged = plain.encode_utf16().eq(units.iter().copied());
                decoded.push((site, plain, unchanged));
            }
            Err(reason) => report.failures.push(LiteralRecoveryFailure::InvalidEncoding {
                helper: helpers[site.helper].label.clone(),
                index: site.string_index,
                reason,
            }),
        }
    }

    // A String constant may be edited in place only if every load of it is a recovered call
    // site yielding the same plaintext.
    let pinned = attribute_string_uses(unit);
    let mut by_index: BTreeMap<u16, Vec<&str>> = BTreeMap::new();
    for (site, plain, _) in &decoded {
        by_index.entry(site.string_index).or_default().push(plain.as_str());
    }
    let exclusive: BTreeSet<u16> = by_index
        .iter()
        .filter(|(idx, plains)| {
            !pinned.contains(*idx)
                && ldc_uses.get(*idx).copied().unwrap_or(0) == plains.len()
                && plains.iter().all(|p| *p == plains[0])
        })
        .map(|(idx, _)| *idx)
        .collect();

    let mut recovered_per_helper = vec![0usize; helpers.len()];
    let mut retargeted: BTreeSet<u16> = BTreeSet::new();
    for (site, plain, unchanged) in &decoded {
        let applied = if *unchanged {
            Ok(())
        } else if exclusive.contains(&site.string_index) {
            repoint_string(unit, site.string_index, plain, &mut retargeted)
        } else {
            rewrite_ldc(unit, site, plain)
        };
        match applied {
            Ok(()) => {
                // `(String)String` pops and pushes one reference.
                if let Some(code) = unit.methods[site.method].code_mut() {
                    code.nop_out(&site.invoke);
                }
                recovered_per_helper[site.helper] += 1;
                report.recovered.push(RecoveredLiteral {
                    method: unit.method_label(&unit.methods[site.method]),
                    offset: site.ldc.offset,
                    plaintext: plain.clone(),
                });
            }
            Err(err) => report.failures.push(err),
        }
    }

    for (h, helper) in helpers.iter().enumerate() {
        if total_sites[h] == 0 || recovered_per_helper[h] != total_sites[h] {
            continue;
        }
        report.spent.push(SpentHelper {
            name: helper.name.clone(),
            descriptor: HELPER_DESCRIPTOR.to_string(),
        });
    }

    report
}

/// Point the String constant at a new Utf8 holding `plain`.
fn repoint_string(
    unit: &mut ClassUnit,
    string_index: u16,
    plain: &str,
    done: &mut BTreeSet<u16>,
) -> Result<(), LiteralRecoveryFailure> {
    if done.contains(&string_index) {
        return Ok(());
    }
    let utf8 =
        unit.pool.intern_utf8(plain).ok_or(LiteralRecoveryFailure::PoolOverflow(string_index))?;
    if let Some(Constant::String { value }) = unit.pool.get_mut(string_index) {
        *value = utf8;
    }
    done.insert(string_index);
    Ok(())
}

/// Load a fresh String constant holding `plain` at this call site only.
fn rewrite_ldc(
    unit: &mut ClassUnit,
    site: &Site,
    plain: &str,
) -> Result<(), LiteralRecoveryFailure> {
    let overflow = LiteralRecoveryFailure::PoolOverflow(site.string_index);
    let utf8 = unit.pool.intern_utf8(plain).ok_or_else(|| overflow.clone())?;
    let string =
        unit.pool.intern(Constant::String { value: utf8 }).ok_or_else(|| overflow.clone())?;
    let Some(code) = unit.methods[site.method].code_mut() else { return Err(overflow) };
    let at = site.ldc.offset;
    match site.ldc.opcode {
        LDC => {
            let Ok(byte) = u8::try_from(string) else { return Err(overflow) };
            code.code[at + 1] = byte;
        }
        _ => code.code[at + 1..at + 3].copy_from_slice(&string.to_be_bytes()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn decodes_supported_rules() {
        assert_eq!(Decoding::Identity.decode(&units("abc")).unwrap(), "abc");
        assert_eq!(
            Decoding::Base64 { url_safe: false }.decode(&units("aGVsbG8=")).unwrap(),
            "hello"
        );
        let unpadded = Decoding::Base64 { url_safe: false }.decode(&units("aGVsbG8"));
        assert_eq!(unpadded.unwrap(), "hello");
        let xored: String = "hello".chars().map(|c| ((c as u8) ^ 0x2a) as char).collect();
        assert_eq!(Decoding::CharXor { key: 0x2a }.decode(&units(&xored)).unwrap(), "hello");
        assert_eq!(Decoding::ByteXor { key: 0x2a }.decode(&units(&xored)).unwrap(), "hello");
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(Decoding::Base64 { url_safe: false }.decode(&units("not base64!")).is_err());
    }

    fn xor(s: &str, key: u16) -> String {
        String::from_utf16(&s.encode_utf16().map(|u| u ^ key).collect::<Vec<_>>()).unwrap()
    }

    /// `p/S` with a char-XOR helper `d`, plus `call` (helper site) and `raw` (plain use) that
    /// load the same encoded constant.
    fn shared_literal_unit(key: u8) -> (ClassUnit, u16) {
        use crate::bytecode::{ClassBuilder, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
        let mut b = ClassBuilder::new("p/S");
        let [th, tl] = b.method_ref("java/lang/String", "toCharArray", "()[C").to_be_bytes();
        let [dh, dl] = b.method_ref("p/S", "d", HELPER_DESCRIPTOR).to_be_bytes();
        let encoded = b.string(&xor("port", key as u16));
        let helper = vec![
            ALOAD_0, INVOKEVIRTUAL, th, tl, POP, BIPUSH, 5, BIPUSH, key, IXOR, POP, ALOAD_0,
            ARETURN,
        ];
        b.method(ACC_PRIVATE | ACC_STATIC, "d", HELPER_DESCRIPTOR, helper);
        let sig = "()Ljava/lang/String;";
        b.method(ACC_PUBLIC, "call", sig, vec![LDC, encoded as u8, INVOKESTATIC, dh, dl, ARETURN]);
        b.method(ACC_PUBLIC, "raw", sig, vec![LDC, encoded as u8, ARETURN]);
        (b.build(), encoded)
    }

    fn loaded(unit: &ClassUnit, method: &str) -> String {
        let m = &unit.methods[unit.find_method(method, "()Ljava/lang/String;").unwrap()];
        let insns = m.code().unwrap().instructions().unwrap();
        unit.pool.string(insns[0].pool_index().unwrap()).unwrap()
    }

    #[test]
    fn shared_constant_is_rewritten_per_site() {
        let (mut unit, encoded) = shared_literal_unit(0x11);
        let report = recover_literals(&mut unit);

        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(loaded(&unit, "call"), "port");
        assert_eq!(loaded(&unit, "raw"), xor("port", 0x11));
        assert_eq!(unit.pool.string(encoded).unwrap(), xor("port", 0x11));
        assert_eq!(report.spent.len(), 1);
        assert_eq!(report.spent[0].name, "d");
    }

    #[test]
    fn recovered_site_no_longer_calls_the_helper() {
        let (mut unit, _) = shared_literal_unit(0x11);
        recover_literals(&mut unit);

        let call = unit.find_method("call", "()Ljava/lang/String;").unwrap();
        let insns = unit.methods[call].code().unwrap().instructions().unwrap();
        let opcodes: Vec<u8> = insns.iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![LDC, NOP, NOP, NOP, ARETURN]);

        let again = recover_literals(&mut unit);
        assert!(again.recovered.is_empty());
        assert!(again.spent.is_empty());
        assert_eq!(loaded(&unit, "call"), "port");
    }

    #[test]
    fn unrecognised_helper_is_reported_once() {
        use crate::bytecode::{ClassBuilder, ACC_PUBLIC, ACC_STATIC};
        let mut b = ClassBuilder::new("p/T");
        let sig = "()Ljava/lang/String;";
        let [th, tl] = b.method_ref("java/lang/String", "trim", sig).to_be_bytes();
        let [dh, dl] = b.method_ref("p/T", "d", HELPER_DESCRIPTOR).to_be_bytes();
        let lit = b.string("  x  ") as u8;
        let trim = vec![ALOAD_0, INVOKEVIRTUAL, th, tl, ARETURN];
        b.method(ACC_STATIC, "d", HELPER_DESCRIPTOR, trim);
        b.method(ACC_PUBLIC, "a", sig, vec![LDC, lit, INVOKESTATIC, dh, dl, ARETURN]);
        b.method(ACC_PUBLIC, "b", sig, vec![LDC, lit, INVOKESTATIC, dh, dl, ARETURN]);
        let mut unit = b.build();
        let before = unit.to_bytes();

        let report = recover_literals(&mut unit);
        assert!(report.recovered.is_empty());
        assert!(report.spent.is_empty());
        assert_eq!(
            report.failures,
            vec![LiteralRecoveryFailure::UnsupportedDecoding(
                "p/T.d(Ljava/lang/String;)Ljava/lang/String;".to_string()
            )]
        );
        assert_eq!(unit.to_bytes(), before);
    }
}
