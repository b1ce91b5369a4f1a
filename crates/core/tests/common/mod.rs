//! Fixture archives shared by the integration tests.
#![allow(dead_code)]

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use unravel_core::bytecode::opcodes::*;
use unravel_core::bytecode::{ClassBuilder, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
use unravel_core::naming::{MappingStore, NoopPredictor, SuspectSet};
use unravel_core::runlog::RunLog;
use unravel_core::services::{DeobfuscateOptions, Deobfuscator};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const HELPER: &str = "(Ljava/lang/String;)Ljava/lang/String;";
pub const MANIFEST: &[u8] = b"Manifest-Version: 1.0\r\nMain-Class: game.Main\r\n\r\n";

pub fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let file = File::create(path).expect("create jar");
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, bytes) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).expect("add dir");
        } else {
            zip.start_file(*name, options).expect("start file");
            zip.write_all(bytes).expect("write entry");
        }
    }
    zip.finish().expect("finish jar");
}

/// `(name, bytes)` of every entry, in archive order.
pub fn read_jar(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut zip = ZipArchive::new(File::open(path).expect("open jar")).expect("read jar");
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).expect("entry");
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).expect("read entry");
            (file.name().to_string(), bytes)
        })
        .collect()
}

pub fn entry(path: &Path, name: &str) -> Vec<u8> {
    read_jar(path)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, b)| b)
        .unwrap_or_else(|| panic!("missing entry {name}"))
}

pub fn options() -> DeobfuscateOptions {
    DeobfuscateOptions { workers: 2, timeout: Duration::from_secs(30), ..Default::default() }
}

pub fn deobfuscator(store: MappingStore, suspects: SuspectSet) -> Deobfuscator {
    Deobfuscator::new(
        Arc::new(store),
        suspects,
        Arc::new(NoopPredictor),
        Arc::new(RunLog::in_memory()),
        options(),
    )
}

fn be(idx: u16) -> [u8; 2] {
    idx.to_be_bytes()
}

/// `game/Combat` with `zov()Z` called three times from `tick()V`.
pub fn combat_class() -> Vec<u8> {
    let mut b = ClassBuilder::new("game/Combat");
    let zov = be(b.method_ref("game/Combat", "zov", "()Z"));
    let mut tick = Vec::new();
    for _ in 0..3 {
        tick.extend([ALOAD_0, INVOKEVIRTUAL, zov[0], zov[1], POP]);
    }
    tick.push(RETURN);
    b.method(ACC_PUBLIC, "zov", "()Z", vec![ICONST_5, IRETURN]);
    b.method(ACC_PUBLIC, "tick", "()V", tick);
    b.to_bytes()
}

/// `game/Junk` with a `forft()V` method nothing calls and a `run()V` method.
pub fn junk_class() -> Vec<u8> {
    let mut b = ClassBuilder::new("game/Junk");
    b.method(ACC_PUBLIC, "run", "()V", vec![RETURN]);
    b.method(ACC_PUBLIC, "forft", "()V", vec![RETURN]);
    b.to_bytes()
}

/// `app/Secrets` whose `greet()` loads a Base64 literal through a private helper.
pub fn base64_secrets_class(encoded: &str) -> Vec<u8> {
    let mut b = ClassBuilder::new("app/Secrets");
    let get_decoder =
        be(b.method_ref("java/util/Base64", "getDecoder", "()Ljava/util/Base64$Decoder;"));
    let decode =
        be(b.method_ref("java/util/Base64$Decoder", "decode", "(Ljava/lang/String;)[B"));
    let string_new = be(b.method_ref("java/lang/String", "<init>", "([B)V"));
    let string_class = be(b.class_ref("java/lang/String"));
    let helper = be(b.method_ref("app/Secrets", "decrypt", HELPER));
    let literal = b.string(encoded) as u8;
    b.method(
        ACC_PRIVATE | ACC_STATIC,
        "decrypt",
        HELPER,
        vec![
            NEW,
            string_class[0],
            string_class[1],
            INVOKESTATIC,
            get_decoder[0],
            get_decoder[1],
            ALOAD_0,
            INVOKEVIRTUAL,
            decode[0],
            decode[1],
            INVOKESPECIAL,
            string_new[0],
            string_new[1],
            ARETURN,
        ],
    );
    b.method(
        ACC_PUBLIC,
        "greet",
        "()Ljava/lang/String;",
        vec![LDC, literal, INVOKESTATIC, helper[0], helper[1], ARETURN],
    );
    b.to_bytes()
}

/// XOR every UTF-16 unit of `plain` with `key`.
pub fn char_xor(plain: &str, key: u16) -> String {
    let units: Vec<u16> = plain.encode_utf16().map(|u| u ^ key).collect();
    String::from_utf16(&units).expect("xor text")
}

/// `app/Keys` with a private char-XOR helper and two call sites of it.
pub fn xor_keys_class(key: u8, first: &str, second: &str) -> Vec<u8> {
    xor_keys_class_with(ACC_PRIVATE | ACC_STATIC, key, first, second)
}

/// `app/Keys` whose char-XOR helper has the given access flags.
pub fn xor_keys_class_with(helper_access: u16, key: u8, first: &str, second: &str) -> Vec<u8> {
    let mut b = ClassBuilder::new("app/Keys");
    let to_chars = be(b.method_ref("java/lang/String", "toCharArray", "()[C"));
    let helper = be(b.method_ref("app/Keys", "x", HELPER));
    let first = b.string(&char_xor(first, key as u16)) as u8;
    let second = b.string(&char_xor(second, key as u16)) as u8;
    // The loop is flattened: only the char source and the XOR key matter to the decoder.
    b.method(
        helper_access,
        "x",
        HELPER,
        vec![
            ALOAD_0,
            INVOKEVIRTUAL,
            to_chars[0],
            to_chars[1],
            POP,
            ILOAD,
            1,
            BIPUSH,
            key,
            IXOR,
            POP,
            ALOAD_0,
            ARETURN,
        ],
    );
    b.method(
        ACC_PUBLIC | ACC_STATIC,
        "host",
        "()Ljava/lang/String;",
        vec![LDC, first, INVOKESTATIC, helper[0], helper[1], ARETURN],
    );
    b.method(
        ACC_PUBLIC | ACC_STATIC,
        "token",
        "()Ljava/lang/String;",
        vec![LDC, second, INVOKESTATIC, helper[0], helper[1], ARETURN],
    );
    b.to_bytes()
}

/// A plain class with one public method, named after `class_name`.
pub fn plain_class(class_name: &str) -> Vec<u8> {
    let mut b = ClassBuilder::new(class_name);
    b.method(ACC_PUBLIC, "update", "()V", vec![RETURN]);
    b.to_bytes()
}
