//! Records the resolved versions of the pure-Rust codec crates, which
//! have no runtime version call.

use std::env;
use std::fs;
use std::path::PathBuf;

/// `(crate, variable, version used when no lockfile is found)`
const CRATES: &[(&str, &str, &str)] = &[
    ("flate2", "ARCSTREAM_FLATE2_VERSION", "1.0.0"),
    ("bzip2", "ARCSTREAM_BZIP2_VERSION", "0.6.0"),
    ("lz4_flex", "ARCSTREAM_LZ4_FLEX_VERSION", "0.11.0"),
];

fn find_lockfile() -> Option<PathBuf> {
    let manifest_dir = env::var_os("CARGO_MANIFEST_DIR").map(PathBuf::from);
    let out_dir = env::var_os("OUT_DIR").map(PathBuf::from);
    manifest_dir
        .iter()
        .chain(out_dir.iter())
        .flat_map(|dir| dir.ancestors())
        .map(|dir| dir.join("Cargo.lock"))
        .find(|path| path.is_file())
}

fn locked_version(lock: &str, name: &str) -> Option<String> {
    let wanted = format!("name = \"{name}\"");
    let mut lines = lock.lines();
    while let Some(line) = lines.next() {
        if line.trim() == wanted {
            let version = lines.next()?.trim();
            return version
                .strip_prefix("version = \"")?
                .strip_suffix('"')
                .map(str::to_string);
        }
    }
    None
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    let lockfile = find_lockfile();
    let lock = match lockfile.as_deref() {
        Some(path) => {
            println!("cargo:rerun-if-changed={}", path.display());
            fs::read_to_string(path).unwrap_or_default()
        }
        None => String::new(),
    };
    for (name, variable, fallback) in CRATES {
        let version = locked_version(&lock, name).unwrap_or_else(|| fallback.to_string());
        println!("cargo:rustc-env={variable}={version}");
    }
}
