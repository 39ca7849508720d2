use std::path::Path;

use crate::jit::options::{JitCc, JitOptions};
use crate::jit::toolchain::{
    EMBEDDED_HEADER, PCH_PREFIX, UNIT_PREFIX, load_func, pch_args, pch_suffix, run_compiler,
    so_args, temp_path,
};

#[test]
fn temp_paths_encode_pid_and_id() {
    let pid = std::process::id();
    let path = temp_path(UNIT_PREFIX, 7, ".c");
    let name = path.file_name().unwrap().to_str().unwrap();
    assert_eq!(name, format!("_emjitp{}u7.c", pid));

    let pch = temp_path(PCH_PREFIX, 0, pch_suffix(JitCc::Gcc));
    let name = pch.file_name().unwrap().to_str().unwrap();
    assert_eq!(name, format!("_emjit_hp{}u0.h.gch", pid));
}

#[test]
fn pch_suffix_per_compiler() {
    assert_eq!(pch_suffix(JitCc::Gcc), ".h.gch");
    assert_eq!(pch_suffix(JitCc::Clang), ".h.pch");
}

#[test]
fn pch_args_compile_a_c_header() {
    let opts = JitOptions::default();
    let args = pch_args(&opts, Path::new("/tmp/h.h"), Path::new("/tmp/h.h.gch"));
    assert!(args.contains(&"-O2".to_string()));
    assert!(args.contains(&"-x".to_string()));
    assert!(args.contains(&"c-header".to_string()));
    assert_eq!(args.last().unwrap(), "/tmp/h.h.gch");
}

#[test]
fn debug_flag_switches_optimization() {
    let opts = JitOptions {
        debug: true,
        ..JitOptions::default()
    };
    let args = pch_args(&opts, Path::new("h.h"), Path::new("h.h.gch"));
    assert!(args.contains(&"-O0".to_string()));
    assert!(args.contains(&"-g".to_string()));
    assert!(!args.contains(&"-O2".to_string()));
}

#[test]
fn so_args_build_a_shared_object() {
    let opts = JitOptions::default();
    let args = so_args(
        &opts,
        Path::new("/tmp/h.h"),
        Path::new("/tmp/h.h.gch"),
        Path::new("/tmp/u.c"),
        Path::new("/tmp/u.so"),
    );
    assert!(args.contains(&"-shared".to_string()));
    assert!(args.contains(&"-fPIC".to_string()));
    // gcc discovers the .gch through the plain header include
    assert!(args.contains(&"-include".to_string()));
    assert!(args.contains(&"/tmp/h.h".to_string()));
    assert_eq!(args.last().unwrap(), "/tmp/u.so");
}

#[test]
fn clang_uses_include_pch() {
    let opts = JitOptions {
        cc: JitCc::Clang,
        ..JitOptions::default()
    };
    let args = so_args(
        &opts,
        Path::new("/tmp/h.h"),
        Path::new("/tmp/h.h.pch"),
        Path::new("/tmp/u.c"),
        Path::new("/tmp/u.so"),
    );
    assert!(args.contains(&"-include-pch".to_string()));
    assert!(args.contains(&"/tmp/h.h.pch".to_string()));
}

#[test]
fn embedded_header_declares_the_abi() {
    assert!(EMBEDDED_HEADER.contains("typedef uint64_t VALUE"));
    assert!(EMBEDDED_HEADER.contains("struct em_helper_table"));
    assert!(EMBEDDED_HEADER.contains("EM_QUNDEF"));
    assert!(EMBEDDED_HEADER.contains("em_control_frame_t"));
}

#[test]
fn spawn_failure_is_reported() {
    let err = run_compiler(Path::new("/nonexistent/ember-no-such-cc"), &[], 0).unwrap_err();
    assert!(err.contains("failed to spawn"), "{}", err);
}

#[test]
fn nonzero_exit_is_reported() {
    // `false` exits 1 on every platform we support
    let err = run_compiler(Path::new("/bin/false"), &[], 0).unwrap_err();
    assert!(err.contains("exited with status"), "{}", err);
}

#[test]
fn loading_a_garbage_object_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.so");
    std::fs::write(&path, b"not a shared object").unwrap();
    let err = load_func(&path, "_emjit_0").unwrap_err();
    assert!(err.contains("failed to load"), "{}", err);
}
