//! Filesystem and external-process surface: temp-file naming, compiler
//! invocation, and shared-object loading. This is the only module that
//! touches the OS.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use libloading::Library;

use crate::jit::options::{JitCc, JitOptions};
use crate::runtime::helpers::{HELPERS, HelperTable};

/// Prefix reserved for the precompiled header.
pub const PCH_PREFIX: &str = "_emjit_h";
/// Prefix reserved for per-unit artifacts.
pub const UNIT_PREFIX: &str = "_emjit";

/// The header generated code is compiled against, embedded so the engine
/// works without an installed copy.
pub const EMBEDDED_HEADER: &str = include_str!("ember.h");

pub fn scratch_dir() -> PathBuf {
    env::temp_dir()
}

/// `<scratch>/<prefix>p<pid>u<id><suffix>`: unique per process and unit.
pub fn temp_path(prefix: &str, id: u64, suffix: &str) -> PathBuf {
    scratch_dir().join(format!(
        "{}p{}u{}{}",
        prefix,
        std::process::id(),
        id,
        suffix
    ))
}

/// Locate the C compiler on PATH.
pub fn resolve_cc(cc: JitCc) -> Result<PathBuf, String> {
    let candidates: &[&str] = match cc {
        JitCc::Gcc => &["gcc", "cc"],
        JitCc::Clang => &["clang"],
    };
    let path = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&path) {
        for name in candidates {
            let full = dir.join(name);
            if full.is_file() {
                return Ok(full);
            }
        }
    }
    Err(format!("C compiler not found on PATH ({})", cc))
}

/// Materialize the header next to where the PCH will be built: an explicit
/// override, a copy installed beside the executable, or the embedded text.
pub fn resolve_header(target: &Path) -> Result<(), String> {
    let contents = header_contents()?;
    std::fs::write(target, contents).map_err(|e| format!("cannot write header: {}", e))
}

fn header_contents() -> Result<String, String> {
    if let Some(path) = env::var_os("EMBER_HEADER") {
        return std::fs::read_to_string(&path)
            .map_err(|e| format!("EMBER_HEADER {:?}: {}", path, e));
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let installed = dir.join("ember.h");
            if installed.is_file() {
                return std::fs::read_to_string(&installed)
                    .map_err(|e| format!("{:?}: {}", installed, e));
            }
        }
    }
    Ok(EMBEDDED_HEADER.to_string())
}

/// PCH file extension for the configured compiler.
pub fn pch_suffix(cc: JitCc) -> &'static str {
    match cc {
        JitCc::Gcc => ".h.gch",
        JitCc::Clang => ".h.pch",
    }
}

fn opt_flags(opts: &JitOptions) -> Vec<String> {
    if opts.debug {
        vec!["-O0".into(), "-g".into()]
    } else {
        vec!["-O2".into()]
    }
}

/// Argument vector for the one-time PCH build. Flags must match the
/// per-unit builds or gcc quietly ignores the PCH.
pub fn pch_args(opts: &JitOptions, header: &Path, pch: &Path) -> Vec<String> {
    let mut args = opt_flags(opts);
    args.extend([
        "-w".into(),
        "-pipe".into(),
        "-fPIC".into(),
        "-x".into(),
        "c-header".into(),
    ]);
    args.push(header.display().to_string());
    args.push("-o".into());
    args.push(pch.display().to_string());
    args
}

/// Argument vector for a per-unit shared-object build against the PCH.
pub fn so_args(opts: &JitOptions, header: &Path, pch: &Path, src: &Path, out: &Path) -> Vec<String> {
    let mut args = opt_flags(opts);
    args.extend([
        "-w".into(),
        "-pipe".into(),
        "-fPIC".into(),
        "-shared".into(),
    ]);
    match opts.cc {
        // gcc picks up <header>.gch automatically when the header is included
        JitCc::Gcc => {
            args.push("-include".into());
            args.push(header.display().to_string());
        }
        JitCc::Clang => {
            args.push("-include-pch".into());
            args.push(pch.display().to_string());
        }
    }
    args.push(src.display().to_string());
    args.push("-o".into());
    args.push(out.display().to_string());
    args
}

/// Spawn the compiler and wait. Output is discarded below verbose 1; any
/// non-zero exit, signal death, or spawn failure fails the step. No retries.
pub fn run_compiler(cc: &Path, args: &[String], verbose: u8) -> Result<(), String> {
    let mut cmd = Command::new(cc);
    cmd.args(args);
    if verbose == 0 {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }
    let status = cmd
        .status()
        .map_err(|e| format!("failed to spawn {}: {}", cc.display(), e))?;
    if !status.success() {
        return Err(match status.code() {
            Some(code) => format!("{} exited with status {}", cc.display(), code),
            None => format!("{} terminated by signal", cc.display()),
        });
    }
    Ok(())
}

/// Open the shared object with immediate binding, patch the host helper
/// table into its `em_helpers` symbol, and resolve the entry function.
/// The library handle must be retained as long as the pointer is callable.
pub fn load_func(so_path: &Path, funcname: &str) -> Result<(Library, u64), String> {
    unsafe {
        let lib = Library::new(so_path)
            .map_err(|e| format!("failed to load {}: {}", so_path.display(), e))?;

        let table = lib
            .get::<*mut HelperTable>(b"em_helpers\0")
            .map_err(|e| format!("em_helpers symbol missing: {}", e))?;
        std::ptr::copy_nonoverlapping(&HELPERS as *const HelperTable, *table, 1);

        let func = lib
            .get::<*const std::ffi::c_void>(funcname.as_bytes())
            .map_err(|e| format!("entry symbol {} missing: {}", funcname, e))?;
        let addr = *func as u64;
        if addr == 0 {
            return Err(format!("entry symbol {} resolved to null", funcname));
        }
        Ok((lib, addr))
    }
}

/// Best-effort removal of an intermediate file.
pub fn remove_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        log::debug!("could not remove {}: {}", path.display(), e);
    }
}

