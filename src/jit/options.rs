use std::fmt;

/// External C compiler used for the shared-object builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitCc {
    #[default]
    Gcc,
    Clang,
}

impl fmt::Display for JitCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitCc::Gcc => write!(f, "gcc"),
            JitCc::Clang => write!(f, "clang"),
        }
    }
}

/// Engine configuration, fixed at init. Mirrors the host's `--jit[=...]`
/// command-line surface.
#[derive(Debug, Clone)]
pub struct JitOptions {
    pub on: bool,
    pub cc: JitCc,
    /// Keep intermediate `.c`, `.so`, and the precompiled header after exit.
    pub save_temps: bool,
    /// Print engine warnings to stderr.
    pub warnings: bool,
    /// Compile generated code with `-O0 -g` instead of `-O2`.
    pub debug: bool,
    /// 0 = silence, 1 = medium, 2 = verbose, 3 = everything.
    pub verbose: u8,
    /// Upper bound on resident compiled units.
    pub max_cache_size: usize,
}

impl Default for JitOptions {
    fn default() -> Self {
        JitOptions {
            on: false,
            cc: JitCc::Gcc,
            save_temps: false,
            warnings: false,
            debug: false,
            verbose: 0,
            max_cache_size: 1000,
        }
    }
}

impl JitOptions {
    /// Parse a comma-separated option list, e.g.
    /// `"on,verbose=2,save-temps"`. Unknown keys are rejected.
    pub fn parse(s: &str) -> Result<JitOptions, String> {
        let mut opts = JitOptions::default();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            match item {
                "on" => opts.on = true,
                "llvm" => opts.cc = JitCc::Clang,
                "save-temps" => opts.save_temps = true,
                "warnings" => opts.warnings = true,
                "debug" => opts.debug = true,
                _ => {
                    if let Some(v) = item.strip_prefix("verbose=") {
                        opts.verbose = v
                            .parse::<u8>()
                            .map_err(|_| format!("invalid verbose level: {}", v))?;
                    } else if let Some(v) = item.strip_prefix("max-cache-size=") {
                        opts.max_cache_size = v
                            .parse::<usize>()
                            .map_err(|_| format!("invalid max-cache-size: {}", v))?;
                    } else {
                        return Err(format!("unknown JIT option: {}", item));
                    }
                }
            }
        }
        Ok(opts)
    }
}

