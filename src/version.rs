//! Version report for `modelport version`
//!
//! Build metadata comes from `build.rs`. The report also shows which CPU
//! build of llama.cpp this machine would get, since that is the one
//! host-dependent choice the loader makes.

use std::fmt;

use crate::backend::{CpuFeatures, KnownBackend};

/// Metadata embedded by `build.rs`
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    pub git_dirty: &'static str,
    pub built_at: &'static str,
    pub target: &'static str,
    pub profile: &'static str,
    pub rustc: &'static str,
}

pub const BUILD: BuildInfo = BuildInfo {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    git_hash: env!("MODELPORT_GIT_HASH"),
    git_branch: env!("MODELPORT_GIT_BRANCH"),
    git_dirty: env!("MODELPORT_GIT_DIRTY"),
    built_at: env!("MODELPORT_BUILD_TIMESTAMP"),
    target: env!("MODELPORT_TARGET"),
    profile: env!("MODELPORT_PROFILE"),
    rustc: env!("MODELPORT_RUSTC_VERSION"),
};

impl BuildInfo {
    /// `0.1.0-abc1234`, with `-dirty` appended for uncommitted builds
    pub fn full_version(&self) -> String {
        match self.git_dirty {
            "true" => format!("{}-{}-dirty", self.version, self.git_hash),
            _ => format!("{}-{}", self.version, self.git_hash),
        }
    }
}

/// Build metadata plus the host's CPU capabilities
pub struct VersionReport {
    pub build: BuildInfo,
    pub cpu: CpuFeatures,
}

impl VersionReport {
    pub fn detect() -> Self {
        Self {
            build: BUILD,
            cpu: CpuFeatures::detect(),
        }
    }

    fn cpu_summary(&self) -> String {
        let mut flags = Vec::new();
        if self.cpu.avx {
            flags.push("avx");
        }
        if self.cpu.avx2 {
            flags.push("avx2");
        }
        if flags.is_empty() {
            "no vector extensions".to_string()
        } else {
            flags.join(", ")
        }
    }

    fn preferred_llama_cpp(&self) -> KnownBackend {
        self.cpu.llama_cpp_variant()
    }
}

impl fmt::Display for VersionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let build = &self.build;
        writeln!(f, "{} {}", build.name, build.full_version())?;
        writeln!(f)?;
        writeln!(f, "Build Information:")?;
        writeln!(f, "  Git Hash:   {} ({})", build.git_hash, build.git_branch)?;
        writeln!(f, "  Built:      {} ({})", build.built_at, build.profile)?;
        writeln!(f, "  Target:     {}", build.target)?;
        writeln!(f, "  Compiler:   {}", build.rustc)?;
        writeln!(f)?;
        writeln!(f, "Host:")?;
        writeln!(f, "  CPU:        {}", self.cpu_summary())?;
        writeln!(f, "  llama.cpp:  {}", self.preferred_llama_cpp().name())
    }
}

pub fn print_version() {
    print!("{}", VersionReport::detect());
}
