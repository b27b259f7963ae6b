//! CPU feature detection and llama.cpp variant selection

use tracing::info;

use super::KnownBackend;

/// SIMD features that decide which llama.cpp build to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub avx: bool,
    pub avx2: bool,
}

impl CpuFeatures {
    /// Detect features of the running CPU
    pub fn detect() -> Self {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            Self {
                avx: is_x86_feature_detected!("avx"),
                avx2: is_x86_feature_detected!("avx2"),
            }
        }

        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            Self::default()
        }
    }

    /// The llama.cpp build matching these features
    pub fn llama_cpp_variant(&self) -> KnownBackend {
        if self.avx2 {
            KnownBackend::LlamaCppAvx2
        } else if self.avx {
            KnownBackend::LlamaCppAvx
        } else {
            KnownBackend::LlamaCppFallback
        }
    }
}

/// Replace every generic `llama-cpp` candidate with its CPU-specific build
pub fn select_cpu_variants(candidates: &mut [String], features: CpuFeatures) {
    let variant = features.llama_cpp_variant();
    for candidate in candidates.iter_mut() {
        if candidate == KnownBackend::LlamaCpp.name() {
            *candidate = variant.name().to_string();
            info!(backend = %variant, avx = features.avx, avx2 = features.avx2, "Selected CPU variant");
        }
    }
}
