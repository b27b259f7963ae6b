//! Backend identifiers and alias resolution
//!
//! Backends are addressed by plain strings because any executable dropped
//! into the asset directory is a candidate. The ones the loader knows about
//! by name live in [`KnownBackend`].

// ─────────────────────────────────────────────────────────────────
// Known Backends
// ─────────────────────────────────────────────────────────────────

/// Backends the loader has special knowledge of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownBackend {
    LlamaGgml,
    LlamaCpp,
    LlamaCppCuda12,
    LlamaCppAvx2,
    LlamaCppAvx,
    LlamaCppFallback,
    Gpt4AllLlama,
    Gpt4AllMpt,
    Gpt4AllJ,
    Gpt4All,
    BertEmbeddings,
    Rwkv,
    Whisper,
    StableDiffusion,
    TinyDream,
    Piper,
    Huggingface,
    /// In-process vector store; never spawned by discovery
    LocalStore,
}

impl KnownBackend {
    pub fn all() -> &'static [KnownBackend] {
        &[
            KnownBackend::LlamaGgml,
            KnownBackend::LlamaCpp,
            KnownBackend::LlamaCppCuda12,
            KnownBackend::LlamaCppAvx2,
            KnownBackend::LlamaCppAvx,
            KnownBackend::LlamaCppFallback,
            KnownBackend::Gpt4AllLlama,
            KnownBackend::Gpt4AllMpt,
            KnownBackend::Gpt4AllJ,
            KnownBackend::Gpt4All,
            KnownBackend::BertEmbeddings,
            KnownBackend::Rwkv,
            KnownBackend::Whisper,
            KnownBackend::StableDiffusion,
            KnownBackend::TinyDream,
            KnownBackend::Piper,
            KnownBackend::Huggingface,
            KnownBackend::LocalStore,
        ]
    }

    /// Canonical spelling, which is also the executable file name
    pub fn name(&self) -> &'static str {
        match self {
            KnownBackend::LlamaGgml => "llama-ggml",
            KnownBackend::LlamaCpp => "llama-cpp",
            KnownBackend::LlamaCppCuda12 => "llama-cpp-cuda12",
            KnownBackend::LlamaCppAvx2 => "llama-cpp-avx2",
            KnownBackend::LlamaCppAvx => "llama-cpp-avx",
            KnownBackend::LlamaCppFallback => "llama-cpp-fallback",
            KnownBackend::Gpt4AllLlama => "gpt4all-llama",
            KnownBackend::Gpt4AllMpt => "gpt4all-mpt",
            KnownBackend::Gpt4AllJ => "gpt4all-j",
            KnownBackend::Gpt4All => "gpt4all",
            KnownBackend::BertEmbeddings => "bert-embeddings",
            KnownBackend::Rwkv => "rwkv",
            KnownBackend::Whisper => "whisper",
            KnownBackend::StableDiffusion => "stablediffusion",
            KnownBackend::TinyDream => "tinydream",
            KnownBackend::Piper => "piper",
            KnownBackend::Huggingface => "huggingface",
            KnownBackend::LocalStore => "local-store",
        }
    }

    /// Exact match on the canonical spelling
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|b| b.name() == name)
    }

    /// Whether this backend runs through the shared gpt4all executable
    pub fn is_gpt4all_family(&self) -> bool {
        matches!(
            self,
            KnownBackend::Gpt4AllLlama
                | KnownBackend::Gpt4AllMpt
                | KnownBackend::Gpt4AllJ
                | KnownBackend::Gpt4All
        )
    }
}

impl std::fmt::Display for KnownBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ─────────────────────────────────────────────────────────────────
// Aliases
// ─────────────────────────────────────────────────────────────────

/// Alternate and deprecated spellings, keyed in lowercase
static ALIASES: &[(&str, KnownBackend)] = &[
    ("go-llama", KnownBackend::LlamaCpp),
    ("llama", KnownBackend::LlamaCpp),
    ("embedded-store", KnownBackend::LocalStore),
    ("langchain-huggingface", KnownBackend::Huggingface),
];

/// Map an alternate spelling onto its canonical backend name.
///
/// Lookup ignores case. Names without an alias come back unchanged.
pub fn resolve_alias(name: &str) -> String {
    let lowered = name.to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, target)| target.name().to_string())
        .unwrap_or_else(|| name.to_string())
}
