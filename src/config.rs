//! Compiler configuration, loaded from an embedding host's TOML config the
//! same way `atlas-config` loads its sections: every field optional, unknown
//! keys rejected so a typo surfaces immediately instead of silently no-op'ing.

use serde::{Deserialize, Serialize};

/// Tunables for one compilation run. All fields are optional; omitted fields
/// fall back to [`CompilerConfig::default`]'s values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerConfig {
    /// Maximum nested-`compile_value` depth before `RecursionTooDeep`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursion_limit: Option<u32>,

    /// Whether structurally-equal literals share one literal-pool slot.
    /// Disabling this is occasionally useful for diffing disassembly across
    /// runs where pool sharing would otherwise obscure which call site a
    /// literal came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_literals: Option<bool>,
}

impl CompilerConfig {
    pub const DEFAULT_RECURSION_LIMIT: u32 = 200;

    pub fn recursion_limit(&self) -> u32 {
        self.recursion_limit.unwrap_or(Self::DEFAULT_RECURSION_LIMIT)
    }

    pub fn dedupe_literals(&self) -> bool {
        self.dedupe_literals.unwrap_or(true)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            recursion_limit: None,
            dedupe_literals: None,
        }
    }
}
