//! Reasoning backend identities.
//!
//! The set of backends is closed: every backend the runtime can talk to is a
//! variant here, and the fallback table is a static function of the variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raised when a provider name does not match any known backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown provider '{0}'. Expected one of: openai, gemini, claude")]
pub struct UnknownProvider(pub String);

/// A remote reasoning backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI Responses API
    #[serde(rename = "openai")]
    OpenAi,

    /// Google Gemini
    Gemini,

    /// Anthropic Claude
    Claude,
}

impl ProviderKind {
    /// All known backends, in a stable order.
    pub const ALL: [ProviderKind; 3] = [ProviderKind::OpenAi, ProviderKind::Gemini, ProviderKind::Claude];

    /// Backend substituted for this one after repeated transient failure.
    ///
    /// `openai -> gemini`, `claude -> gemini`, `gemini -> none`.
    pub const fn fallback(self) -> Option<ProviderKind> {
        match self {
            ProviderKind::OpenAi => Some(ProviderKind::Gemini),
            ProviderKind::Claude => Some(ProviderKind::Gemini),
            ProviderKind::Gemini => None,
        }
    }

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Which backends a document evaluation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EvaluationMode {
    /// Primary and secondary in parallel, merged per requirement
    Dual,

    /// One backend only
    Single(ProviderKind),
}

impl Default for EvaluationMode {
    fn default() -> Self {
        EvaluationMode::Single(ProviderKind::OpenAi)
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationMode::Dual => f.write_str("dual"),
            EvaluationMode::Single(kind) => kind.fmt(f),
        }
    }
}

impl FromStr for EvaluationMode {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dual" | "both" => Ok(EvaluationMode::Dual),
            _ => s.parse().map(EvaluationMode::Single),
        }
    }
}

impl TryFrom<String> for EvaluationMode {
    type Error = UnknownProvider;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EvaluationMode> for String {
    fn from(mode: EvaluationMode) -> Self {
        mode.to_string()
    }
}
