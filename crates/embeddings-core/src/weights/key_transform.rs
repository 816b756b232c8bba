//! Parameter-name dialects.
//!
//! Model code asks for weights by canonical dotted name (for example
//! `encoder.layer.0.attention.self.query.weight`). A [`KeyTransform`] rewrites
//! that name into whatever the checkpoint on disk actually uses.

/// Rewrites a canonical parameter name into a checkpoint's naming.
pub trait KeyTransform: Send + Sync {
    /// Map one canonical name to its on-disk name.
    fn transform(&self, key: &str) -> String;
}

impl<F> KeyTransform for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn transform(&self, key: &str) -> String {
        self(key)
    }
}

/// Known checkpoint naming dialects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyDialect {
    /// Names are used as-is.
    #[default]
    Identity,
    /// Original Google BERT exports: every key under `bert.`, with layer
    /// norm parameters named `gamma`/`beta`.
    GoogleBert,
    /// Every key under a fixed prefix (e.g. `"roberta."`).
    Prefixed(String),
}

impl KeyTransform for KeyDialect {
    fn transform(&self, key: &str) -> String {
        match self {
            Self::Identity => key.to_string(),
            Self::GoogleBert => google_bert(key),
            Self::Prefixed(prefix) => format!("{prefix}{key}"),
        }
    }
}

fn google_bert(key: &str) -> String {
    let renamed = if let Some(stem) = key.strip_suffix(".LayerNorm.weight") {
        format!("{stem}.LayerNorm.gamma")
    } else if let Some(stem) = key.strip_suffix(".LayerNorm.bias") {
        format!("{stem}.LayerNorm.beta")
    } else {
        key.to_string()
    };
    format!("bert.{renamed}")
}
