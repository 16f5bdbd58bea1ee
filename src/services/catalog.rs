//! Provider category table
//!
//! Classifies routing providers as open-source (hosts of open-weight models)
//! or closed-source. Names not in the table are closed-source unless the
//! settings add them to the open-source list.

use std::collections::HashSet;

use crate::types::Category;

/// Providers serving open-weight models
const OPEN_SOURCE_PROVIDERS: &[&str] = &[
    "cerebras",
    "deepinfra",
    "deepseek",
    "fireworks",
    "groq",
    "huggingface",
    "hyperbolic",
    "lambda",
    "meta",
    "meta-llama",
    "mistral",
    "mistralai",
    "nebius",
    "novita",
    "nvidia",
    "qwen",
    "sambanova",
    "together",
    "togetherai",
];

/// Static category of a provider name (ASCII case-insensitive).
///
/// # Examples
/// ```
/// use routestat::services::catalog::default_category;
/// use routestat::types::Category;
///
/// assert_eq!(default_category("groq"), Category::OpenSource);
/// assert_eq!(default_category("openai"), Category::ClosedSource);
/// ```
pub fn default_category(provider: &str) -> Category {
    if OPEN_SOURCE_PROVIDERS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(provider))
    {
        Category::OpenSource
    } else {
        Category::ClosedSource
    }
}

/// Category table with configured additions
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    extra_open_source: HashSet<String>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat these providers as open-source on top of the static table
    pub fn with_open_source<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extra_open_source: providers
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Configured additions, lowercased and sorted
    pub fn extra_open_source(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extra_open_source.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn category(&self, provider: &str) -> Category {
        if self
            .extra_open_source
            .contains(&provider.to_ascii_lowercase())
        {
            return Category::OpenSource;
        }
        default_category(provider)
    }
}
