//! Label resolution policy.
//!
//! Detectors disagree on spelling ("Person", "people", "mobile phone"). Every
//! detection label and every rule class goes through the same `LabelPolicy`
//! so that counting and matching see one canonical name per class.

use anyhow::{anyhow, Result};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct LabelPolicy {
    case_insensitive: bool,
    /// alias -> canonical label (both already folded).
    aliases: HashMap<String, String>,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            aliases: HashMap::new(),
        }
    }
}

impl LabelPolicy {
    /// Labels are compared exactly as reported (trimmed only).
    pub fn exact() -> Self {
        Self {
            case_insensitive: false,
            aliases: HashMap::new(),
        }
    }

    /// Build a policy from canonical labels and their aliases.
    ///
    /// An alias may map to only one canonical label, and a canonical label may
    /// not itself be an alias of another one.
    pub fn new<I, A>(case_insensitive: bool, synonyms: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, A)>,
        A: IntoIterator<Item = String>,
    {
        let mut policy = Self {
            case_insensitive,
            aliases: HashMap::new(),
        };
        let mut canonicals = Vec::new();
        for (canonical, aliases) in synonyms {
            let canonical = policy.fold(&canonical);
            if canonical.is_empty() {
                return Err(anyhow!("synonym target must not be empty"));
            }
            for alias in aliases {
                let alias = policy.fold(&alias);
                if alias.is_empty() {
                    return Err(anyhow!("empty synonym for '{}'", canonical));
                }
                if alias == canonical {
                    continue;
                }
                if let Some(existing) = policy.aliases.get(&alias) {
                    if existing != &canonical {
                        return Err(anyhow!(
                            "synonym '{}' maps to both '{}' and '{}'",
                            alias,
                            existing,
                            canonical
                        ));
                    }
                }
                policy.aliases.insert(alias, canonical.clone());
            }
            canonicals.push(canonical);
        }
        if let Some(chained) = canonicals
            .iter()
            .find(|canonical| policy.aliases.contains_key(*canonical))
        {
            return Err(anyhow!(
                "'{}' is used both as a label and as a synonym",
                chained
            ));
        }
        Ok(policy)
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Canonical label for a raw detector or rule label.
    pub fn resolve(&self, raw: &str) -> String {
        let folded = self.fold(raw);
        match self.aliases.get(&folded) {
            Some(canonical) => canonical.clone(),
            None => folded,
        }
    }

    /// Aliases that resolve to `canonical`, sorted.
    pub fn aliases_of(&self, canonical: &str) -> Vec<String> {
        let canonical = self.fold(canonical);
        let mut aliases: Vec<String> = self
            .aliases
            .iter()
            .filter(|(_, target)| **target == canonical)
            .map(|(alias, _)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }

    fn fold(&self, raw: &str) -> String {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if self.case_insensitive {
            collapsed.to_lowercase()
        } else {
            collapsed
        }
    }
}
