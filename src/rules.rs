// 🏷️ Mapping Rules - Rules as Data
// Prioritized pattern matching that turns free-text supply labels and region
// codes into canonical names.

use crate::error::{EngineError, Result};
use anyhow::Context as AnyhowContext;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Canonical label for input that is empty after trimming
pub const UNLABELED: &str = "NAO INFORMADO";

const BUILTIN_LABEL_RULES: &str = include_str!("../data/mappings.json");

pub const UF_CODES: [&str; 27] = [
    "AC", "AL", "AM", "AP", "BA", "CE", "DF", "ES", "GO", "MA", "MG", "MS", "MT", "PA", "PB",
    "PE", "PI", "PR", "RJ", "RN", "RO", "RR", "RS", "SC", "SE", "SP", "TO",
];

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    #[default]
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    /// Canonical name assigned on match
    #[serde(alias = "vacina_normalizada")]
    pub canonical_name: String,

    /// Regular expression, matched case-insensitively anywhere in the label
    pub pattern: String,

    #[serde(default)]
    pub pattern_kind: PatternKind,

    /// Priority (lower = applied first)
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    100
}

impl MappingRule {
    pub fn new(canonical_name: &str, pattern: &str, priority: i32) -> Self {
        MappingRule {
            canonical_name: canonical_name.to_string(),
            pattern: pattern.to_string(),
            pattern_kind: PatternKind::Regex,
            priority,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    /// Lower-cased literal, used when the pattern is not a valid regex
    Literal(String),
}

impl Matcher {
    fn compile(rule: &MappingRule) -> Matcher {
        match rule.pattern_kind {
            PatternKind::Regex => match RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => Matcher::Regex(re),
                Err(e) => {
                    warn!(
                        canonical = %rule.canonical_name,
                        pattern = %rule.pattern,
                        "Pattern is not a valid regex, matching as literal: {}",
                        e
                    );
                    Matcher::Literal(rule.pattern.to_lowercase())
                }
            },
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(text),
            Matcher::Literal(needle) => text.to_lowercase().contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: MappingRule,
    matcher: Matcher,
}

// ============================================================================
// RULE SET
// ============================================================================

/// Ordered, compiled rule list. Never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Build from rules in registration order. Ties in priority keep that order.
    pub fn from_rules(mut rules: Vec<MappingRule>) -> Result<Self> {
        for rule in &rules {
            if rule.canonical_name.trim().is_empty() {
                return Err(EngineError::InvalidRule {
                    canonical_name: rule.canonical_name.clone(),
                    reason: format!("empty canonical name for pattern {:?}", rule.pattern),
                });
            }
            if rule.pattern.is_empty() {
                return Err(EngineError::InvalidRule {
                    canonical_name: rule.canonical_name.clone(),
                    reason: "empty pattern".to_string(),
                });
            }
        }

        // sort_by_key is stable
        rules.sort_by_key(|r| r.priority);

        let rules = rules
            .into_iter()
            .map(|rule| CompiledRule {
                matcher: Matcher::compile(&rule),
                rule,
            })
            .collect();

        Ok(RuleSet { rules })
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let rules: Vec<MappingRule> =
            serde_json::from_str(content).context("Failed to parse mapping rules JSON")?;
        Ok(RuleSet::from_rules(rules)?)
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read mapping rules file: {:?}", path.as_ref()))?;
        RuleSet::from_json(&content)
    }

    /// Rules shipped with the crate for vaccine labels
    pub fn builtin_labels() -> Self {
        match RuleSet::from_json(BUILTIN_LABEL_RULES) {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Built-in mapping rules rejected, labels will pass through: {:#}", e);
                RuleSet::default()
            }
        }
    }

    /// One rule per UF, matching the code as the trailing token
    pub fn builtin_regions() -> Self {
        let rules = UF_CODES
            .iter()
            .map(|uf| MappingRule::new(uf, &format!(r"(?:^|[^A-Z]){}\s*$", uf), 10))
            .collect();
        RuleSet::from_rules(rules).unwrap_or_default()
    }

    /// First matching rule in priority order
    pub fn classify(&self, text: &str) -> Option<&MappingRule> {
        self.rules
            .iter()
            .find(|compiled| compiled.matcher.is_match(text))
            .map(|compiled| &compiled.rule)
    }

    /// Distinct canonical names, sorted
    pub fn canonical_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .rules
            .iter()
            .map(|c| c.rule.canonical_name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn rules(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Trimmed, whitespace-collapsed label; never empty
pub fn passthrough(raw_label: &str) -> String {
    let collapsed = raw_label.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        UNLABELED.to_string()
    } else {
        collapsed
    }
}

/// Canonical name of the first matching rule, or the passthrough label
pub fn normalize(raw_label: &str, rule_set: &RuleSet) -> String {
    normalize_or(raw_label, rule_set, |_| None)
}

/// `normalize` with a second chance before passing the label through
fn normalize_or<'a>(
    raw_label: &str,
    rule_set: &'a RuleSet,
    rematch: impl FnOnce(&str) -> Option<&'a MappingRule>,
) -> String {
    match rule_set.classify(raw_label).or_else(|| rematch(raw_label)) {
        Some(rule) => rule.canonical_name.clone(),
        None => {
            debug!(label = raw_label, "No mapping rule matched, passing label through");
            passthrough(raw_label)
        }
    }
}

static DILUENT_VACCINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"VACINA(?:\s*(?:P/|PARA|CONTRA)\s*)?(.*)$").expect("diluent pattern is a valid regex")
});

/// Vaccine name a diluent label refers to, e.g. "DILUENTE P/VACINA BCG" -> "BCG"
fn diluent_target(label: &str) -> Option<String> {
    let upper = label.to_uppercase();
    if !upper.contains("DILUENTE") {
        return None;
    }

    let after_vacina = DILUENT_VACCINE
        .captures(&upper)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let candidate = match after_vacina {
        Some(rest) => rest,
        None => upper
            .split_once("DILUENTE")
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_default(),
    };

    let cleaned: String = candidate
        .chars()
        .filter(|c| !matches!(c, '-' | '(' | ')' | ',') && !c.is_ascii_digit())
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Strip the SES prefix some sources put in front of the UF code
fn clean_region(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    match upper.strip_prefix("SES") {
        Some(rest) if rest.is_empty() || rest.starts_with(['-', ' ', '.', '/']) => rest
            .trim_start_matches(['-', ' ', '.', '/'])
            .to_string(),
        _ => upper,
    }
}

/// Label and region normalizers built from one consistent pair of rule sets
#[derive(Debug, Clone)]
pub struct Normalizer {
    labels: RuleSet,
    regions: RuleSet,
}

impl Normalizer {
    pub fn new(labels: RuleSet, regions: RuleSet) -> Self {
        Normalizer { labels, regions }
    }

    pub fn builtin() -> Self {
        Normalizer::new(RuleSet::builtin_labels(), RuleSet::builtin_regions())
    }

    pub fn labels(&self) -> &RuleSet {
        &self.labels
    }

    /// Normalize a supply label. Diluents are re-matched on the vaccine they name.
    pub fn normalize_label(&self, raw_label: &str) -> String {
        normalize_or(raw_label, &self.labels, |raw| {
            let rule = self.labels.classify(&diluent_target(raw)?)?;
            debug!(label = raw, canonical = %rule.canonical_name, "Diluent mapped to vaccine");
            Some(rule)
        })
    }

    /// Normalize a region code such as "SES-PR" to "PR"
    pub fn normalize_region(&self, raw_region: &str) -> String {
        normalize(&clean_region(raw_region), &self.regions)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// TESTS
// ============================================================================
