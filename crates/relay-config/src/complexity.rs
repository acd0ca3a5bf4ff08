//! Keyword and pattern data for complexity scoring.
//!
//! The analyzer in `relay-router` only knows how to score; what counts as a
//! "complex" request is data. The defaults are bilingual (English and
//! Portuguese) because the deployments this router grew out of served both.

use serde::{Deserialize, Serialize};

/// Terms whose presence raises the output-size estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTrigger {
    /// Any of these (lowercase) substrings fires the trigger.
    pub terms: Vec<String>,
    /// Tokens added to the estimate when fired.
    pub tokens: u32,
}

impl OutputTrigger {
    fn new(terms: &[&str], tokens: u32) -> Self {
        Self {
            terms: to_strings(terms),
            tokens,
        }
    }
}

/// Injected configuration for the complexity analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityProfile {
    /// Keywords worth 8 points each.
    pub high_keywords: Vec<String>,
    /// Keywords worth 4 points each.
    pub medium_keywords: Vec<String>,
    /// Regular expressions worth 15 points each.
    pub high_patterns: Vec<String>,
    /// Output-size estimate boosts.
    pub output_triggers: Vec<OutputTrigger>,
}

impl Default for ComplexityProfile {
    fn default() -> Self {
        Self {
            high_keywords: to_strings(DEFAULT_HIGH_KEYWORDS),
            medium_keywords: to_strings(DEFAULT_MEDIUM_KEYWORDS),
            high_patterns: to_strings(DEFAULT_HIGH_PATTERNS),
            output_triggers: vec![
                OutputTrigger::new(&["complete", "completo"], 3000),
                OutputTrigger::new(&["system", "sistema"], 2000),
                OutputTrigger::new(&["documentation", "documentação"], 2000),
                OutputTrigger::new(&["all", "todos"], 1500),
                OutputTrigger::new(&["analysis", "análise"], 1000),
            ],
        }
    }
}

impl ComplexityProfile {
    /// A profile with no keywords, patterns or triggers.
    ///
    /// Only the length component contributes to the score.
    pub fn empty() -> Self {
        Self {
            high_keywords: Vec::new(),
            medium_keywords: Vec::new(),
            high_patterns: Vec::new(),
            output_triggers: Vec::new(),
        }
    }

    pub fn with_high_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.high_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_medium_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.medium_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_high_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.high_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

const DEFAULT_HIGH_KEYWORDS: &[&str] = &[
    // Scope
    "completo",
    "complete",
    "sistema",
    "system",
    "aplicação",
    "application",
    "projeto",
    "project",
    "arquitetura",
    "architecture",
    "infraestrutura",
    "infrastructure",
    // Multiplicity
    "multi",
    "múltiplos",
    "multiple",
    "vários",
    "various",
    "todos",
    "all",
    // Integration
    "frontend e backend",
    "full stack",
    "fullstack",
    "end-to-end",
    "e2e",
    "integração",
    "integration",
    "microsserviço",
    "microservice",
    "orquestração",
    "orchestration",
    "pipeline",
    "workflow",
    "gateway",
    "pagamento",
    "payment",
    "autenticação",
    "authentication",
    // Investigation
    "análise completa",
    "deep analysis",
    "troubleshooting",
    "debug",
    "investigação",
    "investigation",
    "diagnóstico",
    "diagnostic",
    // Documentation
    "documentação completa",
    "complete documentation",
    "manual",
    "guia completo",
    "especificação",
    "specification",
    "detalhado",
    "detailed",
    // Large rewrites
    "refatorar tudo",
    "refactor all",
    "reescrever",
    "rewrite",
    "migrar",
    "migrate",
    // Log analysis
    "todos os logs",
    "all logs",
    "histórico completo",
    "full history",
    "análise de logs",
    "log analysis",
    // Operations
    "ci/cd",
    "docker",
    "kubernetes",
    "deploy",
    "deployment",
];

const DEFAULT_MEDIUM_KEYWORDS: &[&str] = &[
    "api",
    "endpoint",
    "serviço",
    "service",
    "módulo",
    "module",
    "componente",
    "component",
    "feature",
    "funcionalidade",
    "crud",
    "rest",
    "graphql",
    "banco de dados",
    "database",
];

const DEFAULT_HIGH_PATTERNS: &[&str] = &[
    r"\b\d+\+?\s*(arquivos|files|componentes|components|módulos|modules)\b",
    r"\b(criar|create|desenvolver|develop|implementar|implement)\s+(um|uma|a)\s+sistema\b",
    r"\b(backend|frontend)\s+(e|and)\s+(frontend|backend)\b",
    r"\b(com|with)\s+\d+\+?\s+(funcionalidades|features|endpoints)\b",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_populated() {
        let profile = ComplexityProfile::default();
        assert!(profile.high_keywords.contains(&"kubernetes".to_string()));
        assert!(profile.medium_keywords.contains(&"graphql".to_string()));
        assert_eq!(profile.high_patterns.len(), 4);
        assert_eq!(profile.output_triggers.len(), 5);
    }

    #[test]
    fn test_keywords_are_lowercase() {
        let profile = ComplexityProfile::default();
        for kw in profile.high_keywords.iter().chain(&profile.medium_keywords) {
            assert_eq!(kw, &kw.to_lowercase(), "keyword {kw:?} must be lowercase");
        }
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let profile: ComplexityProfile =
            serde_yaml::from_str("high_keywords: [\"terraform\"]\n").unwrap();
        assert_eq!(profile.high_keywords, vec!["terraform".to_string()]);
        assert_eq!(profile.medium_keywords, ComplexityProfile::default().medium_keywords);
    }
}
