//! Prompt complexity scoring.
//!
//! [`ComplexityAnalyzer`] turns a message list into a 0–100 score using four
//! additive components, each with its own cap:
//!
//! | Component | Points | Cap |
//! |-----------|--------|-----|
//! | Length (chars) | >1500: 40, >800: 30, >400: 20, >200: 15 | 40 |
//! | High-complexity keywords | 8 per distinct match | 50 |
//! | Medium-complexity keywords | 4 per distinct match | 20 |
//! | High-complexity patterns | 15 per matching pattern | 45 |
//!
//! The score picks a level, a model tier and a timeout:
//!
//! - `score >= 45` → high: capable model, long timeout
//! - `score >= 25` → medium: capable model only if the output estimate
//!   exceeds 4000 tokens or the score exceeds 35, otherwise cheap
//! - otherwise → low: cheap model, short timeout
//!
//! Analysis is pure: no I/O, no clock, same input gives the same result.

use std::time::Duration;

use regex::Regex;
use relay_config::{ComplexityProfile, ModelMap, OutputTrigger, RelayConfig, TimeoutSettings};
use relay_core::{ComplexityLevel, Message, ModelTier, RelayError, Result};
use serde::Serialize;

const HIGH_KEYWORD_POINTS: u32 = 8;
const HIGH_KEYWORD_CAP: u32 = 50;
const MEDIUM_KEYWORD_POINTS: u32 = 4;
const MEDIUM_KEYWORD_CAP: u32 = 20;
const PATTERN_POINTS: u32 = 15;
const PATTERN_CAP: u32 = 45;
const MAX_SCORE: u32 = 100;

const HIGH_THRESHOLD: u32 = 45;
const MEDIUM_THRESHOLD: u32 = 25;
const MEDIUM_CAPABLE_SCORE: u32 = 35;
const MEDIUM_CAPABLE_TOKENS: u32 = 4000;

const BASE_OUTPUT_TOKENS: u32 = 1000;

/// Matched keywords kept per list in the analysis.
const MAX_REPORTED_KEYWORDS: usize = 5;

/// Result of analyzing one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityAnalysis {
    pub level: ComplexityLevel,
    /// 0..=100
    pub score: u32,
    pub estimated_output_tokens: u32,
    pub recommended_tier: ModelTier,
    pub recommended_model: String,
    pub recommended_timeout_secs: u64,
    /// Human-readable scoring reasons, in evaluation order.
    pub reasons: Vec<String>,
    pub matched_high_keywords: Vec<String>,
    pub matched_medium_keywords: Vec<String>,
}

impl ComplexityAnalysis {
    pub fn recommended_timeout(&self) -> Duration {
        Duration::from_secs(self.recommended_timeout_secs)
    }
}

/// Heuristic complexity scorer.
#[derive(Debug, Clone)]
pub struct ComplexityAnalyzer {
    high_keywords: Vec<String>,
    medium_keywords: Vec<String>,
    patterns: Vec<Regex>,
    output_triggers: Vec<OutputTrigger>,
    models: ModelMap,
    timeouts: TimeoutSettings,
}

impl ComplexityAnalyzer {
    /// Build an analyzer from a keyword profile.
    ///
    /// `models` supplies the concrete names for the recommended tier.
    /// Fails if any pattern does not compile.
    pub fn new(
        profile: &ComplexityProfile,
        models: ModelMap,
        timeouts: TimeoutSettings,
    ) -> Result<Self> {
        let patterns = profile
            .high_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| RelayError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            high_keywords: normalize_keywords(&profile.high_keywords),
            medium_keywords: normalize_keywords(&profile.medium_keywords),
            patterns,
            output_triggers: profile.output_triggers.clone(),
            models,
            timeouts,
        })
    }

    /// Analyzer for the primary provider of `config`.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::new(
            &config.complexity,
            config.primary.models.clone(),
            config.timeouts.clone(),
        )
    }

    /// Analyze a message list; contents are joined with single spaces.
    pub fn analyze(&self, messages: &[Message]) -> ComplexityAnalysis {
        let text = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.analyze_text(&text)
    }

    /// Analyze raw prompt text.
    pub fn analyze_text(&self, text: &str) -> ComplexityAnalysis {
        let lower = text.to_lowercase();
        let length = text.chars().count();
        let mut reasons = Vec::new();
        let mut score = 0;

        let length_points = length_points(length);
        if length_points > 0 {
            score += length_points;
            reasons.push(format!("long prompt ({length} chars)"));
        }

        let high = matched(&self.high_keywords, &lower);
        if !high.is_empty() {
            score += (high.len() as u32 * HIGH_KEYWORD_POINTS).min(HIGH_KEYWORD_CAP);
            reasons.push(format!(
                "high-complexity keywords: {}",
                preview(&high).join(", ")
            ));
        }

        let medium = matched(&self.medium_keywords, &lower);
        if !medium.is_empty() {
            score += (medium.len() as u32 * MEDIUM_KEYWORD_POINTS).min(MEDIUM_KEYWORD_CAP);
            reasons.push(format!(
                "medium-complexity keywords: {}",
                preview(&medium).join(", ")
            ));
        }

        let patterns = self.patterns.iter().filter(|p| p.is_match(&lower)).count() as u32;
        if patterns > 0 {
            score += (patterns * PATTERN_POINTS).min(PATTERN_CAP);
            reasons.push(format!("complex patterns matched: {patterns}"));
        }

        let score = score.min(MAX_SCORE);
        let estimated_output_tokens = self.estimate_output_tokens(&lower, length);

        let (level, tier) = if score >= HIGH_THRESHOLD {
            (ComplexityLevel::High, ModelTier::Capable)
        } else if score >= MEDIUM_THRESHOLD {
            let tier = if estimated_output_tokens > MEDIUM_CAPABLE_TOKENS
                || score > MEDIUM_CAPABLE_SCORE
            {
                ModelTier::Capable
            } else {
                ModelTier::Cheap
            };
            (ComplexityLevel::Medium, tier)
        } else {
            (ComplexityLevel::Low, ModelTier::Cheap)
        };

        ComplexityAnalysis {
            level,
            score,
            estimated_output_tokens,
            recommended_tier: tier,
            recommended_model: self.models.get(tier).to_string(),
            recommended_timeout_secs: self.timeouts.for_level(level).as_secs(),
            reasons,
            matched_high_keywords: preview(&high),
            matched_medium_keywords: preview(&medium),
        }
    }

    fn estimate_output_tokens(&self, lower: &str, length: usize) -> u32 {
        let boost: u32 = self
            .output_triggers
            .iter()
            .filter(|t| t.terms.iter().any(|term| lower.contains(&term.to_lowercase())))
            .map(|t| t.tokens)
            .sum();
        let length_tokens = u32::try_from(length / 2).unwrap_or(u32::MAX);
        BASE_OUTPUT_TOKENS
            .saturating_add(boost)
            .saturating_add(length_tokens)
    }
}

fn length_points(length: usize) -> u32 {
    match length {
        n if n > 1500 => 40,
        n if n > 800 => 30,
        n if n > 400 => 20,
        n if n > 200 => 15,
        _ => 0,
    }
}

/// Lowercase and drop duplicates, keeping first-seen order.
fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keywords.len());
    for kw in keywords {
        let kw = kw.trim().to_lowercase();
        if !kw.is_empty() && !out.contains(&kw) {
            out.push(kw);
        }
    }
    out
}

fn matched<'a>(keywords: &'a [String], lower: &str) -> Vec<&'a str> {
    keywords
        .iter()
        .filter(|kw| lower.contains(kw.as_str()))
        .map(String::as_str)
        .collect()
}

fn preview(keywords: &[&str]) -> Vec<String> {
    keywords
        .iter()
        .take(MAX_REPORTED_KEYWORDS)
        .map(|kw| (*kw).to_string())
        .collect()
}
