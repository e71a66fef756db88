//! Approval-intent classification: converts free-form chat text into
//! `{approve, reject, clarify, unknown}` using a rule-first, model-fallback
//! hybrid.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalIntent {
    Approve,
    Reject,
    Clarify,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: ApprovalIntent,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

impl IntentResult {
    fn new(intent: ApprovalIntent, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            intent,
            confidence,
            reason: reason.into(),
            raw: None,
        }
    }
}

/// Invokes an external model to classify text against a strict JSON schema
/// `{intent, confidence, reason}`. Failures should degrade to `unknown`
/// rather than propagate.
pub trait ModelIntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> IntentResult;
}

fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

pub struct RuleBasedIntentClassifier {
    reject_patterns: Vec<Regex>,
    approve_patterns: Vec<Regex>,
    clarify_patterns: Vec<Regex>,
}

impl RuleBasedIntentClassifier {
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns.iter().map(|p| Regex::new(p).expect("static pattern")).collect()
        };
        Self {
            reject_patterns: compile(&[
                "^/reject",
                r"\breject\b",
                r"\bdecline\b",
                r"\bcancel\b",
                r"\bhold\b",
                r"\bnot\s+now\b",
                "不同意",
                "拒绝",
                "先别",
                "不要",
                "取消",
                "停止",
                "停下",
            ]),
            approve_patterns: compile(&[
                "^/approve",
                r"\bapprove(d)?\b",
                r"\bgo\s+ahead\b",
                r"\bship\s+it\b",
                r"\bok\b",
                r"\bokay\b",
                r"\blgtm\b",
                "同意",
                "通过",
                "可以开始",
                "开始吧",
                "开干",
                "没问题",
            ]),
            clarify_patterns: compile(&[r"\?", "为什么", "能不能", "是否", "请解释", "再确认"]),
        }
    }

    pub fn classify(&self, text: &str) -> IntentResult {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return IntentResult::new(ApprovalIntent::Unknown, 0.0, "empty message");
        }

        if any_match(&self.reject_patterns, &normalized) {
            return IntentResult::new(ApprovalIntent::Reject, 0.95, "matched reject pattern");
        }
        if any_match(&self.approve_patterns, &normalized) {
            return IntentResult::new(ApprovalIntent::Approve, 0.95, "matched approve pattern");
        }
        if any_match(&self.clarify_patterns, &normalized) {
            return IntentResult::new(ApprovalIntent::Clarify, 0.6, "matched clarify pattern");
        }

        IntentResult::new(ApprovalIntent::Unknown, 0.2, "no pattern matched")
    }
}

impl Default for RuleBasedIntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HybridIntentClassifier<M: ModelIntentClassifier> {
    rule: RuleBasedIntentClassifier,
    model: Option<M>,
    threshold: f64,
}

impl<M: ModelIntentClassifier> HybridIntentClassifier<M> {
    pub fn new(model: Option<M>) -> Self {
        Self {
            rule: RuleBasedIntentClassifier::new(),
            model,
            threshold: 0.8,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn classify(&self, text: &str) -> IntentResult {
        let rule_result = self.rule.classify(text);
        if rule_result.intent != ApprovalIntent::Unknown {
            return rule_result;
        }

        let Some(model) = self.model.as_ref() else {
            return rule_result;
        };

        let mut model_result = model.classify(text);
        model_result.confidence = model_result.confidence.clamp(0.0, 1.0);

        if model_result.intent != ApprovalIntent::Unknown && model_result.confidence >= self.threshold {
            return model_result;
        }

        let confidence = rule_result.confidence.max(model_result.confidence);
        IntentResult::new(
            ApprovalIntent::Unknown,
            confidence,
            "model confidence below threshold",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedModel(IntentResult);
    impl ModelIntentClassifier for FixedModel {
        fn classify(&self, _text: &str) -> IntentResult {
            IntentResult {
                intent: self.0.intent,
                confidence: self.0.confidence,
                reason: self.0.reason.clone(),
                raw: None,
            }
        }
    }

    #[test]
    fn approve_english_phrases() {
        let c = RuleBasedIntentClassifier::new();
        for text in ["LGTM", "go ahead", "ship it", "ok", "ok, approved"] {
            let result = c.classify(text);
            assert_eq!(result.intent, ApprovalIntent::Approve, "{text}");
        }
    }

    #[test]
    fn approve_chinese_phrases() {
        let c = RuleBasedIntentClassifier::new();
        for text in ["可以，开始吧", "同意", "没问题"] {
            let result = c.classify(text);
            assert_eq!(result.intent, ApprovalIntent::Approve, "{text}");
        }
    }

    #[test]
    fn reject_takes_precedence_over_accidental_approve() {
        let c = RuleBasedIntentClassifier::new();
        let result = c.classify("先别，虽然ok但是取消这个任务");
        assert_eq!(result.intent, ApprovalIntent::Reject);
    }

    #[test]
    fn clarify_on_question_mark() {
        let c = RuleBasedIntentClassifier::new();
        let result = c.classify("为什么要这样做?");
        assert_eq!(result.intent, ApprovalIntent::Clarify);
    }

    #[test]
    fn empty_text_is_unknown_zero_confidence() {
        let c = RuleBasedIntentClassifier::new();
        let result = c.classify("   ");
        assert_eq!(result.intent, ApprovalIntent::Unknown);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn hybrid_prefers_rule_when_not_unknown() {
        let model = FixedModel(IntentResult::new(ApprovalIntent::Reject, 0.99, "model says reject"));
        let hybrid = HybridIntentClassifier::new(Some(model));
        let result = hybrid.classify("同意");
        assert_eq!(result.intent, ApprovalIntent::Approve);
    }

    #[test]
    fn hybrid_falls_back_to_model_above_threshold() {
        let model = FixedModel(IntentResult::new(ApprovalIntent::Approve, 0.9, "model says approve"));
        let hybrid = HybridIntentClassifier::new(Some(model));
        let result = hybrid.classify("sounds reasonable to me");
        assert_eq!(result.intent, ApprovalIntent::Approve);
    }

    #[test]
    fn hybrid_returns_unknown_below_threshold() {
        let model = FixedModel(IntentResult::new(ApprovalIntent::Approve, 0.5, "low confidence"));
        let hybrid = HybridIntentClassifier::new(Some(model));
        let result = hybrid.classify("sounds reasonable to me");
        assert_eq!(result.intent, ApprovalIntent::Unknown);
    }
}
