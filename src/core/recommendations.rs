// src/core/recommendations.rs

use std::collections::HashSet;

use crate::core::knowledge_base::{Outcome, Rule, RuleEvaluation};
use crate::core::models::Recommendation;

/// Builds the remediation list from the same evaluations the scorer used.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationEngine;

impl RecommendationEngine {
    pub fn new() -> Self {
        Self
    }

    /// One recommendation per violated rule, Critical first, catalogue order
    /// within a severity. Repeated issue keys keep their first (most severe)
    /// occurrence.
    pub fn recommend(&self, evaluations: &[RuleEvaluation<'_>]) -> Vec<Recommendation> {
        let mut violated: Vec<&Rule> = evaluations
            .iter()
            .filter(|e| e.outcome == Outcome::Violated)
            .map(|e| e.rule)
            .collect();
        // Stable, so catalogue order survives inside each tier.
        violated.sort_by_key(|rule| rule.severity);

        let mut seen = HashSet::new();
        violated
            .into_iter()
            .filter(|rule| seen.insert(rule.id.as_str()))
            .map(to_recommendation)
            .collect()
    }
}

fn to_recommendation(rule: &Rule) -> Recommendation {
    Recommendation {
        issue_key: rule.id.clone(),
        category: rule.category,
        severity: rule.severity,
        title: rule.title.clone(),
        message: rule.message.clone(),
        action: rule.action.clone(),
        impact_estimate: rule.impact,
        effort_estimate: rule.effort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::knowledge_base::Condition;
    use crate::core::models::{Category, Estimate, Severity};

    fn rule(id: &str, severity: Severity) -> Rule {
        Rule {
            id: id.to_string(),
            category: Category::Security,
            severity,
            penalty: 10,
            condition: Condition::NotHttps,
            title: format!("{id} title"),
            message: String::new(),
            action: String::new(),
            impact: Estimate::High,
            effort: Estimate::Low,
        }
    }

    #[test]
    fn orders_by_severity_and_keeps_catalogue_order() {
        let rules = [
            rule("s1", Severity::Suggested),
            rule("c1", Severity::Critical),
            rule("i1", Severity::Important),
            rule("c2", Severity::Critical),
            rule("passed", Severity::Critical),
        ];
        let evaluations: Vec<RuleEvaluation> = rules
            .iter()
            .map(|r| RuleEvaluation {
                rule: r,
                outcome: if r.id == "passed" {
                    Outcome::Passed
                } else {
                    Outcome::Violated
                },
            })
            .collect();

        let keys: Vec<String> = RecommendationEngine::new()
            .recommend(&evaluations)
            .into_iter()
            .map(|r| r.issue_key)
            .collect();
        assert_eq!(keys, vec!["c1", "c2", "i1", "s1"]);
    }

    #[test]
    fn duplicate_keys_collapse_to_most_severe() {
        let suggested = rule("dup", Severity::Suggested);
        let critical = rule("dup", Severity::Critical);
        let evaluations = [
            RuleEvaluation { rule: &suggested, outcome: Outcome::Violated },
            RuleEvaluation { rule: &critical, outcome: Outcome::Violated },
        ];
        let recommendations = RecommendationEngine::new().recommend(&evaluations);
        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].severity, Severity::Critical);
    }

    #[test]
    fn nothing_violated_means_no_recommendations() {
        let r = rule("ok", Severity::Critical);
        let evaluations = [RuleEvaluation { rule: &r, outcome: Outcome::NotApplicable }];
        assert!(RecommendationEngine::new().recommend(&evaluations).is_empty());
    }
}
