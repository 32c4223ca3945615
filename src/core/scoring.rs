// src/core/scoring.rs

//! Turns rule evaluations into category scores, an overall score and a grade.
//!
//! Every category starts at 100 and loses the penalty of each violated rule
//! filed under it. Penalties are never negative, so an extra violation can
//! only keep a score where it is or lower it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;

use crate::core::error::{Error, Result};
use crate::core::knowledge_base::{Outcome, RuleEvaluation};
use crate::core::models::{Category, Grade};

const MAX_SCORE: u32 = 100;

/// Relative weight of each category in the overall score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub security: f64,
    pub email: f64,
    pub reputation: f64,
    pub seo: f64,
    pub performance: f64,
    pub technical: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            security: 0.25,
            email: 0.15,
            reputation: 0.15,
            seo: 0.20,
            performance: 0.15,
            technical: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn weight(&self, category: Category) -> f64 {
        match category {
            Category::Security => self.security,
            Category::Email => self.email,
            Category::Reputation => self.reputation,
            Category::Seo => self.seo,
            Category::Performance => self.performance,
            Category::Technical => self.technical,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut total = 0.0;
        for category in Category::iter() {
            let weight = self.weight(category);
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::Config(format!(
                    "scoring weight for {category} must be a non-negative number"
                )));
            }
            total += weight;
        }
        if total <= 0.0 {
            return Err(Error::Config("scoring weights must not all be zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeThreshold {
    pub grade: Grade,
    pub min_score: u8,
}

/// Ordered grade thresholds, best grade first. Scores below the last
/// threshold get an F.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GradeTable(Vec<GradeThreshold>);

impl Default for GradeTable {
    fn default() -> Self {
        Self(vec![
            GradeThreshold { grade: Grade::A, min_score: 90 },
            GradeThreshold { grade: Grade::B, min_score: 80 },
            GradeThreshold { grade: Grade::C, min_score: 70 },
            GradeThreshold { grade: Grade::D, min_score: 60 },
        ])
    }
}

impl GradeTable {
    pub fn new(thresholds: Vec<GradeThreshold>) -> Result<Self> {
        let table = Self(thresholds);
        table.validate()?;
        Ok(table)
    }

    /// Thresholds and grades must both strictly descend, which keeps the
    /// lookup monotonic.
    pub fn validate(&self) -> Result<()> {
        for pair in self.0.windows(2) {
            if pair[1].min_score >= pair[0].min_score {
                return Err(Error::Config(format!(
                    "grade thresholds must strictly descend ({} then {})",
                    pair[0].min_score, pair[1].min_score
                )));
            }
            if pair[1].grade <= pair[0].grade {
                return Err(Error::Config(format!(
                    "grades must be listed best first ({} then {})",
                    pair[0].grade, pair[1].grade
                )));
            }
        }
        if self.0.iter().any(|t| t.min_score > 100) {
            return Err(Error::Config("grade thresholds must be within 0..=100".into()));
        }
        Ok(())
    }

    pub fn grade_for(&self, score: u8) -> Grade {
        self.0
            .iter()
            .find(|t| score >= t.min_score)
            .map_or(Grade::F, |t| t.grade)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreCard {
    pub category_scores: BTreeMap<Category, u8>,
    pub overall: u8,
    pub grade: Grade,
}

#[derive(Debug, Clone, Default)]
pub struct Scorer {
    weights: ScoringWeights,
    grades: GradeTable,
}

impl Scorer {
    pub fn new(weights: ScoringWeights, grades: GradeTable) -> Self {
        Self { weights, grades }
    }

    pub fn score(&self, evaluations: &[RuleEvaluation<'_>]) -> ScoreCard {
        let category_scores = self.category_scores(evaluations);
        let overall = self.overall(&category_scores);
        ScoreCard {
            grade: self.grades.grade_for(overall),
            category_scores,
            overall,
        }
    }

    /// Every category is present in the result, even with no rules.
    pub fn category_scores(&self, evaluations: &[RuleEvaluation<'_>]) -> BTreeMap<Category, u8> {
        let mut penalties: BTreeMap<Category, u32> = Category::iter().map(|c| (c, 0)).collect();
        for evaluation in evaluations {
            if evaluation.outcome == Outcome::Violated {
                *penalties.entry(evaluation.rule.category).or_default() += evaluation.rule.penalty;
            }
        }
        penalties
            .into_iter()
            .map(|(category, penalty)| {
                let score = MAX_SCORE.saturating_sub(penalty);
                (category, u8::try_from(score).unwrap_or(100))
            })
            .collect()
    }

    /// Weighted mean of the category scores, rounded to the nearest integer.
    pub fn overall(&self, category_scores: &BTreeMap<Category, u8>) -> u8 {
        let (weighted, total) = category_scores.iter().fold(
            (0.0_f64, 0.0_f64),
            |(weighted, total), (category, score)| {
                let weight = self.weights.weight(*category);
                (weighted + weight * f64::from(*score), total + weight)
            },
        );
        if total <= 0.0 {
            return 0;
        }
        (weighted / total).round().clamp(0.0, 100.0) as u8
    }

    pub fn grade_for(&self, score: u8) -> Grade {
        self.grades.grade_for(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::knowledge_base::{Condition, Rule};
    use crate::core::models::{Estimate, Severity};

    fn rule(id: &str, category: Category, severity: Severity, penalty: u32) -> Rule {
        Rule {
            id: id.to_string(),
            category,
            severity,
            penalty,
            condition: Condition::DmarcMissing,
            title: id.to_string(),
            message: String::new(),
            action: String::new(),
            impact: Estimate::Medium,
            effort: Estimate::Low,
        }
    }

    #[test]
    fn grade_mapping_uses_thresholds() {
        let scorer = Scorer::default();
        assert_eq!(scorer.grade_for(95), Grade::A);
        assert_eq!(scorer.grade_for(90), Grade::A);
        assert_eq!(scorer.grade_for(89), Grade::B);
        assert_eq!(scorer.grade_for(72), Grade::C);
        assert_eq!(scorer.grade_for(60), Grade::D);
        assert_eq!(scorer.grade_for(40), Grade::F);
        assert_eq!(scorer.grade_for(0), Grade::F);
    }

    #[test]
    fn grade_is_monotonic_in_score() {
        let scorer = Scorer::default();
        let mut previous = scorer.grade_for(0);
        for score in 1..=100u8 {
            let grade = scorer.grade_for(score);
            assert!(grade <= previous, "grade got worse at {score}");
            previous = grade;
        }
    }

    #[test]
    fn penalties_are_clipped_at_zero() {
        let heavy = rule("a", Category::Security, Severity::Critical, 80);
        let heavier = rule("b", Category::Security, Severity::Critical, 80);
        let evaluations = vec![
            RuleEvaluation { rule: &heavy, outcome: Outcome::Violated },
            RuleEvaluation { rule: &heavier, outcome: Outcome::Violated },
        ];
        let scores = Scorer::default().category_scores(&evaluations);
        assert_eq!(scores[&Category::Security], 0);
        assert_eq!(scores[&Category::Seo], 100);
        assert_eq!(scores.len(), Category::iter().count());
    }

    #[test]
    fn adding_a_critical_violation_never_raises_the_score() {
        let minor = rule("minor", Category::Seo, Severity::Suggested, 5);
        let critical = rule("critical", Category::Email, Severity::Critical, 35);
        let scorer = Scorer::default();

        let before = scorer.score(&[
            RuleEvaluation { rule: &minor, outcome: Outcome::Violated },
            RuleEvaluation { rule: &critical, outcome: Outcome::Passed },
        ]);
        let after = scorer.score(&[
            RuleEvaluation { rule: &minor, outcome: Outcome::Violated },
            RuleEvaluation { rule: &critical, outcome: Outcome::Violated },
        ]);
        assert!(after.overall < before.overall);
        assert!(after.grade >= before.grade);
    }

    #[test]
    fn not_applicable_rules_cost_nothing() {
        let critical = rule("c", Category::Reputation, Severity::Critical, 50);
        let card = Scorer::default().score(&[RuleEvaluation {
            rule: &critical,
            outcome: Outcome::NotApplicable,
        }]);
        assert_eq!(card.overall, 100);
        assert_eq!(card.grade, Grade::A);
    }

    #[test]
    fn overall_is_weighted_mean() {
        let weights = ScoringWeights {
            security: 1.0,
            email: 0.0,
            reputation: 0.0,
            seo: 1.0,
            performance: 0.0,
            technical: 0.0,
        };
        let scorer = Scorer::new(weights, GradeTable::default());
        let mut scores: BTreeMap<Category, u8> = Category::iter().map(|c| (c, 0)).collect();
        scores.insert(Category::Security, 90);
        scores.insert(Category::Seo, 71);
        assert_eq!(scorer.overall(&scores), 81);
    }

    #[test]
    fn rejects_unordered_grade_tables() {
        let table = GradeTable::new(vec![
            GradeThreshold { grade: Grade::A, min_score: 80 },
            GradeThreshold { grade: Grade::B, min_score: 85 },
        ]);
        assert!(table.is_err());

        let swapped = GradeTable::new(vec![
            GradeThreshold { grade: Grade::B, min_score: 90 },
            GradeThreshold { grade: Grade::A, min_score: 80 },
        ]);
        assert!(swapped.is_err());
    }

    #[test]
    fn rejects_negative_weights() {
        let weights = ScoringWeights {
            seo: -1.0,
            ..ScoringWeights::default()
        };
        assert!(weights.validate().is_err());
    }
}
