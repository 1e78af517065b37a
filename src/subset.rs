//! Attribute predicates for selecting a subset of points, either before the
//! join or on a join's membership.

use crate::error::{Error, Result};
use crate::types::{JoinedPoint, PointRecord};
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Clause {
    /// Text attribute matches `pattern` at its start.
    Matches { attribute: String, pattern: Regex },
    Equals { attribute: String, value: String },
    Threshold {
        attribute: String,
        comparison: Comparison,
        value: f64,
    },
}

impl Clause {
    fn test(&self, point: &PointRecord) -> bool {
        match self {
            Clause::Matches { attribute, pattern } => {
                point.text(attribute).is_some_and(|s| pattern.is_match(s))
            }
            Clause::Equals { attribute, value } => point.text(attribute) == Some(value.as_str()),
            Clause::Threshold {
                attribute,
                comparison,
                value,
            } => point
                .number(attribute)
                .is_some_and(|v| comparison.holds(v, *value)),
        }
    }
}

/// Conjunction of clauses. A record missing an attribute a clause refers to
/// fails that clause. The empty predicate accepts everything.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(mut self, attribute: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(&format!("^(?:{pattern})"))?;
        self.clauses.push(Clause::Matches {
            attribute: attribute.into(),
            pattern,
        });
        Ok(self)
    }

    pub fn equals(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.push(Clause::Equals {
            attribute: attribute.into(),
            value: value.into(),
        });
        self
    }

    pub fn threshold(mut self, attribute: impl Into<String>, comparison: Comparison, value: f64) -> Self {
        self.clauses.push(Clause::Threshold {
            attribute: attribute.into(),
            comparison,
            value,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn test(&self, point: &PointRecord) -> bool {
        self.clauses.iter().all(|clause| clause.test(point))
    }
}

/// Clause as written in configuration, e.g.
/// `{ attribute = "declared_valuation", gt = 1e6 }`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClauseConfig {
    pub attribute: String,
    pub matches: Option<String>,
    pub equals: Option<String>,
    pub gt: Option<f64>,
    pub ge: Option<f64>,
    pub lt: Option<f64>,
    pub le: Option<f64>,
}

impl Predicate {
    pub fn from_config(clauses: &[ClauseConfig]) -> Result<Self> {
        let mut predicate = Predicate::new();
        for c in clauses {
            if let Some(pattern) = &c.matches {
                predicate = predicate.matches(&c.attribute, pattern)?;
            }
            if let Some(value) = &c.equals {
                predicate = predicate.equals(&c.attribute, value);
            }
            let bounds = [
                (c.gt, Comparison::Gt),
                (c.ge, Comparison::Ge),
                (c.lt, Comparison::Lt),
                (c.le, Comparison::Le),
            ];
            for (value, comparison) in bounds {
                if let Some(value) = value {
                    predicate = predicate.threshold(&c.attribute, comparison, value);
                }
            }
        }
        Ok(predicate)
    }
}

pub fn select_subset(points: &[PointRecord], predicate: &Predicate) -> Vec<PointRecord> {
    points.iter().filter(|p| predicate.test(p)).cloned().collect()
}

/// Restricts a join's membership to the points satisfying `predicate`.
/// `joined` must come from a join over the same `points`.
pub fn select_joined(
    points: &[PointRecord],
    joined: &[JoinedPoint],
    predicate: &Predicate,
) -> Result<Vec<JoinedPoint>> {
    let mut kept = Vec::new();
    for member in joined {
        let point = points.get(member.point_index).ok_or(Error::UnknownPoint {
            index: member.point_index,
            len: points.len(),
        })?;
        if predicate.test(point) {
            kept.push(*member);
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permit(occupancy: &str, description: &str, value: f64) -> PointRecord {
        PointRecord::new(0.0, 0.0)
            .unwrap()
            .with_text("occupancytype", occupancy)
            .with_text("description", description)
            .with_number("declared_valuation", value)
    }

    fn new_residential() -> Predicate {
        Predicate::new()
            .matches("occupancytype", "(.+FAM|.unit|Mixed)")
            .unwrap()
            .matches("description", "(Addition|Erect|New construction)")
            .unwrap()
    }

    #[test]
    fn test_residential_new_construction() {
        let points = vec![
            permit("3-9FAM", "New construction", 1.0),
            permit("Mixed", "Erect", 2.0),
            permit("1-2FAM", "Electrical", 3.0),
            permit("Comm", "New construction", 4.0),
            permit("4unit", "Addition", 5.0),
            permit("Mixed", "Renovations - Interior NSC", 6.0),
        ];
        let subset = select_subset(&points, &new_residential());
        let values: Vec<f64> = subset.iter().filter_map(|p| p.number("declared_valuation")).collect();
        assert_eq!(values, vec![1.0, 2.0, 5.0]);
    }

    #[test]
    fn test_patterns_anchor_at_start() {
        let predicate = Predicate::new().matches("description", "New.+").unwrap();
        assert!(predicate.test(&permit("Comm", "New construction", 0.0)));
        assert!(!predicate.test(&permit("Comm", "Brand New tower", 0.0)));
        assert!(!predicate.test(&permit("Comm", "New", 0.0)));
    }

    #[test]
    fn test_public_investment() {
        let predicate = Predicate::new()
            .equals("description", "City of Boston")
            .threshold("declared_valuation", Comparison::Gt, 1e6);
        assert!(predicate.test(&permit("Comm", "City of Boston", 2e6)));
        assert!(!predicate.test(&permit("Comm", "City of Boston", 1e6)));
        assert!(!predicate.test(&permit("Comm", "City of Boston Parks", 2e6)));
    }

    #[test]
    fn test_missing_attribute_fails_clause() {
        let bare = PointRecord::new(1.0, 1.0).unwrap().with_number("declared_valuation", 5.0);
        assert!(!new_residential().test(&bare));
        assert!(Predicate::new().test(&bare));
        let text_threshold = Predicate::new().threshold("description", Comparison::Ge, 0.0);
        assert!(!text_threshold.test(&permit("Comm", "x", 1.0)));
    }

    #[test]
    fn test_select_joined_rejects_foreign_membership() {
        let points = vec![permit("Mixed", "Erect", 1.0), permit("Comm", "Erect", 2.0)];
        let joined = vec![
            JoinedPoint { point_index: 0, cell_index: 0 },
            JoinedPoint { point_index: 1, cell_index: 3 },
        ];
        let kept = select_joined(&points, &joined, &new_residential()).unwrap();
        assert_eq!(kept, vec![joined[0]]);

        let stale = [JoinedPoint { point_index: 2, cell_index: 0 }];
        let err = select_joined(&points, &stale, &new_residential()).unwrap_err();
        assert!(matches!(err, Error::UnknownPoint { index: 2, len: 2 }));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Predicate::new().matches("description", "(unclosed").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(_)));
    }

    #[test]
    fn test_from_config() {
        let clauses = vec![
            ClauseConfig {
                attribute: "occupancytype".into(),
                equals: Some("Comm".into()),
                ..Default::default()
            },
            ClauseConfig {
                attribute: "declared_valuation".into(),
                gt: Some(1e6),
                le: Some(5e6),
                ..Default::default()
            },
        ];
        let predicate = Predicate::from_config(&clauses).unwrap();
        assert!(predicate.test(&permit("Comm", "", 2e6)));
        assert!(!predicate.test(&permit("Comm", "", 6e6)));
        assert!(!predicate.test(&permit("Mixed", "", 2e6)));
    }
}
