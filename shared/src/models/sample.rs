//! Sample and test result models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TransitionError;

/// Lifecycle of a registered sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Draft,
    Registered,
    Testing,
    Completed,
    Reported,
}

impl SampleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleStatus::Draft => "draft",
            SampleStatus::Registered => "registered",
            SampleStatus::Testing => "testing",
            SampleStatus::Completed => "completed",
            SampleStatus::Reported => "reported",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(SampleStatus::Draft),
            "registered" => Some(SampleStatus::Registered),
            "testing" => Some(SampleStatus::Testing),
            "completed" => Some(SampleStatus::Completed),
            "reported" => Some(SampleStatus::Reported),
            _ => None,
        }
    }

    /// Whether a sample may move from `self` to `next`
    pub fn can_transition_to(&self, next: SampleStatus) -> bool {
        use SampleStatus::*;
        matches!(
            (self, next),
            (Draft, Registered)
                | (Registered, Testing)
                | (Testing, Completed)
                | (Completed, Testing)
                | (Completed, Reported)
                | (Reported, Completed)
        )
    }

    pub fn transition(&self, next: SampleStatus) -> Result<SampleStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::new("sample", self.as_str(), next.as_str()))
        }
    }

    /// Sample details may only be edited before testing starts
    pub fn is_editable(&self) -> bool {
        matches!(self, SampleStatus::Draft | SampleStatus::Registered)
    }

    pub fn is_deletable(&self) -> bool {
        self.is_editable()
    }
}

impl std::fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single test result row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResultStatus {
    Pending,
    Completed,
}

impl TestResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestResultStatus::Pending => "pending",
            TestResultStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TestResultStatus::Pending),
            "completed" => Some(TestResultStatus::Completed),
            _ => None,
        }
    }

    /// Completed results are locked
    pub fn is_deletable(&self) -> bool {
        matches!(self, TestResultStatus::Pending)
    }
}

/// Outcome of comparing a measured value with its specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultEvaluation {
    Pass,
    Fail,
    NotApplicable,
}

impl ResultEvaluation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultEvaluation::Pass => "pass",
            ResultEvaluation::Fail => "fail",
            ResultEvaluation::NotApplicable => "not_applicable",
        }
    }
}

/// Specification limits of a test parameter (inclusive)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecLimits {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl SpecLimits {
    pub fn new(min: Option<Decimal>, max: Option<Decimal>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Limits are consistent when min does not exceed max
    pub fn is_consistent(&self) -> bool {
        match (self.min, self.max) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        }
    }

    /// Human readable specification, e.g. "0.82 - 0.85", "≤ 50", "≥ 40"
    pub fn describe(&self) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{} - {}", min, max),
            (Some(min), None) => format!("≥ {}", min),
            (None, Some(max)) => format!("≤ {}", max),
            (None, None) => "-".to_string(),
        }
    }
}

/// Evaluate a result value against its limits.
///
/// Text results (no numeric value) and parameters without limits are
/// reported as not applicable.
pub fn evaluate_result(value: Option<Decimal>, limits: &SpecLimits) -> ResultEvaluation {
    let Some(value) = value else {
        return ResultEvaluation::NotApplicable;
    };
    if limits.is_unbounded() {
        return ResultEvaluation::NotApplicable;
    }
    if let Some(min) = limits.min {
        if value < min {
            return ResultEvaluation::Fail;
        }
    }
    if let Some(max) = limits.max {
        if value > max {
            return ResultEvaluation::Fail;
        }
    }
    ResultEvaluation::Pass
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_forward_path() {
        let status = SampleStatus::Draft;
        let status = status.transition(SampleStatus::Registered).unwrap();
        let status = status.transition(SampleStatus::Testing).unwrap();
        let status = status.transition(SampleStatus::Completed).unwrap();
        let status = status.transition(SampleStatus::Reported).unwrap();
        assert_eq!(status, SampleStatus::Reported);
    }

    #[test]
    fn test_sample_retest_allowed() {
        assert!(SampleStatus::Completed.can_transition_to(SampleStatus::Testing));
    }

    #[test]
    fn test_reported_sample_reopens_for_reissue() {
        assert!(SampleStatus::Reported.can_transition_to(SampleStatus::Completed));
        assert!(!SampleStatus::Reported.is_editable());
    }

    #[test]
    fn test_sample_invalid_transitions() {
        assert!(!SampleStatus::Draft.can_transition_to(SampleStatus::Completed));
        assert!(!SampleStatus::Registered.can_transition_to(SampleStatus::Reported));
        assert!(!SampleStatus::Reported.can_transition_to(SampleStatus::Testing));
        assert!(!SampleStatus::Testing.can_transition_to(SampleStatus::Draft));
        let err = SampleStatus::Reported
            .transition(SampleStatus::Draft)
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot move sample from reported to draft");
    }

    #[test]
    fn test_sample_deletable_only_before_testing() {
        assert!(SampleStatus::Draft.is_deletable());
        assert!(SampleStatus::Registered.is_deletable());
        assert!(!SampleStatus::Testing.is_deletable());
        assert!(!SampleStatus::Completed.is_deletable());
        assert!(!SampleStatus::Reported.is_deletable());
    }

    #[test]
    fn test_completed_result_not_deletable() {
        assert!(TestResultStatus::Pending.is_deletable());
        assert!(!TestResultStatus::Completed.is_deletable());
    }

    #[test]
    fn test_evaluate_within_range() {
        let limits = SpecLimits::new(Some(Decimal::new(820, 3)), Some(Decimal::new(845, 3)));
        assert_eq!(
            evaluate_result(Some(Decimal::new(830, 3)), &limits),
            ResultEvaluation::Pass
        );
        assert_eq!(
            evaluate_result(Some(Decimal::new(820, 3)), &limits),
            ResultEvaluation::Pass
        );
        assert_eq!(
            evaluate_result(Some(Decimal::new(850, 3)), &limits),
            ResultEvaluation::Fail
        );
    }

    #[test]
    fn test_evaluate_one_sided() {
        let max_only = SpecLimits::new(None, Some(Decimal::from(50)));
        assert_eq!(
            evaluate_result(Some(Decimal::from(10)), &max_only),
            ResultEvaluation::Pass
        );
        assert_eq!(
            evaluate_result(Some(Decimal::from(51)), &max_only),
            ResultEvaluation::Fail
        );

        let min_only = SpecLimits::new(Some(Decimal::from(40)), None);
        assert_eq!(
            evaluate_result(Some(Decimal::from(39)), &min_only),
            ResultEvaluation::Fail
        );
    }

    #[test]
    fn test_evaluate_not_applicable() {
        assert_eq!(
            evaluate_result(None, &SpecLimits::new(Some(Decimal::ONE), None)),
            ResultEvaluation::NotApplicable
        );
        assert_eq!(
            evaluate_result(Some(Decimal::ONE), &SpecLimits::default()),
            ResultEvaluation::NotApplicable
        );
    }

    #[test]
    fn test_describe_limits() {
        assert_eq!(
            SpecLimits::new(Some(Decimal::from(1)), Some(Decimal::from(2))).describe(),
            "1 - 2"
        );
        assert_eq!(SpecLimits::new(None, Some(Decimal::from(50))).describe(), "≤ 50");
        assert_eq!(SpecLimits::default().describe(), "-");
    }
}
