//! Report (Certificate of Analysis) models

use serde::{Deserialize, Serialize};

use super::TransitionError;

/// Authentication workflow of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    Review,
    Approved,
    Published,
    /// Replaced by a later revision of the same sample's report
    Superseded,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Review => "review",
            ReportStatus::Approved => "approved",
            ReportStatus::Published => "published",
            ReportStatus::Superseded => "superseded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ReportStatus::Draft),
            "review" => Some(ReportStatus::Review),
            "approved" => Some(ReportStatus::Approved),
            "published" => Some(ReportStatus::Published),
            "superseded" => Some(ReportStatus::Superseded),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        use ReportStatus::*;
        matches!(
            (self, next),
            (Draft, Review)
                | (Review, Approved)
                | (Review, Draft)
                | (Approved, Published)
                | (Published, Superseded)
        )
    }

    pub fn transition(&self, next: ReportStatus) -> Result<ReportStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::new("report", self.as_str(), next.as_str()))
        }
    }

    /// Content (remarks, template, conclusions) is frozen once under review
    pub fn is_editable(&self) -> bool {
        matches!(self, ReportStatus::Draft)
    }

    pub fn is_deletable(&self) -> bool {
        matches!(self, ReportStatus::Draft)
    }

    /// Visible to portal users
    pub fn is_public(&self) -> bool {
        matches!(self, ReportStatus::Published)
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_workflow() {
        let status = ReportStatus::Draft
            .transition(ReportStatus::Review)
            .and_then(|s| s.transition(ReportStatus::Approved))
            .and_then(|s| s.transition(ReportStatus::Published))
            .unwrap();
        assert_eq!(status, ReportStatus::Published);
    }

    #[test]
    fn test_report_rejection_returns_to_draft() {
        assert!(ReportStatus::Review.can_transition_to(ReportStatus::Draft));
        assert!(!ReportStatus::Approved.can_transition_to(ReportStatus::Draft));
    }

    #[test]
    fn test_report_cannot_skip_review() {
        assert!(!ReportStatus::Draft.can_transition_to(ReportStatus::Approved));
        assert!(!ReportStatus::Draft.can_transition_to(ReportStatus::Published));
        assert!(!ReportStatus::Review.can_transition_to(ReportStatus::Published));
    }

    #[test]
    fn test_published_report_is_superseded_by_revision() {
        assert!(ReportStatus::Published.can_transition_to(ReportStatus::Superseded));
        assert!(!ReportStatus::Superseded.can_transition_to(ReportStatus::Published));
        assert!(!ReportStatus::Superseded.is_public());
        assert_eq!(ReportStatus::from_str("superseded"), Some(ReportStatus::Superseded));
    }

    #[test]
    fn test_only_draft_reports_deletable() {
        assert!(ReportStatus::Draft.is_deletable());
        assert!(!ReportStatus::Review.is_deletable());
        assert!(!ReportStatus::Approved.is_deletable());
        assert!(!ReportStatus::Published.is_deletable());
    }
}
