use crate::models::{ActivityStatus, Classification};

use super::PageObservation;

/// Merges one scan result and one page observation.
///
/// Precedence: a process match is `danger`, then any page anomaly is
/// `warning`, otherwise `safe`.
pub fn classify(process_match: Option<&str>, page: &PageObservation) -> Classification {
    if let Some(name) = process_match {
        return Classification {
            status: ActivityStatus::Danger,
            message: format!("Blocked process running: {name}"),
            matched_process: Some(name.to_string()),
        };
    }

    let warning = |message: String| Classification {
        status: ActivityStatus::Warning,
        message,
        matched_process: None,
    };

    match page {
        PageObservation::Normal => Classification {
            status: ActivityStatus::Safe,
            message: "Meeting page open".into(),
            matched_process: None,
        },
        PageObservation::NoPagesOpen => warning("No open pages detected".into()),
        PageObservation::UrlDrifted(url) => warning(format!("URL changed: {url}")),
        PageObservation::SessionUnreachable => warning("Meeting page unreachable".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_match_beats_drift() {
        let result = classify(
            Some("Cluely Helper"),
            &PageObservation::UrlDrifted("https://example.com".into()),
        );
        assert_eq!(result.status, ActivityStatus::Danger);
        assert!(result.message.contains("Cluely Helper"));
        assert_eq!(result.matched_process.as_deref(), Some("Cluely Helper"));
    }

    #[test]
    fn test_drift_is_warning() {
        let result = classify(None, &PageObservation::UrlDrifted("https://example.com".into()));
        assert_eq!(result.status, ActivityStatus::Warning);
        assert_eq!(result.message, "URL changed: https://example.com");
        assert_eq!(result.matched_process, None);
    }

    #[test]
    fn test_no_pages_is_warning() {
        let result = classify(None, &PageObservation::NoPagesOpen);
        assert_eq!(result.status, ActivityStatus::Warning);
        assert_eq!(result.message, "No open pages detected");
    }

    #[test]
    fn test_clean_tick_is_safe() {
        let result = classify(None, &PageObservation::Normal);
        assert_eq!(result.status, ActivityStatus::Safe);
        assert_eq!(result.matched_process, None);
    }
}
