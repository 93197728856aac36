use super::ReconcileError;
use tracing::{error, warn};

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sections_attempted: usize,
    pub sections_failed: usize,
    pub rows_failed: usize,
}

impl RunSummary {
    /// Record the outcome of one section entry.
    ///
    /// Fatal errors are returned so the caller can stop the run; anything
    /// else is logged and counted, and the run moves on.
    pub fn absorb<T>(
        &mut self,
        section: &str,
        result: Result<T, ReconcileError>,
    ) -> Result<Option<T>, ReconcileError> {
        self.sections_attempted += 1;
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => {
                error!(section = %section, error = %e, "Fatal error, stopping run");
                Err(e)
            }
            Err(e) => {
                warn!(section = %section, error = %e, "Section entry failed");
                self.sections_failed += 1;
                Ok(None)
            }
        }
    }

    /// Record the outcome of one data row
    pub fn absorb_row<T>(
        &mut self,
        list: &str,
        result: Result<T, ReconcileError>,
    ) -> Result<Option<T>, ReconcileError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(list = %list, error = %e, "Failed to add row");
                self.rows_failed += 1;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::CmsError;

    #[test]
    fn test_absorb_counts_and_continues() {
        let mut summary = RunSummary::default();

        let ok = summary.absorb("files", Ok::<_, ReconcileError>(1)).unwrap();
        let failed = summary
            .absorb::<()>("files", Err(ReconcileError::ListNotFound("x".into())))
            .unwrap();

        assert_eq!(ok, Some(1));
        assert_eq!(failed, None);
        assert_eq!(summary.sections_attempted, 2);
        assert_eq!(summary.sections_failed, 1);
    }

    #[test]
    fn test_absorb_reraises_fatal() {
        let mut summary = RunSummary::default();
        let result = summary.absorb::<()>(
            "lists",
            Err(CmsError::Authentication("401".into()).into()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_absorb_row() {
        let mut summary = RunSummary::default();
        summary
            .absorb_row::<()>("News", Err(ReconcileError::ListNotFound("x".into())))
            .unwrap();
        assert_eq!(summary.rows_failed, 1);
        assert_eq!(summary.sections_attempted, 0);
    }
}
