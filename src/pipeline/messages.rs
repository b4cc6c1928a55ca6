//! Result and status types returned by the pipeline session.

use std::path::PathBuf;

use crate::diagnostics::{DiagnosticsSnapshot, ToneVerdict};

/// Returned by [`crate::pipeline::session::Session::finalize`].
#[derive(Debug, Clone)]
pub struct FinalizeResult {
    /// Final path of the (possibly merged, possibly normalized) recording.
    pub final_path: PathBuf,
    /// Every segment path produced during the session, in creation order.
    pub segment_paths: Vec<PathBuf>,
    /// Last diagnostics snapshot taken before finalize, if diagnostics were enabled.
    pub diagnostics: Option<DiagnosticsSnapshot>,
    /// Test-tone pass/fail verdict, if `diag_test_tone_check` was enabled.
    pub tone_verdict: Option<ToneVerdict>,
}
