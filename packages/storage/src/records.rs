//! Small persisted settings records.

use serde::{Deserialize, Serialize};

/// How long a tutorial run can be resumed after it was last touched.
pub const TUTORIAL_RESUME_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Audio notification preferences (`audioNotificationSettings`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Whether new-incident notifications are silenced.
    pub muted: bool,
}

/// Walkthrough progress (`tutorial-progress`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorialProgress {
    /// Whether the walkthrough was finished.
    pub completed: bool,
    /// Last step shown (1-based).
    pub last_step: u32,
    /// When progress was last saved (epoch ms).
    pub timestamp: i64,
}

impl Default for TutorialProgress {
    fn default() -> Self {
        Self {
            completed: false,
            last_step: 1,
            timestamp: 0,
        }
    }
}

impl TutorialProgress {
    /// Progress for a walkthrough currently showing `step`.
    #[must_use]
    pub const fn at_step(step: u32, now_ms: i64) -> Self {
        Self {
            completed: false,
            last_step: step,
            timestamp: now_ms,
        }
    }

    /// Progress for a finished walkthrough of `total_steps` steps.
    #[must_use]
    pub const fn finished(total_steps: u32, now_ms: i64) -> Self {
        Self {
            completed: true,
            last_step: total_steps,
            timestamp: now_ms,
        }
    }

    /// Step to start from when the walkthrough is reopened at `now_ms`.
    ///
    /// An unfinished run saved within the resume window picks up where it
    /// left off; anything else starts over at step 1.
    #[must_use]
    pub const fn resume_step(&self, now_ms: i64) -> u32 {
        let recent = now_ms.saturating_sub(self.timestamp) < TUTORIAL_RESUME_WINDOW_MS;
        if !self.completed && recent && self.last_step >= 1 {
            self.last_step
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumes_recent_unfinished_run() {
        let progress = TutorialProgress::at_step(4, 1_000);
        assert_eq!(progress.resume_step(1_000 + 60_000), 4);
    }

    #[test]
    fn restarts_stale_run() {
        let progress = TutorialProgress::at_step(4, 0);
        assert_eq!(progress.resume_step(TUTORIAL_RESUME_WINDOW_MS), 1);
    }

    #[test]
    fn restarts_finished_run() {
        let progress = TutorialProgress::finished(6, 0);
        assert_eq!(progress.resume_step(10), 1);
    }

    #[test]
    fn extreme_timestamps_restart() {
        let ancient = TutorialProgress::at_step(3, i64::MIN);
        assert_eq!(ancient.resume_step(i64::MAX), 1);

        let stored: TutorialProgress = serde_json::from_str(&format!(
            r#"{{"completed":false,"lastStep":2,"timestamp":{}}}"#,
            i64::MIN
        ))
        .unwrap();
        assert_eq!(stored.resume_step(1_000), 1);
    }

    #[test]
    fn decodes_dashboard_shape() {
        let progress: TutorialProgress =
            serde_json::from_str(r#"{"completed":false,"lastStep":3,"timestamp":42}"#).unwrap();
        assert_eq!(progress, TutorialProgress::at_step(3, 42));
    }
}
