use log::debug;
use std::fmt;

/// Where a single install currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Resolving,
    Fetching,
    Verifying,
    Placing,
    Promoting,
    Activating,
    RollingBack,
    Done,
    Failed,
}

impl InstallState {
    /// Whether `next` may follow `self`. Any state short of `Done` may fail;
    /// rolling back only follows a failed activation and only ends in failure.
    pub fn can_advance_to(self, next: InstallState) -> bool {
        use InstallState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (RollingBack, Failed) => true,
            (RollingBack, _) => false,
            (_, Failed) => true,
            (Resolving, Fetching)
            | (Fetching, Verifying)
            | (Verifying, Placing)
            | (Placing, Promoting)
            | (Placing, Done)
            | (Promoting, Activating)
            | (Promoting, Done)
            | (Activating, Done)
            | (Activating, RollingBack) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallState::Resolving => "resolving",
            InstallState::Fetching => "fetching",
            InstallState::Verifying => "verifying",
            InstallState::Placing => "placing",
            InstallState::Promoting => "promoting",
            InstallState::Activating => "activating",
            InstallState::RollingBack => "rolling back",
            InstallState::Done => "done",
            InstallState::Failed => "failed",
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The states one install went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRun {
    label: String,
    history: Vec<InstallState>,
}

impl InstallRun {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            history: vec![InstallState::Resolving],
        }
    }

    pub fn state(&self) -> InstallState {
        self.history
            .last()
            .copied()
            .unwrap_or(InstallState::Resolving)
    }

    pub fn history(&self) -> &[InstallState] {
        &self.history
    }

    /// Records a transition. Transitions the table does not allow are
    /// ignored and logged.
    pub fn advance(&mut self, next: InstallState) {
        let current = self.state();
        if !current.can_advance_to(next) {
            debug!(
                "{}: ignoring transition {} -> {}",
                self.label, current, next
            );
            return;
        }
        debug!("{}: {} -> {}", self.label, current, next);
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::InstallState::*;
    use super::*;

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            Resolving, Fetching, Verifying, Placing, Promoting, Activating, Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?}", pair);
        }
        // Inhibited hooks skip activation
        assert!(Promoting.can_advance_to(Done));
    }

    #[test]
    fn test_every_active_state_can_fail() {
        for state in [
            Resolving, Fetching, Verifying, Placing, Promoting, Activating, RollingBack,
        ] {
            assert!(state.can_advance_to(Failed), "{:?}", state);
        }
        assert!(!Done.can_advance_to(Failed));
    }

    #[test]
    fn test_rollback_only_from_activation() {
        assert!(Activating.can_advance_to(RollingBack));
        assert!(!Promoting.can_advance_to(RollingBack));
        assert!(!RollingBack.can_advance_to(Done));
    }

    #[test]
    fn test_run_records_history() {
        let mut run = InstallRun::new("foo");
        run.advance(Fetching);
        run.advance(Placing); // skips Verifying, ignored
        run.advance(Verifying);
        run.advance(Failed);
        run.advance(Done); // terminal, ignored

        assert_eq!(run.history(), &[Resolving, Fetching, Verifying, Failed]);
        assert_eq!(run.state(), Failed);
    }
}
