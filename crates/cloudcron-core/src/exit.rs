/// Exit status handed to the supervising process manager.
///
/// The numeric values are a contract with the supervisor: it restarts the
/// process on `Restart` and leaves it stopped otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// Stopped cleanly, do not restart.
    Clean,
    /// Stopped on an error, please restart.
    Restart,
    /// Stopped on a fatal error, do not restart.
    Fatal,
}

impl TaskExit {
    pub fn code(self) -> u8 {
        match self {
            TaskExit::Clean => 0,
            TaskExit::Restart => 1,
            TaskExit::Fatal => 2,
        }
    }

    /// Whether the supervisor is expected to start the process again.
    pub fn wants_restart(self) -> bool {
        matches!(self, TaskExit::Restart)
    }
}

impl std::fmt::Display for TaskExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskExit::Clean => "clean",
            TaskExit::Restart => "restart",
            TaskExit::Fatal => "fatal",
        };
        write!(f, "{s} ({})", self.code())
    }
}

impl From<TaskExit> for std::process::ExitCode {
    fn from(exit: TaskExit) -> Self {
        std::process::ExitCode::from(exit.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_supervisor_contract() {
        assert_eq!(TaskExit::Clean.code(), 0);
        assert_eq!(TaskExit::Restart.code(), 1);
        assert_eq!(TaskExit::Fatal.code(), 2);
    }

    #[test]
    fn only_restart_wants_restart() {
        assert!(TaskExit::Restart.wants_restart());
        assert!(!TaskExit::Clean.wants_restart());
        assert!(!TaskExit::Fatal.wants_restart());
    }
}
