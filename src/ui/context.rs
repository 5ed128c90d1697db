//! Output mode detection for terminals and CI

use std::io::IsTerminal;

/// Environment variables set by common CI systems
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
];

/// Forces plain line output even on a terminal
const PLAIN_VAR: &str = "STRATA_PLAIN";

/// How build output is rendered and whether prompts may block
#[derive(Debug, Clone)]
pub struct UiContext {
    /// Spinners, progress bars and cliclack step lines
    fancy: bool,
    /// A human can answer prompts on stdin
    can_prompt: bool,
    /// `--yes`: confirmations pass without asking
    auto_yes: bool,
}

impl UiContext {
    /// Inspect the process's terminals and environment
    pub fn detect() -> Self {
        Self::classify(
            std::io::stdout().is_terminal(),
            std::io::stdin().is_terminal(),
            |var| std::env::var_os(var).is_some(),
        )
    }

    /// Plain output with no prompting, as under CI
    pub fn non_interactive() -> Self {
        Self::classify(false, false, |_| false)
    }

    fn classify(stdout_tty: bool, stdin_tty: bool, is_set: impl Fn(&str) -> bool) -> Self {
        let ci = CI_VARS.iter().any(|&var| is_set(var));
        let fancy = stdout_tty && !ci && !is_set(PLAIN_VAR);
        Self {
            fancy,
            can_prompt: stdout_tty && stdin_tty && !ci,
            auto_yes: false,
        }
    }

    /// Answer every confirmation with yes
    pub fn with_auto_yes(mut self, yes: bool) -> Self {
        self.auto_yes = yes;
        self
    }

    pub fn can_prompt(&self) -> bool {
        self.can_prompt
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    /// Whether to draw spinners and progress bars instead of plain lines
    pub fn use_fancy_output(&self) -> bool {
        self.fancy
    }
}
