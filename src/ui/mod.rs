//! Terminal output with interactive and CI modes
//!
//! Uses `cliclack` and `indicatif` when attached to a terminal and falls
//! back to plain prefixed lines otherwise.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Removing layers...");
//! // ... do work ...
//! spinner.stop("Removed 3 layer(s)");
//!
//! ui::step_ok_detail(&ctx, "Dependency layer reused", "3f2a9c01d4e5");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    key_value, note, outro_success, remark, step_info, step_ok, step_ok_detail, step_warn_hint,
};
pub use progress::{BuildProgress, TaskSpinner};
pub use prompts::confirm;
