//! Interactive prompts with CI/non-interactive fallback

use super::context::UiContext;
use crate::error::{StrataError, StrataResult};

/// Ask for confirmation before a destructive action.
///
/// Returns `true` without asking in auto-yes mode and `default` when not
/// attached to a terminal.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> StrataResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }

    if !ctx.can_prompt() {
        return Ok(default);
    }

    // cliclack blocks on terminal input
    let message = message.to_string();
    let result = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| StrataError::User(format!("Prompt task failed: {}", e)))?;

    result.map_err(|e| StrataError::User(format!("Prompt failed: {}", e)))
}
