//! Step lines and summaries for command output
//!
//! Fancy mode goes through cliclack's log; plain mode prints one tagged
//! line per event so CI logs stay greppable.

use super::context::UiContext;
use console::style;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Ok,
    Warn,
    Info,
}

impl Level {
    fn tag(self) -> String {
        match self {
            Level::Ok => style("[OK]").green().to_string(),
            Level::Warn => style("[WARN]").yellow().to_string(),
            Level::Info => style("[INFO]").cyan().to_string(),
        }
    }

    fn log(self, message: String) {
        let _ = match self {
            Level::Ok => cliclack::log::success(message),
            Level::Warn => cliclack::log::warning(message),
            Level::Info => cliclack::log::info(message),
        };
    }
}

fn plain_line(level: Level, message: &str) -> String {
    format!("  {} {}", level.tag(), message)
}

fn emit(ctx: &UiContext, level: Level, message: String) {
    if ctx.use_fancy_output() {
        level.log(message);
    } else {
        println!("{}", plain_line(level, &message));
    }
}

/// Closing line of a successful command
pub fn outro_success(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        let _ = cliclack::outro(style(message).green().bold());
    } else {
        println!();
        println!("{}", plain_line(Level::Ok, message).trim_start());
    }
}

/// Titled block, e.g. the generated project config
pub fn note(ctx: &UiContext, title: &str, message: &str) {
    if ctx.use_fancy_output() {
        let _ = cliclack::note(title, message);
    } else {
        println!("{}:", style(title).bold());
        for line in message.lines() {
            println!("  {}", line);
        }
    }
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    emit(ctx, Level::Ok, message.to_string());
}

/// Completed step with a dimmed detail such as a layer id or size
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    emit(ctx, Level::Ok, format!("{} ({})", message, style(detail).dim()));
}

/// Non-fatal problem with what to do about it
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    emit(ctx, Level::Warn, format!("{} - {}", message, style(hint).dim()));
}

pub fn step_info(ctx: &UiContext, message: &str) {
    emit(ctx, Level::Info, message.to_string());
}

pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        let _ = cliclack::log::remark(message);
    } else {
        println!("  {}", style(message).dim());
    }
}

/// Aligned summary field under a build result
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    let key = format!("{}:", key);
    if ctx.use_fancy_output() {
        println!("  {:<9} {}", style(key).dim(), value);
    } else {
        println!("  {:<9} {}", key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_tagged() {
        console::set_colors_enabled(false);
        assert_eq!(plain_line(Level::Ok, "Source layer copied"), "  [OK] Source layer copied");
        assert_eq!(plain_line(Level::Warn, "x"), "  [WARN] x");
        assert_eq!(plain_line(Level::Info, "No images built yet"), "  [INFO] No images built yet");
    }

    #[test]
    fn output_non_interactive() {
        let ctx = UiContext::non_interactive();
        // These should not panic
        step_ok(&ctx, "Step completed");
        step_ok_detail(&ctx, "Dependency layer reused", "3f2a9c01d4e5");
        step_warn_hint(&ctx, "Could not remove runtime image", "not found");
        step_info(&ctx, "No images built yet");
        key_value(&ctx, "Image", "3f2a9c01d4e5");
        remark(&ctx, "Add a requirements.txt next to strata.toml");
        note(&ctx, "strata.toml", "[build]\nbase_image = \"python:3.11-slim\"");
        outro_success(&ctx, "Done");
    }
}
