//! Output functions for consistent CLI formatting

use super::context::UiContext;
use console::style;

/// Display a section header
pub fn section(_ctx: &UiContext, title: &str) {
    println!("{}", style(title).bold());
}

/// Display a success step with detail
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.is_interactive() {
        println!("  {} {} {}", style("✓").green(), message, style(detail).dim());
    } else {
        println!("  [OK] {} ({})", message, detail);
    }
}

/// Display a warning step
pub fn step_warn(ctx: &UiContext, message: &str) {
    if ctx.is_interactive() {
        println!("  {} {}", style("!").yellow(), message);
    } else {
        println!("  [WARN] {}", message);
    }
}

/// Display an error step (stderr)
pub fn step_error(ctx: &UiContext, message: &str) {
    if ctx.is_interactive() {
        eprintln!("  {} {}", style("✗").red(), message);
    } else {
        eprintln!("  [FAIL] {}", message);
    }
}

/// Display an aligned key/value line
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.is_interactive() {
        println!("  {:<10} {}", style(key).dim(), value);
    } else {
        println!("  {:<10} {}", key, value);
    }
}
