//! Terminal output helpers
//!
//! Symbols and colors in an interactive terminal, bracketed tags in CI or
//! when output is piped.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln::ui::{self, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::step_ok_detail(&ctx, "demo_3f2a...", "/home/me/.cache/kiln/demo_3f2a....so");
//! ui::key_value(&ctx, "Root", "/home/me/.cache/kiln");
//! ```

mod context;
mod output;

pub use context::UiContext;
pub use output::{key_value, section, step_error, step_ok_detail, step_warn};
