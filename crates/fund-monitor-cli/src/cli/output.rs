//! Output helpers shared by every subcommand.
//!
//! Global flags are exported as environment variables by `main` so that any
//! module can check them without threading the flags through.

use serde::Serialize;

pub const JSON_VAR: &str = "FUND_MONITOR_JSON";
pub const QUIET_VAR: &str = "FUND_MONITOR_QUIET";

fn flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1")
}

/// True when `--json` was passed.
pub fn is_json() -> bool {
    flag(JSON_VAR)
}

/// True when `--quiet` was passed.
pub fn is_quiet() -> bool {
    flag(QUIET_VAR)
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("  Error: failed to serialise output: {e}"),
    }
}

/// Print a section heading unless quiet or in JSON mode.
pub fn heading(title: &str) {
    if is_quiet() || is_json() {
        return;
    }
    println!();
    println!("{title}");
    println!("{}", "=".repeat(title.chars().count()));
}

/// Print an aligned `label: value` line unless quiet or in JSON mode.
pub fn field(label: &str, value: impl std::fmt::Display) {
    if is_quiet() || is_json() {
        return;
    }
    println!("  {:<24} {value}", format!("{label}:"));
}

/// Print a free-form line unless quiet or in JSON mode.
pub fn line(text: impl std::fmt::Display) {
    if is_quiet() || is_json() {
        return;
    }
    println!("{text}");
}
