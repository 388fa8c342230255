//! Platform shell selection.
//!
//! Every external command the engine runs goes through the platform shell so
//! that launcher invocations like `npx -y …` work without path splitting.

/// Returns the shell binary and its "run one command string" flag.
pub fn get_shell_command() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

/// Quote a string for safe interpolation into a shell command line.
///
/// Single-quote wrapping with the `'\''` escape, which is sufficient for
/// POSIX shells. On Windows the prompt is always delivered via stdin, so
/// this path is not used there.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
