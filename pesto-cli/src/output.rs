// Output formatting helpers for CLI commands

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// Print the progress line of a node
pub fn progress(node: &str, completed: usize, failed: usize, total: usize) {
    eprintln!(
        "\x1b[2m{:>12}\x1b[0m {}/{} ({}%){}",
        node,
        completed,
        total,
        percent(completed, total),
        if failed > 0 {
            format!(" \x1b[31m{} failed\x1b[0m", failed)
        } else {
            String::new()
        }
    );
}

/// Print a resolved command line (indented)
pub fn command_line(argv: &[String]) {
    println!("        $ {}", argv.join(" "));
}

fn percent(completed: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        completed * 100 / total
    }
}
