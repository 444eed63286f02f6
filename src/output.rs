//! User-facing console messages.
//! Colors are enabled only when stdout is a TTY, so scripted runs get plain text.

use owo_colors::OwoColorize;

fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

fn tagged(tag: &str, color: fn(&str) -> String, msg: &str) -> String {
    if is_tty() {
        format!("{} {}", color(tag), msg)
    } else {
        format!("{tag} {msg}")
    }
}

pub fn print_info(msg: &str) {
    println!("{}", tagged("info:", |t| t.cyan().bold().to_string(), msg));
}

pub fn print_warn(msg: &str) {
    eprintln!("{}", tagged("warn:", |t| t.yellow().bold().to_string(), msg));
}

pub fn print_error(msg: &str) {
    eprintln!("{}", tagged("error:", |t| t.red().bold().to_string(), msg));
}

pub fn print_success(msg: &str) {
    println!("{}", tagged("ok:", |t| t.green().bold().to_string(), msg));
}

/// One verification finding, e.g. `  corrupted  docs/a.md`.
pub fn print_finding(category: &str, detail: &str) {
    let label = format!("{category:<10}");
    if is_tty() {
        println!("  {} {}", label.magenta(), detail);
    } else {
        println!("  {label} {detail}");
    }
}

/// Print a plain user-facing line (no prefix). Use this for primary outputs
/// such as "move docs/a.md -> docs/sub/a.md" which users may script against.
pub fn print_user(msg: &str) {
    println!("{msg}");
}
