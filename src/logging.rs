//! Timestamped console output used by the search drivers.

fn timestamp() -> String {
    time::strftime("%Y-%m-%d %H:%M:%S", &time::now()).expect("Could not format timestamp")
}

/// Prints an untagged progress message.
pub fn info(msg: &str) {
    println!("{} | {}", timestamp(), msg);
}

/// Prints a warning in yellow.
pub fn warning(msg: &str) {
    println!("{} | \x1b[33m{}\x1b[0m", timestamp(), msg);
}

/// Prints an error in red.
pub fn error(msg: &str) {
    println!("{} | \x1b[31m{}\x1b[0m", timestamp(), msg);
}

/// Prints a success message in green.
pub fn success(msg: &str) {
    println!("{} | \x1b[32m{}\x1b[0m", timestamp(), msg);
}
