//! Passphrase handling for CLI operations.

use rpassword::prompt_password;

/// Returns the passphrase given on the command line, or prompts for one
/// when `ask` is set.
pub fn get_passphrase(provided: Option<String>, ask: bool) -> Option<String> {
    if provided.is_some() || !ask {
        return provided;
    }
    match prompt_password("Enter passphrase: ") {
        Ok(pwd) if !pwd.is_empty() => Some(pwd),
        _ => None,
    }
}

/// Prompts twice for a new passphrase (for creating encrypted archives)
pub fn confirm_passphrase() -> Option<String> {
    let first = prompt_password("Enter passphrase: ").ok()?;
    if first.is_empty() {
        eprintln!("Passphrase cannot be empty");
        return None;
    }
    let second = prompt_password("Confirm passphrase: ").ok()?;
    if first == second {
        Some(first)
    } else {
        eprintln!("Passphrases do not match");
        None
    }
}
