use crate::error::{Error, Result};

/// validate a reference name
///
/// names are slash-separated paths like `refs/heads/main`. the rules
/// track the usual convention: no `..`, no `@{`, no ASCII control
/// characters or space, none of `:?*[\^~`, no component starting with
/// `.` or ending with `.lock`, no trailing slash, no empty component.
pub fn validate(name: &str) -> Result<()> {
    let invalid = |reason: &'static str| Error::InvalidRefName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if name == "HEAD" {
        return Ok(());
    }
    if name.ends_with('/') {
        return Err(invalid("trailing slash"));
    }
    if name.contains("..") {
        return Err(invalid("contains '..'"));
    }
    if name.contains("@{") {
        return Err(invalid("contains '@{'"));
    }

    for c in name.chars() {
        if c.is_ascii_control() {
            return Err(invalid("contains control character"));
        }
        if matches!(c, ' ' | ':' | '?' | '*' | '[' | '\\' | '^' | '~') {
            return Err(invalid("contains forbidden character"));
        }
    }

    for component in name.split('/') {
        if component.is_empty() {
            return Err(invalid("empty component"));
        }
        if component == "." {
            return Err(invalid("'.' component"));
        }
        if component.starts_with('.') {
            return Err(invalid("component starts with '.'"));
        }
        if component.ends_with(".lock") {
            return Err(invalid("component ends with '.lock'"));
        }
    }

    Ok(())
}
