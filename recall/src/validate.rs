use shared::{Error, Result};

pub const MAX_NAMESPACE_LEN: usize = 128;

/// Fail-fast key check, run before any backend I/O.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".to_string()));
    }
    Ok(())
}

/// Namespaces end up as file names and redis key segments, so the accepted
/// charset is deliberately narrow: ASCII alphanumerics plus `.`, `_`, `-`.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::InvalidArgument(
            "namespace must not be empty".to_string(),
        ));
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(Error::InvalidArgument(format!(
            "namespace exceeds {} characters",
            MAX_NAMESPACE_LEN
        )));
    }
    if let Some(bad) = namespace.chars().find(|c| !is_namespace_char(*c)) {
        return Err(Error::InvalidArgument(format!(
            "namespace contains unsupported character {:?}",
            bad
        )));
    }
    Ok(())
}

fn is_namespace_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}
