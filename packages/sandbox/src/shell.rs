// ABOUTME: POSIX shell quoting helpers for commands run inside sandboxes
// ABOUTME: Used when building `sh -c` scripts from untrusted values

/// Wrap a value in single quotes so `sh` treats it as one literal word
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Render `KEY='value' ` prefixes for a command line
pub fn env_prefix<'a, I>(vars: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    vars.into_iter()
        .map(|(key, value)| format!("{}={} ", key, quote(value)))
        .collect()
}
