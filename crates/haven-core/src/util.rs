/// Parse a boolean-like environment flag.
/// Accepts common values such as 1/0, true/false, yes/no, on/off (case-insensitive).
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Non-empty, trimmed environment value.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Small `%VAR%` / `$VAR` expansion for configured paths.
pub fn expand_vars(raw: &str) -> String {
    let mut s = raw.to_string();
    for (k, v) in std::env::vars() {
        let p1 = format!("%{}%", k);
        let p2 = format!("${}", k);
        if s.contains(&p1) {
            s = s.replace(&p1, &v);
        }
        if s.contains(&p2) {
            s = s.replace(&p2, &v);
        }
    }
    s
}
