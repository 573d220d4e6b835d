//! Input checks shared by the resource and unit builders. Each check returns
//! a human-readable reason; callers wrap it in the error variant that names
//! the offending unit or resource.

pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.len();
    if len < min || len > max {
        return Err(format!(
            "{field} must be between {min} and {max} characters (got {len})"
        ));
    }
    Ok(())
}

/// Unit, container and construct names: ASCII alphanumerics, `-` and `_`.
pub fn check_name(field: &str, value: &str) -> Result<(), String> {
    check_length(field, value, 1, 255)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!(
            "{field} must contain only ASCII alphanumeric characters, hyphens, or underscores"
        ));
    }
    Ok(())
}

/// Environment and secret variable names as the container runtime accepts them.
pub fn check_env_key(value: &str) -> Result<(), String> {
    check_length("environment key", value, 1, 255)?;
    let mut chars = value.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid environment key '{value}'"));
    }
    Ok(())
}

/// Validates a container image reference.
///
/// Accepts: `registry/image:tag`, `image:tag`, `image@sha256:abc...`,
///          `localhost:5000/image:tag`
///
/// Rejects: shell metacharacters, whitespace, empty strings, strings > 500 chars
pub fn check_container_image(image: &str) -> Result<(), String> {
    check_length("image", image, 1, 500)?;

    let forbidden = [
        ';', '&', '|', '$', '`', '\'', '"', '\\', '\n', '\r', ' ', '\t',
    ];
    if image.chars().any(|c| forbidden.contains(&c)) {
        return Err("image: contains forbidden characters".into());
    }

    if !image.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err("image: must contain alphanumeric characters".into());
    }

    Ok(())
}

/// An absolute http(s) URL, as used for root URLs and webhook subscriptions.
/// Hosts may still be unresolved `${...}` tokens, so only the scheme and the
/// overall shape are checked for those.
pub fn check_url(value: &str) -> Result<(), String> {
    check_length("url", value, 1, 2048)?;
    let Some(rest) = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
    else {
        return Err("url must use http or https scheme".into());
    };
    if rest.starts_with("${") {
        return if rest.contains('}') {
            Ok(())
        } else {
            Err("url contains an unterminated attribute reference".into())
        };
    }
    let parsed = url::Url::parse(value).map_err(|e| format!("invalid url: {e}"))?;
    if parsed.host_str().is_none() {
        return Err("url must have a host".into());
    }
    Ok(())
}

/// Listener path pattern: absolute, at most 128 characters, `*` and `?`
/// allowed as wildcards.
pub fn check_path_pattern(pattern: &str) -> Result<(), String> {
    check_length("path pattern", pattern, 1, 128)?;
    if !pattern.starts_with('/') {
        return Err(format!("path pattern '{pattern}' must start with '/'"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "_-.$/~\"'@:+*?&".contains(c);
    if !pattern.chars().all(allowed) {
        return Err(format!("path pattern '{pattern}' contains invalid characters"));
    }
    Ok(())
}

/// Health-check status matcher: `200`, `200,302`, or `200-299`.
pub fn check_http_codes(codes: &str) -> Result<(), String> {
    let valid_code = |s: &str| s.parse::<u16>().is_ok_and(|c| (200..=499).contains(&c));
    let ok = !codes.is_empty()
        && codes.split(',').all(|part| match part.split_once('-') {
            Some((lo, hi)) => {
                valid_code(lo) && valid_code(hi) && lo.parse::<u16>().ok() <= hi.parse::<u16>().ok()
            }
            None => valid_code(part),
        });
    if ok {
        Ok(())
    } else {
        Err(format!("invalid healthy http codes '{codes}'"))
    }
}
