//! Filename template expansion.
//!
//! Tokens are written `<name>`, transforms as `<transform:name>`, and the
//! counter accepts an optional zero-pad width `<counter:N>`. Unknown tokens
//! pass through literally so a profile with a typo degrades gracefully
//! instead of panicking.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};

/// The built-in profile ids that must always be present in a valid config.
pub const BUILTIN_PROFILE_IDS: &[&str] = &["heic-convert", "screenshots", "screen-recordings"];

/// Values available for template expansion, derived once per file.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub birthtime: SystemTime,
    pub original_path: std::path::PathBuf,
    pub ext: String,
    pub prefix: String,
    pub counter: Option<u32>,
}

impl TemplateContext {
    pub fn new(original_path: impl Into<std::path::PathBuf>, birthtime: SystemTime, prefix: impl Into<String>) -> Self {
        let original_path = original_path.into();
        let ext = original_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        Self {
            birthtime,
            original_path,
            ext,
            prefix: normalize_prefix(&prefix.into()),
            counter: None,
        }
    }

    pub fn with_counter(mut self, counter: u32) -> Self {
        self.counter = Some(counter);
        self
    }

    fn local_time(&self) -> DateTime<Local> {
        DateTime::<Local>::from(self.birthtime)
    }

    fn original_stem(&self) -> String {
        self.original_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    trimmed
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Expand one `<token>` body (without the angle brackets) against `ctx`.
/// Returns `None` for unknown tokens so the caller can pass them through.
fn expand_token(body: &str, ctx: &TemplateContext) -> Option<String> {
    if let Some(rest) = body.strip_prefix("upper:") {
        return expand_token(rest, ctx).map(|s| s.to_uppercase());
    }
    if let Some(rest) = body.strip_prefix("lower:") {
        return expand_token(rest, ctx).map(|s| s.to_lowercase());
    }
    if let Some(rest) = body.strip_prefix("slug:") {
        return expand_token(rest, ctx).map(|s| slugify(&s));
    }
    if let Some(width) = body.strip_prefix("counter:") {
        let width: usize = width.parse().ok()?;
        let counter = ctx.counter.unwrap_or(1);
        return Some(format!("{counter:0width$}"));
    }

    let lt = ctx.local_time();
    Some(match body {
        "date" => lt.format("%Y-%m-%d").to_string(),
        "time" => lt.format("%H-%M-%S").to_string(),
        "datetime" => lt.format("%Y-%m-%d_%H-%M-%S").to_string(),
        "original" => ctx.original_stem(),
        "ext" => ctx.ext.clone(),
        "prefix" => ctx.prefix.clone(),
        "year" => lt.format("%Y").to_string(),
        "month" => lt.format("%m").to_string(),
        "day" => lt.format("%d").to_string(),
        "hour" => lt.format("%H").to_string(),
        "minute" => lt.format("%M").to_string(),
        "second" => lt.format("%S").to_string(),
        "counter" => format!("{:03}", ctx.counter.unwrap_or(1)),
        _ => return None,
    })
}

/// Expand every `<...>` token in `template`. If the template contains an
/// explicit `<ext>` token, the result is the complete filename; otherwise
/// the source extension is appended.
pub fn expand(template: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some(end) = template[i..].find('>') {
                let body = &template[i + 1..i + end];
                match expand_token(body, ctx) {
                    Some(expanded) => {
                        out.push_str(&expanded);
                        i += end + 1;
                        continue;
                    }
                    None => {
                        // Unknown token: pass through literally, including brackets.
                        out.push_str(&template[i..i + end + 1]);
                        i += end + 1;
                        continue;
                    }
                }
            }
        }
        // Advance by one char (not byte) to stay UTF-8 safe.
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    if template.contains("<ext>") {
        out
    } else {
        format!("{out}{}", ctx.ext)
    }
}

/// Legacy fixed naming scheme retained for migrated configs and the
/// idempotence check in `needsRenameForProfile`.
pub const LEGACY_TEMPLATE: &str = "<prefix>_<datetime>";

/// True if `basename` already looks like `{prefix}_{YYYY-MM-DD}_{HH-MM-SS}[_N].{ext}`,
/// i.e. reprocessing it would be a no-op.
pub fn matches_legacy_shape(basename: &str, prefix: &str) -> bool {
    let prefix = normalize_prefix(prefix);
    let stem = Path::new(basename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let Some(rest) = stem.strip_prefix(&prefix) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix('_') else {
        return false;
    };
    // rest = YYYY-MM-DD_HH-MM-SS[_N]
    let mut parts = rest.splitn(2, '_');
    let date_part = parts.next().unwrap_or("");
    let remainder = parts.next().unwrap_or("");
    if !is_date_shape(date_part) {
        return false;
    }
    let mut rem_parts = remainder.splitn(2, '_');
    let time_part = rem_parts.next().unwrap_or("");
    let counter_part = rem_parts.next();
    if !is_time_shape(time_part) {
        return false;
    }
    match counter_part {
        None => true,
        Some(n) => !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()),
    }
}

fn is_date_shape(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 3
        && parts[0].len() == 4
        && parts[1].len() == 2
        && parts[2].len() == 2
        && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit()))
}

fn is_time_shape(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 3
        && parts.iter().all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_digit()))
}

/// Approximate a `SystemTime` from epoch milliseconds, as file metadata APIs
/// hand us birthtimes in.
pub fn system_time_from_millis(ms: i64) -> SystemTime {
    if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis((-ms) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_ctx() -> TemplateContext {
        // 2025-10-30T09:00:00 UTC, used via a context that doesn't depend on
        // local-timezone conversion: build from epoch seconds directly.
        let birthtime = UNIX_EPOCH + Duration::from_secs(1_761_814_800); // arbitrary but fixed
        TemplateContext::new("IMG_1234.HEIC", birthtime, "Screenshot")
    }

    #[test]
    fn expands_prefix_and_ext() {
        let ctx = fixed_ctx();
        let out = expand("<prefix>_<original>", &ctx);
        assert!(out.ends_with(".heic"));
        assert!(out.starts_with("Screenshot_IMG_1234"));
    }

    #[test]
    fn ext_token_suppresses_auto_append() {
        let ctx = fixed_ctx();
        let out = expand("<prefix>.<ext>", &ctx);
        assert_eq!(out.matches(".heic").count(), 1);
    }

    #[test]
    fn unknown_token_passes_through() {
        let ctx = fixed_ctx();
        let out = expand("<prefix>_<bogus>", &ctx);
        assert!(out.contains("<bogus>"));
    }

    #[test]
    fn counter_padding() {
        let ctx = fixed_ctx().with_counter(7);
        assert_eq!(expand_token("counter", &ctx).unwrap(), "007");
        assert_eq!(expand_token("counter:2", &ctx).unwrap(), "07");
    }

    #[test]
    fn slug_transform() {
        let ctx = TemplateContext::new("a.png", UNIX_EPOCH, "My Prefix!!");
        let out = expand_token("slug:prefix", &ctx).unwrap();
        assert_eq!(out, "my-prefix");
    }

    #[test]
    fn legacy_shape_detection() {
        assert!(matches_legacy_shape(
            "Screenshot_2025-10-30_09-00-00.png",
            "Screenshot"
        ));
        assert!(matches_legacy_shape(
            "Screenshot_2025-10-30_09-00-00_2.png",
            "Screenshot"
        ));
        assert!(!matches_legacy_shape("random_name.png", "Screenshot"));
    }
}
