//! Priority-ordered profile matching against a bare filename.

use glob::{MatchOptions, Pattern};
use regex::Regex;

use crate::config::Profile;

enum CompiledTest {
    Glob(Pattern),
    Regex(Regex),
}

impl CompiledTest {
    fn is_match(&self, basename: &str) -> bool {
        match self {
            Self::Glob(p) => p.matches_with(
                basename,
                MatchOptions {
                    case_sensitive: false,
                    require_literal_separator: false,
                    require_literal_leading_dot: true,
                },
            ),
            Self::Regex(r) => r.is_match(basename),
        }
    }
}

struct CompiledProfile {
    profile: Profile,
    test: CompiledTest,
}

/// A compiled, priority-sorted view of a profile list, ready for repeated
/// `match`/`test` calls against incoming filenames.
pub struct ProfileMatcher {
    compiled: Vec<CompiledProfile>,
}

impl ProfileMatcher {
    /// Build a matcher from a profile list: filters to enabled profiles,
    /// sorts ascending by priority (stable), compiles each pattern, and
    /// silently drops profiles whose regex fails to compile.
    pub fn build(profiles: &[Profile]) -> Self {
        let mut enabled: Vec<&Profile> = profiles.iter().filter(|p| p.enabled).collect();
        enabled.sort_by_key(|p| p.priority);

        let mut compiled = Vec::with_capacity(enabled.len());
        for profile in enabled {
            let test = if profile.is_regex {
                match Regex::new(&profile.pattern) {
                    Ok(r) => CompiledTest::Regex(r),
                    Err(e) => {
                        tracing::warn!(
                            profile_id = %profile.id,
                            pattern = %profile.pattern,
                            error = %e,
                            "dropping profile with invalid regex"
                        );
                        continue;
                    }
                }
            } else {
                match Pattern::new(&profile.pattern) {
                    Ok(p) => CompiledTest::Glob(p),
                    Err(e) => {
                        tracing::warn!(
                            profile_id = %profile.id,
                            pattern = %profile.pattern,
                            error = %e,
                            "dropping profile with invalid glob"
                        );
                        continue;
                    }
                }
            };
            compiled.push(CompiledProfile {
                profile: profile.clone(),
                test,
            });
        }

        Self { compiled }
    }

    /// First matching profile, or `None`. Dotfiles never match.
    pub fn find_match<'a>(&'a self, basename: &str) -> Option<&'a Profile> {
        if basename.starts_with('.') {
            return None;
        }
        self.compiled
            .iter()
            .find(|c| c.test.is_match(basename))
            .map(|c| &c.profile)
    }

    pub fn test(&self, basename: &str) -> bool {
        self.find_match(basename).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Action;

    fn profile(id: &str, pattern: &str, priority: i32, is_regex: bool) -> Profile {
        Profile {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            pattern: pattern.to_string(),
            is_regex,
            template: "<prefix>_<datetime>".to_string(),
            prefix: String::new(),
            priority,
            action: Action::Rename,
        }
    }

    #[test]
    fn first_match_wins_by_priority() {
        let profiles = vec![
            profile("b", "Screenshot*", 5, false),
            profile("a", "Screenshot 2025*", 0, false),
        ];
        let matcher = ProfileMatcher::build(&profiles);
        let m = matcher.find_match("Screenshot 2025-10-30 at 09.00.00.png").unwrap();
        assert_eq!(m.id, "a");
    }

    #[test]
    fn dotfiles_never_match() {
        let profiles = vec![profile("a", "*", 0, false)];
        let matcher = ProfileMatcher::build(&profiles);
        assert!(matcher.find_match(".hidden").is_none());
    }

    #[test]
    fn glob_is_case_insensitive() {
        let profiles = vec![profile("a", "*.heic", 0, false)];
        let matcher = ProfileMatcher::build(&profiles);
        assert!(matcher.find_match("IMG.HEIC").is_some());
    }

    #[test]
    fn invalid_regex_is_dropped_not_fatal() {
        let profiles = vec![
            profile("bad", "(", 0, true),
            profile("good", "Screen Recording*", 1, false),
        ];
        let matcher = ProfileMatcher::build(&profiles);
        assert!(matcher.find_match("Screen Recording 2025.mov").is_some());
    }

    #[test]
    fn disabled_profiles_are_excluded() {
        let mut p = profile("a", "*.png", 0, false);
        p.enabled = false;
        let matcher = ProfileMatcher::build(&[p]);
        assert!(!matcher.test("a.png"));
    }
}
