use crate::storage::WhitelistRule;

/// Anchored match of a parameter path against a rule pattern. `*` matches
/// any run of characters (including none), everything else is literal.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let path: Vec<char> = path.chars().collect();

    let (mut p, mut s) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while s < path.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            p += 1;
            resume = s;
        } else if p < pattern.len() && pattern[p] == path[s] {
            p += 1;
            s += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            resume += 1;
            s = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Ids of the rules whose pattern covers `path`.
pub fn covering_rules(rules: &[WhitelistRule], path: &str) -> Vec<i64> {
    rules
        .iter()
        .filter(|rule| path_matches(&rule.path, path))
        .map(|rule| rule.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_paths() {
        assert!(path_matches("id", "id"));
        assert!(!path_matches("id", "ids"));
        assert!(!path_matches("ids", "id"));
        assert!(path_matches("", ""));
    }

    #[test]
    fn test_wildcards() {
        assert!(path_matches("GET|*", "GET|id"));
        assert!(path_matches("*|id", "POST|id"));
        assert!(path_matches("COOKIE|*_token", "COOKIE|csrf_token"));
        assert!(!path_matches("COOKIE|*_token", "COOKIE|csrf_tokens"));
        assert!(path_matches("*", ""));
        assert!(path_matches("a*b*c", "aXXbYYbZc"));
        assert!(!path_matches("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_covering_rules() {
        let rules = vec![
            WhitelistRule {
                id: 1,
                profile_id: 1,
                caller: "login.php".to_string(),
                path: "id".to_string(),
            },
            WhitelistRule {
                id: 2,
                profile_id: 1,
                caller: "login.php".to_string(),
                path: "*".to_string(),
            },
            WhitelistRule {
                id: 3,
                profile_id: 1,
                caller: "login.php".to_string(),
                path: "name".to_string(),
            },
        ];

        assert_eq!(covering_rules(&rules, "id"), vec![1, 2]);
        assert_eq!(covering_rules(&rules, "other"), vec![2]);
    }
}
