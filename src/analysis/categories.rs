//! Keyword-based issue categorisation.

use crate::report::Row;

/// Issue categories and the keywords that vote for them, in report order.
pub const CATEGORIES: [(&str, &[&str]); 10] = [
    (
        "Runtime Errors",
        &["undefined", "null", "type error", "reference error", "syntax error", "runtime exception"],
    ),
    (
        "Performance Issues",
        &["memory leak", "performance", "slow", "cpu usage", "rendering", "optimization"],
    ),
    (
        "Async Programming",
        &["promise", "async", "callback", "race condition", "await", "event loop"],
    ),
    (
        "State Management",
        &["state", "props", "redux", "context", "vuex", "mobx", "store", "mutation"],
    ),
    (
        "Browser Compatibility",
        &["cross-browser", "browser", "dom", "safari", "chrome", "firefox", "ie", "edge"],
    ),
    (
        "Security Vulnerabilities",
        &["xss", "csrf", "injection", "security", "vulnerability", "authentication"],
    ),
    (
        "Dependency Management",
        &["npm", "package", "dependency", "version", "install", "conflict"],
    ),
    (
        "Framework-Specific",
        &["react", "vue", "angular", "svelte", "framework", "component"],
    ),
    (
        "Network & API",
        &["fetch", "axios", "api", "http", "request", "response", "timeout"],
    ),
    (
        "Configuration & Build",
        &["webpack", "babel", "config", "build", "compile", "transpile", "setup"],
    ),
];

/// Number of categories reported as "top".
const TOP_N: usize = 3;

/// Keyword hits per category for one piece of text.
///
/// Each keyword counts at most once, as a plain substring of the lower-cased
/// text.
pub fn score_text(text: &str) -> [u64; CATEGORIES.len()] {
    let text = text.to_lowercase();
    let mut scores = [0u64; CATEGORIES.len()];
    for (slot, (_, keywords)) in scores.iter_mut().zip(CATEGORIES.iter()) {
        *slot = keywords.iter().filter(|k| text.contains(*k)).count() as u64;
    }
    scores
}

/// Accumulated category scores over a repository's issues.
#[derive(Debug, Clone, Default)]
pub struct CategoryTally {
    issues: usize,
    totals: [u64; CATEGORIES.len()],
}

impl CategoryTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score one issue from its title and body.
    pub fn add_issue(&mut self, title: &str, body: &str) {
        let scores = score_text(&format!("{} {}", title, body));
        for (total, score) in self.totals.iter_mut().zip(scores) {
            *total += score;
        }
        self.issues += 1;
    }

    pub fn issues(&self) -> usize {
        self.issues
    }

    /// Share of all keyword matches per category, in percent.
    ///
    /// Every category is 0 when nothing matched.
    pub fn percentages(&self) -> Vec<(&'static str, f64)> {
        let total: u64 = self.totals.iter().sum();
        CATEGORIES
            .iter()
            .zip(self.totals)
            .map(|((name, _), count)| {
                let pct = if total > 0 {
                    count as f64 / total as f64 * 100.0
                } else {
                    0.0
                };
                (*name, pct)
            })
            .collect()
    }

    /// The three highest-scoring categories; ties keep declaration order.
    pub fn top_categories(&self) -> Vec<&'static str> {
        let mut ranked = self.percentages();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().take(TOP_N).map(|(name, _)| name).collect()
    }

    /// Dataset row: repository, issue count, one percentage per category and
    /// the top categories joined by `", "`.
    pub fn to_row(&self, repository: &str) -> Row {
        let mut row = Row::new();
        row.insert("Repository".to_string(), repository.to_string());
        row.insert("Total Issues".to_string(), self.issues.to_string());
        for (name, pct) in self.percentages() {
            row.insert(format!("{} %", name), format!("{}", (pct * 100.0).round() / 100.0));
        }
        row.insert("Top Categories".to_string(), self.top_categories().join(", "));
        row
    }
}

/// Column order of the categorisation dataset.
pub fn columns() -> Vec<String> {
    let mut columns = vec!["Repository".to_string(), "Total Issues".to_string()];
    columns.extend(CATEGORIES.iter().map(|(name, _)| format!("{} %", name)));
    columns.push("Top Categories".to_string());
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_text_counts_each_keyword_once() {
        let scores = score_text("Promise never resolves, promise chain with await");
        // promise + await
        assert_eq!(scores[2], 2);
    }

    #[test]
    fn test_score_text_is_case_insensitive() {
        let scores = score_text("XSS in Login");
        assert_eq!(scores[5], 1);
    }

    #[test]
    fn test_percentages_sum_to_hundred() {
        let mut tally = CategoryTally::new();
        tally.add_issue("Memory leak when rendering", "");
        tally.add_issue("webpack build fails", "babel config");

        let total: f64 = tally.percentages().iter().map(|(_, p)| p).sum();
        assert!((total - 100.0).abs() < 1e-9);
        assert_eq!(tally.issues(), 2);
    }

    #[test]
    fn test_no_matches_gives_zero_percentages() {
        let mut tally = CategoryTally::new();
        tally.add_issue("zzz", "qqq");
        assert!(tally.percentages().iter().all(|(_, p)| *p == 0.0));
        assert_eq!(
            tally.top_categories(),
            vec!["Runtime Errors", "Performance Issues", "Async Programming"]
        );
    }

    #[test]
    fn test_top_categories_ranked() {
        let mut tally = CategoryTally::new();
        tally.add_issue("webpack babel build", "xss security");
        let top = tally.top_categories();
        assert_eq!(top[0], "Configuration & Build");
        assert_eq!(top[1], "Security Vulnerabilities");
    }

    #[test]
    fn test_row_matches_columns() {
        let mut tally = CategoryTally::new();
        tally.add_issue("slow", "");
        let row = tally.to_row("https://github.com/a/b");
        for column in columns() {
            assert!(row.contains_key(&column), "missing {}", column);
        }
        assert_eq!(row["Performance Issues %"], "100");
        assert_eq!(row["Top Categories"].split(", ").count(), 3);
    }
}
