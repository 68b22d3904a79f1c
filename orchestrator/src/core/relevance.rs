//! Naive keyword-overlap relevance ranking.

use std::collections::BTreeSet;

/// Minimum length of a word to count as a keyword.
pub const MIN_KEYWORD_LEN: usize = 4;

/// Lower-cased alphanumeric words of at least [`MIN_KEYWORD_LEN`] characters.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Number of `keywords` that occur in `line` (case-insensitive substring match).
pub fn score_line(line: &str, keywords: &BTreeSet<String>) -> usize {
    let lowered = line.to_lowercase();
    keywords
        .iter()
        .filter(|keyword| lowered.contains(keyword.as_str()))
        .count()
}

/// Lines that share at least one keyword with `query`, best first.
///
/// Ties keep their input order, so identical inputs always rank identically.
pub fn rank_lines<'a>(query: &str, lines: &[&'a str], limit: usize) -> Vec<&'a str> {
    let keywords = keywords(query);
    if keywords.is_empty() || limit == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(usize, &str)> = lines
        .iter()
        .map(|line| (score_line(line, &keywords), *line))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, line)| line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_skip_short_words() {
        let words = keywords("Convert the MP4 video to audio");
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        assert_eq!(words, vec!["audio", "convert", "video"]);
    }

    #[test]
    fn ranking_is_by_score_then_input_order() {
        let lines = [
            "unrelated line",
            "video first",
            "convert video here",
            "video second",
        ];
        let ranked = rank_lines("convert video", &lines, 10);
        assert_eq!(ranked, vec!["convert video here", "video first", "video second"]);
    }

    #[test]
    fn ranking_respects_limit_and_empty_queries() {
        let lines = ["video one", "video two"];
        assert_eq!(rank_lines("video", &lines, 1), vec!["video one"]);
        assert!(rank_lines("a an of", &lines, 5).is_empty());
    }
}
