//! Pure token-budget trimming (spec §4.5 step 7), split out from
//! [`crate::manager`] so the trimming order is exhaustively unit-tested
//! without needing fake stores or async plumbing.

/// `4 chars ≈ 1 token` (spec §4.5 step 7).
pub const CHARS_PER_TOKEN: usize = 4;
/// Recent turns are never trimmed below this count (spec §4.5 step 7.3).
pub const MIN_RECENT_TURNS: usize = 2;
/// Last-resort cap applied to the rolling summary (spec §4.5 step 7.4).
pub const SUMMARY_TRUNCATE_CAP_TOKENS: usize = 400;

pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn truncate_to_tokens(s: &str, tokens: usize) -> String {
    let max_chars = tokens.saturating_mul(CHARS_PER_TOKEN);
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

/// Everything step 7 needs to know about a candidate bundle. Token counts
/// for recent turns and retrieved chunks are precomputed by the caller
/// (recent turns chronological, retrieved chunks ranked best-first) so this
/// function stays pure arithmetic over `usize`s and two `String`s.
#[derive(Debug, Clone)]
pub struct BudgetSections {
    /// Profile identity fields (name, role, top interests) — never dropped.
    pub profile_identity_tokens: usize,
    /// Profile background slice, already capped to 200 chars upstream but
    /// still subject to further trimming here.
    pub background_text: String,
    pub rolling_summary: String,
    /// One entry per recent turn, oldest first.
    pub recent_turn_tokens: Vec<usize>,
    /// One entry per retrieved chunk, highest-ranked first.
    pub retrieved_chunk_tokens: Vec<usize>,
    /// The current `userMessage` — never dropped.
    pub current_message_tokens: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BudgetResult {
    pub background_text: String,
    pub rolling_summary: String,
    /// How many of the (oldest-first) recent turns survive, counted from the end.
    pub kept_recent_turns: usize,
    /// How many of the (best-first) retrieved chunks survive, counted from the start.
    pub kept_retrieved_chunks: usize,
    pub used: usize,
}

/// Trim `sections` to `cap` tokens, dropping lowest-priority content first:
/// retrieved chunks, then background text, then oldest recent turns (never
/// below [`MIN_RECENT_TURNS`]), then the rolling summary as a last resort.
pub fn fit_to_cap(sections: &BudgetSections, cap: usize) -> BudgetResult {
    let mut background = sections.background_text.clone();
    let mut summary = sections.rolling_summary.clone();
    let mut kept_chunks = sections.retrieved_chunk_tokens.len();
    let mut kept_turns = sections.recent_turn_tokens.len();
    let fixed = sections.profile_identity_tokens + sections.current_message_tokens;

    let total = |background: &str, summary: &str, kept_chunks: usize, kept_turns: usize| -> usize {
        let chunks_total: usize = sections.retrieved_chunk_tokens[..kept_chunks].iter().sum();
        let turns_start = sections.recent_turn_tokens.len() - kept_turns;
        let turns_total: usize = sections.recent_turn_tokens[turns_start..].iter().sum();
        fixed + estimate_tokens(background) + estimate_tokens(summary) + chunks_total + turns_total
    };

    while total(&background, &summary, kept_chunks, kept_turns) > cap && kept_chunks > 0 {
        kept_chunks -= 1;
    }

    while total(&background, &summary, kept_chunks, kept_turns) > cap && !background.is_empty() {
        let next = estimate_tokens(&background).saturating_sub(1);
        let trimmed = truncate_to_tokens(&background, next);
        if trimmed == background {
            break;
        }
        background = trimmed;
    }

    while total(&background, &summary, kept_chunks, kept_turns) > cap && kept_turns > MIN_RECENT_TURNS {
        kept_turns -= 1;
    }

    if total(&background, &summary, kept_chunks, kept_turns) > cap {
        let target = SUMMARY_TRUNCATE_CAP_TOKENS.min(estimate_tokens(&summary));
        summary = truncate_to_tokens(&summary, target);
    }

    let used = total(&background, &summary, kept_chunks, kept_turns);
    BudgetResult {
        background_text: background,
        rolling_summary: summary,
        kept_recent_turns: kept_turns,
        kept_retrieved_chunks: kept_chunks,
        used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repeat_tokens(n: usize) -> String {
        "a".repeat(n * CHARS_PER_TOKEN)
    }

    #[test]
    fn fits_without_trimming_when_already_under_cap() {
        let sections = BudgetSections {
            profile_identity_tokens: 10,
            background_text: repeat_tokens(50),
            rolling_summary: repeat_tokens(100),
            recent_turn_tokens: vec![50, 50, 50],
            retrieved_chunk_tokens: vec![100, 100],
            current_message_tokens: 20,
        };
        let result = fit_to_cap(&sections, 1000);
        assert_eq!(result.kept_recent_turns, 3);
        assert_eq!(result.kept_retrieved_chunks, 2);
        assert_eq!(result.background_text, sections.background_text);
        assert_eq!(result.rolling_summary, sections.rolling_summary);
    }

    #[test]
    fn drops_lowest_ranked_chunks_first() {
        let sections = BudgetSections {
            profile_identity_tokens: 10,
            background_text: repeat_tokens(50),
            rolling_summary: repeat_tokens(50),
            recent_turn_tokens: vec![50, 50],
            retrieved_chunk_tokens: vec![500, 500, 500],
            current_message_tokens: 10,
        };
        // fixed=20, bg=50, summary=50, turns=100 => 220 baseline; cap 1000
        // leaves 780 for chunks, so only one 500-token chunk survives.
        let result = fit_to_cap(&sections, 1000);
        assert_eq!(result.kept_retrieved_chunks, 1);
        assert_eq!(result.kept_recent_turns, 2);
        assert_eq!(result.background_text, sections.background_text);
        assert!(result.used <= 1000);
    }

    #[test]
    fn truncates_background_before_dropping_recent_turns() {
        let sections = BudgetSections {
            profile_identity_tokens: 10,
            background_text: repeat_tokens(3000),
            rolling_summary: repeat_tokens(2000),
            recent_turn_tokens: vec![150, 150, 150, 150, 150],
            retrieved_chunk_tokens: vec![500; 10],
            current_message_tokens: 10,
        };
        let result = fit_to_cap(&sections, 6000);
        assert!(result.used <= 6000);
        assert_eq!(result.kept_recent_turns, 5);
        assert!(result.kept_retrieved_chunks >= 1);
        assert!(estimate_tokens(&result.background_text) < 3000);
    }

    #[test]
    fn never_drops_below_minimum_recent_turns() {
        let sections = BudgetSections {
            profile_identity_tokens: 10,
            background_text: String::new(),
            rolling_summary: repeat_tokens(5000),
            recent_turn_tokens: vec![500, 500, 500, 500, 500],
            retrieved_chunk_tokens: vec![],
            current_message_tokens: 10,
        };
        let result = fit_to_cap(&sections, 100);
        assert_eq!(result.kept_recent_turns, MIN_RECENT_TURNS);
        assert!(estimate_tokens(&result.rolling_summary) <= SUMMARY_TRUNCATE_CAP_TOKENS);
    }

    #[test]
    fn identity_and_current_message_tokens_always_counted() {
        let sections = BudgetSections {
            profile_identity_tokens: 500,
            background_text: String::new(),
            rolling_summary: String::new(),
            recent_turn_tokens: vec![],
            retrieved_chunk_tokens: vec![],
            current_message_tokens: 500,
        };
        let result = fit_to_cap(&sections, 10);
        assert_eq!(result.used, 1000);
    }
}
