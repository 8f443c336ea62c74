//! Text units and the marker conventions embedded in them.
//!
//! A [`TextSpec`] carries what the viewer reads (`display`) and what the
//! speech engine says (`pronunciation`). The pronunciation string may embed
//! runs of a reserved delimiter character to insert pauses mid-sentence; the
//! display string may embed spaces (half- or full-width) as manual line
//! breaks. Both markers are stripped before anything reaches the screen.

/// Display text plus the matching pronunciation string for one spoken unit.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TextSpec {
    /// What gets rasterized as a caption.
    pub display: String,
    /// What gets sent to the speech engine, possibly with pause markers.
    pub pronunciation: String,
}

impl TextSpec {
    pub fn new(display: impl Into<String>, pronunciation: impl Into<String>) -> Self {
        Self {
            display: display.into(),
            pronunciation: pronunciation.into(),
        }
    }

    /// A spec whose pronunciation equals its display text.
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            pronunciation: text.clone(),
            display: text,
        }
    }
}

/// One piece of a partitioned pronunciation string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    /// Text to hand to the speech engine.
    Speech(String),
    /// A maximal run of `n` delimiter characters; becomes `n * k` seconds of
    /// silence.
    Pause(usize),
}

/// Partition a pronunciation string into alternating speech fragments and
/// maximal delimiter runs, preserving order. Empty speech fragments are
/// skipped.
pub fn split_pronunciation(s: &str, delimiter: char) -> Vec<Fragment> {
    let mut out = Vec::new();
    let mut speech = String::new();
    let mut run = 0usize;

    for c in s.chars() {
        if c == delimiter {
            if !speech.is_empty() {
                out.push(Fragment::Speech(std::mem::take(&mut speech)));
            }
            run += 1;
        } else {
            if run > 0 {
                out.push(Fragment::Pause(run));
                run = 0;
            }
            speech.push(c);
        }
    }
    if run > 0 {
        out.push(Fragment::Pause(run));
    }
    if !speech.is_empty() {
        out.push(Fragment::Speech(speech));
    }
    out
}

/// Prepare display text for rasterization: delimiter characters are dropped
/// and runs of half-/full-width spaces become explicit line breaks.
pub fn clean_display(s: &str, delimiter: char) -> String {
    let stripped: String = s.chars().filter(|&c| c != delimiter).collect();
    let lines: Vec<&str> = stripped
        .split([' ', '\u{3000}'])
        .filter(|part| !part.is_empty())
        .collect();
    lines.join("\n")
}

/// Strip a leading list enumerator such as `"3. "` or `"３．"`.
///
/// The answer text arrives as one line picked from a numbered list; the
/// number is bookkeeping, not part of the joke, so it is neither shown nor
/// spoken.
pub fn strip_enumerator(s: &str) -> &str {
    let mut rest = s;

    let digits: &[char] = &[
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '０', '１', '２', '３', '４', '５', '６',
        '７', '８', '９',
    ];
    let trimmed = rest.trim_start_matches(digits);
    if trimmed.len() == rest.len() {
        return s;
    }

    let Some(after_dot) = trimmed
        .strip_prefix('.')
        .or_else(|| trimmed.strip_prefix('．'))
        .or_else(|| trimmed.strip_prefix('、'))
        .or_else(|| trimmed.strip_prefix(')'))
        .or_else(|| trimmed.strip_prefix('）'))
    else {
        return s;
    };

    rest = after_dot.trim_start_matches([' ', '\u{3000}']);
    rest
}

/// Step function from caption length to font size.
///
/// Shorter text renders larger. Tiers are `(max_chars, px)` pairs checked in
/// order; text longer than every tier gets `fallback_px`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FontSizeTable {
    pub tiers: Vec<(usize, f32)>,
    pub fallback_px: f32,
}

impl Default for FontSizeTable {
    fn default() -> Self {
        Self {
            tiers: vec![(8, 120.0), (14, 96.0), (22, 76.0)],
            fallback_px: 60.0,
        }
    }
}

impl FontSizeTable {
    /// Size for a caption of `char_count` characters (line-break markers
    /// excluded from the count).
    pub fn size_for(&self, char_count: usize) -> f32 {
        for &(max_chars, px) in &self.tiers {
            if char_count <= max_chars {
                return px;
            }
        }
        self.fallback_px
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_no_delimiter_is_single_fragment() {
        assert_eq!(
            split_pronunciation("こんにちは", '_'),
            vec![Fragment::Speech("こんにちは".to_string())]
        );
    }

    #[test]
    fn split_mid_sentence_pause() {
        assert_eq!(
            split_pronunciation("AIが得意なこと_は？", '_'),
            vec![
                Fragment::Speech("AIが得意なこと".to_string()),
                Fragment::Pause(1),
                Fragment::Speech("は？".to_string()),
            ]
        );
    }

    #[test]
    fn split_counts_maximal_runs() {
        assert_eq!(
            split_pronunciation("a___b", '_'),
            vec![
                Fragment::Speech("a".to_string()),
                Fragment::Pause(3),
                Fragment::Speech("b".to_string()),
            ]
        );
    }

    #[test]
    fn split_pure_delimiter_run() {
        assert_eq!(split_pronunciation("____", '_'), vec![Fragment::Pause(4)]);
    }

    #[test]
    fn split_empty_input() {
        assert!(split_pronunciation("", '_').is_empty());
    }

    #[test]
    fn split_leading_and_trailing_runs() {
        assert_eq!(
            split_pronunciation("_a_", '_'),
            vec![
                Fragment::Pause(1),
                Fragment::Speech("a".to_string()),
                Fragment::Pause(1),
            ]
        );
    }

    #[test]
    fn clean_display_strips_delimiters() {
        assert_eq!(clean_display("AB_C", '_'), "ABC");
    }

    #[test]
    fn clean_display_breaks_on_both_space_widths() {
        assert_eq!(clean_display("上の行 下の行", '_'), "上の行\n下の行");
        assert_eq!(clean_display("上の行\u{3000}下の行", '_'), "上の行\n下の行");
    }

    #[test]
    fn clean_display_collapses_space_runs() {
        assert_eq!(clean_display("a  b", '_'), "a\nb");
    }

    #[test]
    fn strip_enumerator_removes_leading_number() {
        assert_eq!(
            strip_enumerator("3. 見た目が完全にロボットだった"),
            "見た目が完全にロボットだった"
        );
    }

    #[test]
    fn strip_enumerator_handles_fullwidth() {
        assert_eq!(strip_enumerator("３．回答"), "回答");
        assert_eq!(strip_enumerator("2）回答"), "回答");
    }

    #[test]
    fn strip_enumerator_leaves_plain_text() {
        assert_eq!(strip_enumerator("見た目"), "見た目");
        // A number that is part of the joke stays.
        assert_eq!(strip_enumerator("100万円あげます"), "100万円あげます");
    }

    #[test]
    fn font_size_tiers_step_down() {
        let table = FontSizeTable::default();
        assert_eq!(table.size_for(0), 120.0);
        assert_eq!(table.size_for(8), 120.0);
        assert_eq!(table.size_for(9), 96.0);
        assert_eq!(table.size_for(14), 96.0);
        assert_eq!(table.size_for(15), 76.0);
        assert_eq!(table.size_for(22), 76.0);
        assert_eq!(table.size_for(23), 60.0);
    }
}
