//! Tiered cover selection over extracted page images.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::path_utils::get_file_name_lossy;
use crate::types::CoverCandidate;

/// Substrings that mark an image as a likely cover (matched case-insensitively).
pub const COVER_KEYWORDS: [&str; 10] = [
    "cover", "front", "capa", "capa1", "page0001", "pg0001", "01a", "01", "01b", "preview",
];

lazy_static! {
    static ref TRAILING_DIGITS: Regex = Regex::new(r"(\d+)$").unwrap();
}

impl CoverCandidate {
    /// Scores an image path by its trailing digit run and cover keywords.
    pub fn from_path(path: &Path) -> Self {
        let file_name = get_file_name_lossy(path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let trailing_digits = TRAILING_DIGITS
            .captures(&stem)
            .map(|caps| caps[1].to_string());
        let trailing_numeric_value = trailing_digits.as_deref().and_then(|d| d.parse().ok());

        let lowered = file_name.to_lowercase();
        let matched_keyword = COVER_KEYWORDS.iter().any(|k| lowered.contains(k));

        Self {
            path: path.to_path_buf(),
            file_name,
            trailing_digits,
            trailing_numeric_value,
            matched_keyword,
        }
    }

    fn is_all_zeros(&self) -> bool {
        self.trailing_digits
            .as_deref()
            .is_some_and(|d| d.bytes().all(|b| b == b'0'))
    }
}

/// Picks the best cover among `candidates`, or `None` when no tier applies.
///
/// Tiers, first non-empty wins and the first match in input order is taken:
///
/// 1. trailing number made of zeros only (`000`)
/// 2. trailing number equal to 1 (`001`, `1`)
/// 3. file name containing one of [`COVER_KEYWORDS`]
/// 4. trailing number equal to 2 or 3
/// 5. smallest trailing number overall
pub fn select_cover(candidates: &[PathBuf]) -> Option<PathBuf> {
    let scored: Vec<CoverCandidate> = candidates
        .iter()
        .map(|path| CoverCandidate::from_path(path))
        .collect();

    select_scored(&scored).map(|candidate| {
        debug!("Selected cover {}", candidate.file_name);
        candidate.path.clone()
    })
}

/// Tier selection over already scored candidates.
pub fn select_scored(candidates: &[CoverCandidate]) -> Option<&CoverCandidate> {
    let value_is = |c: &CoverCandidate, wanted: &[u64]| {
        c.trailing_numeric_value.is_some_and(|v| wanted.contains(&v))
    };

    candidates
        .iter()
        .find(|c| c.is_all_zeros())
        .or_else(|| candidates.iter().find(|c| value_is(c, &[1])))
        .or_else(|| candidates.iter().find(|c| c.matched_keyword))
        .or_else(|| candidates.iter().find(|c| value_is(c, &[2, 3])))
        .or_else(|| {
            // min_by_key keeps the first of equal minima
            candidates
                .iter()
                .filter(|c| c.trailing_numeric_value.is_some())
                .min_by_key(|c| c.trailing_numeric_value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/tmp/x").join(n)).collect()
    }

    fn selected(names: &[&str]) -> Option<String> {
        select_cover(&paths(names)).map(|p| get_file_name_lossy(&p))
    }

    #[test]
    fn test_candidate_scoring() {
        let c = CoverCandidate::from_path(Path::new("Page-0042.PNG"));
        assert_eq!(c.trailing_digits.as_deref(), Some("0042"));
        assert_eq!(c.trailing_numeric_value, Some(42));
        assert!(!c.matched_keyword);

        let c = CoverCandidate::from_path(Path::new("FrontCover.jpg"));
        assert_eq!(c.trailing_digits, None);
        assert!(c.matched_keyword);
    }

    #[test]
    fn test_zero_tier_wins() {
        assert_eq!(
            selected(&["002.jpg", "cover.jpg", "000.jpg"]).as_deref(),
            Some("000.jpg")
        );
    }

    #[test]
    fn test_one_tier_before_keyword() {
        assert_eq!(
            selected(&["page-010.jpg", "page-001.jpg", "page-003.jpg"]).as_deref(),
            Some("page-001.jpg")
        );
        assert_eq!(selected(&["capa.jpg", "p1.jpg"]).as_deref(), Some("p1.jpg"));
    }

    #[test]
    fn test_keyword_before_two_or_three() {
        assert_eq!(
            selected(&["img2.jpg", "preview.png"]).as_deref(),
            Some("preview.png")
        );
        assert_eq!(selected(&["x9.jpg", "x3.jpg"]).as_deref(), Some("x3.jpg"));
    }

    #[test]
    fn test_smallest_trailing_number_fallback() {
        assert_eq!(
            selected(&["p17.jpg", "p9.jpg", "p12.jpg"]).as_deref(),
            Some("p9.jpg")
        );
        assert_eq!(selected(&["a7.jpg", "b7.jpg"]).as_deref(), Some("a7.jpg"));
    }

    #[test]
    fn test_no_cover_found() {
        assert_eq!(selected(&["alpha.jpg", "beta.png"]), None);
        assert_eq!(selected(&[]), None);
    }
}
