//! Resolution ladder: rung selection and dimension fitting.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One configured output resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRung {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Appended to the video id in the rendition key, e.g. `_720p`.
    pub suffix: String,
}

impl ResolutionRung {
    pub fn new(name: impl Into<String>, width: u32, height: u32, suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            suffix: suffix.into(),
        }
    }
}

/// 720p, 480p, 360p in that priority order.
pub fn default_ladder() -> Vec<ResolutionRung> {
    vec![
        ResolutionRung::new("720p", 1280, 720, "_720p"),
        ResolutionRung::new("480p", 854, 480, "_480p"),
        ResolutionRung::new("360p", 640, 360, "_360p"),
    ]
}

/// Rungs worth encoding for a source of `source_width`x`source_height`.
///
/// Keeps every rung whose width or height does not exceed the source's,
/// in configured order and without duplicate names. If none qualifies,
/// falls back to the first configured rung alone.
pub fn select_rungs(
    ladder: &[ResolutionRung],
    source_width: u32,
    source_height: u32,
) -> Vec<ResolutionRung> {
    let mut seen = HashSet::new();
    let selected: Vec<ResolutionRung> = ladder
        .iter()
        .filter(|r| r.width <= source_width || r.height <= source_height)
        .filter(|r| seen.insert(r.name.clone()))
        .cloned()
        .collect();

    if selected.is_empty() {
        return ladder.first().cloned().into_iter().collect();
    }
    selected
}

/// Largest even dimensions with the source aspect ratio inside the box.
///
/// Each dimension is the floor of pure scaling rounded down to an even
/// number, never below 2. A source with a zero dimension fills the box.
pub fn fit_dimensions(
    source_width: u32,
    source_height: u32,
    box_width: u32,
    box_height: u32,
) -> (u32, u32) {
    if source_width == 0 || source_height == 0 {
        return (even_floor(box_width as f64), even_floor(box_height as f64));
    }

    let scale = (box_width as f64 / source_width as f64).min(box_height as f64 / source_height as f64);
    (
        even_floor(source_width as f64 * scale),
        even_floor(source_height as f64 * scale),
    )
}

fn even_floor(value: f64) -> u32 {
    // Absorb float error such as 719.9999999 for an exact 720.
    let floored = (value + 1e-9).floor().max(0.0) as u32;
    (floored - floored % 2).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(rungs: &[ResolutionRung]) -> Vec<&str> {
        rungs.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_full_hd_selects_full_ladder() {
        let selected = select_rungs(&default_ladder(), 1920, 1080);
        assert_eq!(names(&selected), vec!["720p", "480p", "360p"]);
    }

    #[test]
    fn test_exact_match_is_kept() {
        let selected = select_rungs(&default_ladder(), 1280, 720);
        assert_eq!(names(&selected), vec!["720p", "480p", "360p"]);
    }

    #[test]
    fn test_partial_ladder() {
        let selected = select_rungs(&default_ladder(), 854, 480);
        assert_eq!(names(&selected), vec!["480p", "360p"]);
    }

    #[test]
    fn test_width_or_height_suffices() {
        // Tall portrait source: narrower than every rung but taller than all.
        let selected = select_rungs(&default_ladder(), 540, 960);
        assert_eq!(names(&selected), vec!["720p", "480p", "360p"]);
    }

    #[test]
    fn test_small_source_falls_back_to_first_rung() {
        let selected = select_rungs(&default_ladder(), 480, 270);
        assert_eq!(names(&selected), vec!["720p"]);
    }

    #[test]
    fn test_empty_ladder() {
        assert!(select_rungs(&[], 1920, 1080).is_empty());
    }

    #[test]
    fn test_duplicates_removed_preserving_order() {
        let ladder = vec![
            ResolutionRung::new("480p", 854, 480, "_480p"),
            ResolutionRung::new("720p", 1280, 720, "_720p"),
            ResolutionRung::new("480p", 854, 480, "_480p_dup"),
            ResolutionRung::new("360p", 640, 360, "_360p"),
        ];
        let selected = select_rungs(&ladder, 1920, 1080);
        assert_eq!(names(&selected), vec!["480p", "720p", "360p"]);
        assert_eq!(selected[0].suffix, "_480p");
    }

    #[test]
    fn test_selection_never_duplicates_for_many_sources() {
        let ladder = default_ladder();
        for w in (0..=2000).step_by(97) {
            for h in (0..=2000).step_by(89) {
                let selected = select_rungs(&ladder, w, h);
                assert!(!selected.is_empty());
                let unique: HashSet<_> = selected.iter().map(|r| &r.name).collect();
                assert_eq!(unique.len(), selected.len());
                // Preserves configured order.
                let positions: Vec<usize> = selected
                    .iter()
                    .map(|r| ladder.iter().position(|l| l.name == r.name).unwrap())
                    .collect();
                assert!(positions.windows(2).all(|p| p[0] < p[1]));
            }
        }
    }

    #[test]
    fn test_fit_same_aspect() {
        assert_eq!(fit_dimensions(1920, 1080, 1280, 720), (1280, 720));
        assert_eq!(fit_dimensions(1920, 1080, 640, 360), (640, 360));
    }

    #[test]
    fn test_fit_rounds_down_to_even() {
        // 1920x1080 into 854x480: height-bound, width 853.33 -> 852.
        assert_eq!(fit_dimensions(1920, 1080, 854, 480), (852, 480));
    }

    #[test]
    fn test_fit_letterbox_and_pillarbox() {
        // 4:3 into 16:9 box is height-bound.
        assert_eq!(fit_dimensions(1440, 1080, 1280, 720), (960, 720));
        // 21:9 into 16:9 box is width-bound.
        assert_eq!(fit_dimensions(2560, 1080, 1280, 720), (1280, 540));
    }

    #[test]
    fn test_fit_upscales_small_source() {
        assert_eq!(fit_dimensions(480, 270, 1280, 720), (1280, 720));
    }

    #[test]
    fn test_fit_degenerate() {
        assert_eq!(fit_dimensions(0, 1080, 1280, 720), (1280, 720));
        assert_eq!(fit_dimensions(10000, 1, 1280, 720), (1280, 2));
    }

    #[test]
    fn test_fit_is_even_and_within_one_pixel() {
        let boxes = [(1280u32, 720u32), (854, 480), (640, 360), (1080, 1920), (333, 333)];
        for sw in (2..=4000).step_by(131) {
            for sh in (2..=4000).step_by(137) {
                for &(bw, bh) in &boxes {
                    let (w, h) = fit_dimensions(sw, sh, bw, bh);
                    assert_eq!(w % 2, 0);
                    assert_eq!(h % 2, 0);

                    let scale = (bw as f64 / sw as f64).min(bh as f64 / sh as f64);
                    let pure_w = (sw as f64 * scale).floor();
                    let pure_h = (sh as f64 * scale).floor();
                    if pure_w >= 2.0 {
                        assert!(pure_w - w as f64 <= 1.0, "{}x{} in {}x{}", sw, sh, bw, bh);
                    }
                    if pure_h >= 2.0 {
                        assert!(pure_h - h as f64 <= 1.0, "{}x{} in {}x{}", sw, sh, bw, bh);
                    }
                    assert!(w <= bw.max(2) && h <= bh.max(2));
                }
            }
        }
    }
}
