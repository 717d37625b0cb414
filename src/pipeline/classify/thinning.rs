use crate::pipeline::segment::LineMask;

/// Zhang–Suen thinning of a binary mask into 1-pixel centerlines.
///
/// Pixels on the image border are treated as having background neighbours
/// outside the frame. Runs until neither sub-iteration removes a pixel.
pub fn thin(mask: &LineMask) -> LineMask {
    let (w, h) = (mask.width() as i64, mask.height() as i64);
    let mut grid: Vec<bool> = mask.as_gray().pixels().map(|p| p.0[0] != 0).collect();
    let at = |grid: &[bool], x: i64, y: i64| -> bool {
        x >= 0 && y >= 0 && x < w && y < h && grid[(y * w + x) as usize]
    };

    let mut to_clear = Vec::new();
    loop {
        let mut changed = false;
        for pass in 0..2 {
            to_clear.clear();
            for y in 0..h {
                for x in 0..w {
                    if !grid[(y * w + x) as usize] {
                        continue;
                    }
                    // P2..P9 clockwise from north.
                    let n = [
                        at(&grid, x, y - 1),
                        at(&grid, x + 1, y - 1),
                        at(&grid, x + 1, y),
                        at(&grid, x + 1, y + 1),
                        at(&grid, x, y + 1),
                        at(&grid, x - 1, y + 1),
                        at(&grid, x - 1, y),
                        at(&grid, x - 1, y - 1),
                    ];
                    let count = n.iter().filter(|&&v| v).count();
                    if !(2..=6).contains(&count) {
                        continue;
                    }
                    let transitions = (0..8).filter(|&i| !n[i] && n[(i + 1) % 8]).count();
                    if transitions != 1 {
                        continue;
                    }
                    let (p2, p4, p6, p8) = (n[0], n[2], n[4], n[6]);
                    let remove = if pass == 0 {
                        !(p2 && p4 && p6) && !(p4 && p6 && p8)
                    } else {
                        !(p2 && p4 && p8) && !(p2 && p6 && p8)
                    };
                    if remove {
                        to_clear.push((y * w + x) as usize);
                    }
                }
            }
            for &idx in &to_clear {
                grid[idx] = false;
            }
            changed |= !to_clear.is_empty();
        }
        if !changed {
            break;
        }
    }

    let mut out = LineMask::empty(mask.width(), mask.height());
    for (idx, _) in grid.iter().enumerate().filter(|(_, set)| **set) {
        out.set((idx as i64 % w) as u32, (idx as i64 / w) as u32);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(w: u32, h: u32, rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> LineMask {
        let mut mask = LineMask::empty(w, h);
        for y in rows {
            for x in cols.clone() {
                mask.set(x, y);
            }
        }
        mask
    }

    #[test]
    fn thick_band_thins_to_single_row() {
        let mask = band(40, 20, 8..13, 5..35);
        let skeleton = thin(&mask);
        assert!(skeleton.count() >= 20);
        assert!(skeleton.count() < mask.count() / 3);
        let thick_columns = (0..40)
            .filter(|&x| (0..20).filter(|&y| skeleton.is_set(x, y)).count() > 1)
            .count();
        assert!(thick_columns <= 4, "{thick_columns} columns wider than one pixel");
    }

    #[test]
    fn one_pixel_line_is_preserved() {
        let mask = band(30, 10, 4..5, 3..27);
        assert_eq!(thin(&mask), mask);
    }

    #[test]
    fn skeleton_is_subset_of_mask() {
        let mask = band(25, 25, 3..20, 10..14);
        let skeleton = thin(&mask);
        for y in 0..25 {
            for x in 0..25 {
                assert!(!skeleton.is_set(x, y) || mask.is_set(x, y));
            }
        }
    }
}
