use std::collections::{HashMap, VecDeque};

use image::Luma;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::{pipeline::segment::LineMask, types::Stroke};

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Labels 8-connected components of `mask` in raster order.
///
/// Returns the label of every pixel (`0` for background, components numbered
/// from 1) and the pixel area of each component, indexed by `label - 1`.
pub fn label_components(mask: &LineMask) -> (Vec<u32>, Vec<usize>) {
    let labels = connected_components(mask.as_gray(), Connectivity::Eight, Luma([0u8]));
    let count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut areas = vec![0usize; count];
    for p in labels.pixels() {
        if let Some(label) = (p.0[0] as usize).checked_sub(1) {
            areas[label] += 1;
        }
    }
    (labels.into_raw(), areas)
}

/// Turns a line mask and its skeleton into ordered strokes.
///
/// Each mask component keeps the longest geodesic path through its skeleton
/// pixels. Strokes shorter than `min_len` points are dropped. The result is
/// sorted by start point and each stroke starts at its lexicographically
/// smaller end, so the output does not depend on labeling order.
pub fn extract_strokes(mask: &LineMask, skeleton: &LineMask, min_len: usize) -> Vec<Stroke> {
    let (labels, areas) = label_components(mask);
    let w = mask.width() as usize;

    let mut per_component: Vec<Vec<(u32, u32)>> = vec![Vec::new(); areas.len()];
    for y in 0..skeleton.height() {
        for x in 0..skeleton.width() {
            if !skeleton.is_set(x, y) {
                continue;
            }
            let label = labels[y as usize * w + x as usize];
            if label > 0 {
                per_component[label as usize - 1].push((x, y));
            }
        }
    }

    let frame = (mask.width(), mask.height());
    let mut strokes: Vec<Stroke> = per_component
        .iter()
        .zip(&areas)
        .filter_map(|(pixels, &area)| {
            let mut points = longest_path(pixels);
            if points.len() < min_len.max(1) {
                return None;
            }
            if points.first() > points.last() {
                points.reverse();
            }
            Some(Stroke {
                points,
                area,
                frame,
            })
        })
        .collect();

    strokes.sort_by(|a, b| a.start().cmp(&b.start()).then_with(|| b.len().cmp(&a.len())));
    log::debug!(
        "{} mask components, {} strokes of at least {min_len} px",
        areas.len(),
        strokes.len()
    );
    strokes
}

/// Longest shortest-path through an 8-connected pixel set, found with two
/// breadth-first sweeps per connected piece.
fn longest_path(pixels: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let index: HashMap<(u32, u32), usize> =
        pixels.iter().enumerate().map(|(i, &p)| (p, i)).collect();
    let mut visited = vec![false; pixels.len()];
    let mut best: Vec<(u32, u32)> = Vec::new();

    for seed in 0..pixels.len() {
        if visited[seed] {
            continue;
        }
        let (far, _, piece) = sweep(pixels, &index, seed);
        for &i in &piece {
            visited[i] = true;
        }
        let (end, parents, _) = sweep(pixels, &index, far);

        let mut path = vec![pixels[end]];
        let mut cursor = end;
        while let Some(prev) = parents[cursor] {
            path.push(pixels[prev]);
            cursor = prev;
        }
        if path.len() > best.len() {
            best = path;
        }
    }
    best
}

/// BFS from `start`; returns the farthest node, the parent links and the
/// visited nodes. Ties on distance go to the node reached first.
fn sweep(
    pixels: &[(u32, u32)],
    index: &HashMap<(u32, u32), usize>,
    start: usize,
) -> (usize, Vec<Option<usize>>, Vec<usize>) {
    let mut parents = vec![None; pixels.len()];
    let mut dist = vec![usize::MAX; pixels.len()];
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    dist[start] = 0;
    queue.push_back(start);

    let mut far = start;
    while let Some(i) = queue.pop_front() {
        order.push(i);
        if dist[i] > dist[far] {
            far = i;
        }
        let (x, y) = (pixels[i].0 as i64, pixels[i].1 as i64);
        for (dx, dy) in NEIGHBOURS {
            let (nx, ny) = (x + dx, y + dy);
            if nx < 0 || ny < 0 {
                continue;
            }
            let Some(&j) = index.get(&(nx as u32, ny as u32)) else {
                continue;
            };
            if dist[j] == usize::MAX {
                dist[j] = dist[i] + 1;
                parents[j] = Some(i);
                queue.push_back(j);
            }
        }
    }
    (far, parents, order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(points: &[(u32, u32)], w: u32, h: u32) -> LineMask {
        let mut mask = LineMask::empty(w, h);
        for &(x, y) in points {
            mask.set(x, y);
        }
        mask
    }

    #[test]
    fn labels_separate_components() {
        let mask = mask_from(&[(1, 1), (2, 2), (8, 8), (9, 8)], 12, 12);
        let (labels, areas) = label_components(&mask);
        assert_eq!(areas, vec![2, 2]);
        assert_eq!(labels[2 * 12 + 2], 1);
        assert_eq!(labels[8 * 12 + 9], 2);
        assert_eq!(labels[0], 0);
    }

    #[test]
    fn longest_path_ignores_spur() {
        // Horizontal line with a two-pixel spur going down from its middle.
        let mut pts: Vec<(u32, u32)> = (2..18).map(|x| (x, 5)).collect();
        pts.push((10, 6));
        pts.push((10, 7));
        let mask = mask_from(&pts, 20, 12);
        let strokes = extract_strokes(&mask, &mask, 3);
        assert_eq!(strokes.len(), 1);
        let stroke = &strokes[0];
        assert_eq!(stroke.start(), Some((2, 5)));
        assert_eq!(stroke.end(), Some((17, 5)));
        assert_eq!(stroke.len(), 16);
        assert_eq!(stroke.area, 18);
    }

    #[test]
    fn short_components_are_dropped() {
        let mut pts: Vec<(u32, u32)> = (0..12).map(|x| (x, 1)).collect();
        pts.extend([(5, 8), (6, 8)]);
        let mask = mask_from(&pts, 16, 10);
        let strokes = extract_strokes(&mask, &mask, 5);
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].len(), 12);
    }

    #[test]
    fn strokes_sorted_by_start() {
        let mut pts: Vec<(u32, u32)> = (10..20).map(|x| (x, 2)).collect();
        pts.extend((0..10).map(|y| (3, y + 5)));
        let mask = mask_from(&pts, 24, 16);
        let strokes = extract_strokes(&mask, &mask, 3);
        assert_eq!(strokes.len(), 2);
        assert_eq!(strokes[0].start(), Some((3, 5)));
        assert_eq!(strokes[1].start(), Some((10, 2)));
    }
}
