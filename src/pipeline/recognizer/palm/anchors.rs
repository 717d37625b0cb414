//! SSD anchor centers for the MediaPipe palm detector.

/// Feature map strides of the detector heads. Consecutive equal strides share one grid.
const STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;

/// Anchor centers `[x, y]` normalized to the square input, in model output order.
pub fn generate_anchors(input_size: u32) -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    let mut layer = 0;
    while layer < STRIDES.len() {
        let stride = STRIDES[layer];
        let shared = STRIDES[layer..].iter().take_while(|&&s| s == stride).count();
        let per_cell = ANCHORS_PER_LAYER * shared;
        let grid = input_size.div_ceil(stride);

        for y in 0..grid {
            for x in 0..grid {
                let center = [
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                ];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
        layer += shared;
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palm_detector_has_2016_anchors() {
        let anchors = generate_anchors(192);
        assert_eq!(anchors.len(), 2016);
        assert_eq!(anchors[0], [0.5 / 24.0, 0.5 / 24.0]);
        assert_eq!(anchors[1], anchors[0]);
        assert_eq!(anchors[1152], [0.5 / 12.0, 0.5 / 12.0]);
    }
}
