use image::{Rgb, RgbImage};

/// Glyph width in font cells; each glyph is 3×5 with one cell of spacing.
const GLYPH_WIDTH: i32 = 3;
const GLYPH_HEIGHT: i32 = 5;

pub fn draw_polyline(image: &mut RgbImage, points: &[(f32, f32)], color: [u8; 3], thickness: i32) {
    match points {
        [] => {}
        [single] => draw_line(image, single, single, color, thickness),
        _ => {
            for pair in points.windows(2) {
                draw_line(image, &pair[0], &pair[1], color, thickness);
            }
        }
    }
}

/// Bresenham line with a diamond brush of the given thickness.
pub fn draw_line(
    image: &mut RgbImage,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 3],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(image, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

pub fn draw_circle(image: &mut RgbImage, center: (i32, i32), radius: i32, color: [u8; 3]) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(image, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Pixel size of `text` rendered at `scale`.
pub fn text_size(text: &str, scale: i32) -> (i32, i32) {
    let n = text.chars().count() as i32;
    if n == 0 {
        return (0, 0);
    }
    ((n * (GLYPH_WIDTH + 1) - 1) * scale, GLYPH_HEIGHT * scale)
}

pub fn draw_text(image: &mut RgbImage, x: i32, y: i32, text: &str, scale: i32, color: [u8; 3]) {
    let scale = scale.max(1);
    let mut cursor_x = x;
    for ch in text.chars() {
        draw_char(image, cursor_x, y, ch, scale, color);
        cursor_x += (GLYPH_WIDTH + 1) * scale;
    }
}

fn draw_char(image: &mut RgbImage, x: i32, y: i32, ch: char, scale: i32, color: [u8; 3]) {
    for (row, bits) in glyph(ch).iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    put_pixel_safe(
                        image,
                        x + col * scale + dx,
                        y + row as i32 * scale + dy,
                        color,
                    );
                }
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        '?' => [0b111, 0b001, 0b010, 0b000, 0b010],
        _ => [0b000; 5],
    }
}

fn put_pixel_safe(image: &mut RgbImage, x: i32, y: i32, color: [u8; 3]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= image.width() || uy >= image.height() {
        return;
    }
    image.put_pixel(ux, uy, Rgb(color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_covers_both_endpoints() {
        let mut img = RgbImage::new(20, 20);
        draw_line(&mut img, &(2.0, 3.0), &(15.0, 9.0), [255, 0, 0], 1);
        assert_eq!(img.get_pixel(2, 3).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(15, 9).0, [255, 0, 0]);
    }

    #[test]
    fn drawing_off_canvas_is_clipped() {
        let mut img = RgbImage::new(8, 8);
        draw_circle(&mut img, (-5, -5), 3, [1, 2, 3]);
        draw_text(&mut img, 6, 6, "HEART 0.5", 2, [9, 9, 9]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn text_size_accounts_for_scale() {
        assert_eq!(text_size("HEAD", 1), (15, 5));
        assert_eq!(text_size("HEAD", 2), (30, 10));
        assert_eq!(text_size("", 3), (0, 0));
    }
}
