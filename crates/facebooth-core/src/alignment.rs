//! Face alignment and paste-back via 4-DOF similarity transforms.
//!
//! Faces are warped into canonical square crops using five reference
//! landmarks and least-squares estimation; generated crops are composited
//! back into the host image through the inverse mapping.

use crate::types::Landmarks;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 crop.
pub const ARCFACE_REFERENCE_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// FFHQ reference landmarks for a 512×512 crop (GFPGAN alignment).
pub const FFHQ_REFERENCE_512: Landmarks = [
    (192.98138, 239.94708),
    (318.90277, 240.1936),
    (256.63416, 314.01935),
    (201.26117, 371.41043),
    (313.08905, 371.15118),
];

/// ArcFace reference landmarks for an arbitrary crop size.
///
/// Sizes that are multiples of 112 scale the reference directly; other sizes
/// scale by `size / 128` and shift right by `8 * ratio` (insightface layout).
pub fn arcface_reference(size: u32) -> Landmarks {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    ARCFACE_REFERENCE_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub fn estimate_similarity_transform(src: &Landmarks, dst: &Landmarks) -> [f32; 6] {
    // Overdetermined system A * [a, b, tx, ty]^T = B, two rows per point:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Invert a general 2×3 affine matrix. `None` when singular.
pub fn invert_affine(m: &[f32; 6]) -> Option<[f32; 6]> {
    let det = m[0] * m[4] - m[1] * m[3];
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let a = m[4] * inv_det;
    let b = -m[1] * inv_det;
    let d = -m[3] * inv_det;
    let e = m[0] * inv_det;
    let c = -(a * m[2] + b * m[5]);
    let f = -(d * m[2] + e * m[5]);
    Some([a, b, c, d, e, f])
}

fn apply(m: &[f32; 6], x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

/// Bilinear sample of `img` at sub-pixel position. Out-of-bounds reads are black.
fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |x: i32, y: i32| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = img.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    std::array::from_fn(|c| {
        tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy
    })
}

/// Warp `src` into an `out_size × out_size` crop.
///
/// `matrix` maps source coordinates to crop coordinates. Uses bilinear
/// interpolation; out-of-bounds pixels are filled with black.
pub fn warp_affine(src: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let Some(inv) = invert_affine(matrix) else {
        return RgbImage::new(out_size, out_size);
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let (sx, sy) = apply(&inv, ox as f32, oy as f32);
        let v = sample_bilinear(src, sx, sy);
        Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8))
    })
}

/// Align a face to a canonical square crop.
///
/// Returns the crop and the source→crop matrix needed for [`paste_back`].
pub fn align_face(
    image: &RgbImage,
    landmarks: &Landmarks,
    reference: &Landmarks,
    out_size: u32,
) -> (RgbImage, [f32; 6]) {
    let matrix = estimate_similarity_transform(landmarks, reference);
    (warp_affine(image, &matrix, out_size), matrix)
}

/// Composite an aligned `crop` back into `canvas`.
///
/// `matrix` is the canvas→crop transform returned by [`align_face`]. Only
/// pixels inside `clip` (`x0, y0, x1, y1`, exclusive upper bounds) whose
/// mapping lands inside the crop are written. Blending weight ramps from 0 at
/// the crop border to 1 at `feather` pixels inside it.
pub fn paste_back(
    canvas: &mut RgbImage,
    crop: &RgbImage,
    matrix: &[f32; 6],
    clip: (u32, u32, u32, u32),
    feather: f32,
) {
    let size_w = crop.width() as f32;
    let size_h = crop.height() as f32;
    let (x0, y0) = (clip.0, clip.1);
    let x1 = clip.2.min(canvas.width());
    let y1 = clip.3.min(canvas.height());

    for y in y0..y1 {
        for x in x0..x1 {
            let (cx, cy) = apply(matrix, x as f32, y as f32);
            if cx < 0.0 || cy < 0.0 || cx > size_w - 1.0 || cy > size_h - 1.0 {
                continue;
            }

            let border = cx.min(cy).min(size_w - 1.0 - cx).min(size_h - 1.0 - cy);
            let alpha = if feather > 0.0 {
                (border / feather).clamp(0.0, 1.0)
            } else {
                1.0
            };
            if alpha <= 0.0 {
                continue;
            }

            let fg = sample_bilinear(crop, cx, cy);
            let bg = canvas.get_pixel(x, y).0;
            let blended: [u8; 3] = std::array::from_fn(|c| {
                (fg[c] * alpha + bg[c] as f32 * (1.0 - alpha))
                    .round()
                    .clamp(0.0, 255.0) as u8
            });
            canvas.put_pixel(x, y, Rgb(blended));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = ARCFACE_REFERENCE_112;
        let m = estimate_similarity_transform(&pts, &pts);

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Landmarks at 2x scale → a ≈ 0.5
        let src = ARCFACE_REFERENCE_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity_transform(&src, &ARCFACE_REFERENCE_112);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_arcface_reference_128_offset() {
        let r = arcface_reference(128);
        assert!((r[0].0 - (38.2946 + 8.0)).abs() < 1e-4);
        assert!((r[0].1 - 51.6963).abs() < 1e-4);
        assert_eq!(arcface_reference(112), ARCFACE_REFERENCE_112);
    }

    #[test]
    fn test_invert_affine_roundtrip() {
        let m = [0.8, -0.3, 12.0, 0.3, 0.8, -4.0];
        let inv = invert_affine(&m).unwrap();
        let (x, y) = apply(&m, 31.0, 47.0);
        let (bx, by) = apply(&inv, x, y);
        assert!((bx - 31.0).abs() < 1e-3 && (by - 47.0).abs() < 1e-3);
    }

    #[test]
    fn test_invert_affine_singular() {
        assert!(invert_affine(&[0.0; 6]).is_none());
    }

    #[test]
    fn test_warp_output_size() {
        let img = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));
        let out = warp_affine(&img, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 112);
        assert_eq!(out.dimensions(), (112, 112));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the left eye should land near the reference left eye.
        let mut img = RgbImage::new(200, 200);
        let src: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5 {
            for dx in 0..5 {
                img.put_pixel(78 + dx, 58 + dy, Rgb([255, 255, 255]));
            }
        }

        let (aligned, _) = align_face(&img, &src, &ARCFACE_REFERENCE_112, 112);

        let ref_x = ARCFACE_REFERENCE_112[0].0.round() as u32;
        let ref_y = ARCFACE_REFERENCE_112[0].1.round() as u32;
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned.get_pixel(x, y).0[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }

    #[test]
    fn test_paste_back_respects_clip() {
        let mut canvas = RgbImage::from_pixel(100, 100, Rgb([10, 10, 10]));
        let crop = RgbImage::from_pixel(50, 50, Rgb([200, 200, 200]));
        // Canvas → crop: translate by (-20, -20), crop covers canvas [20, 70).
        let m = [1.0, 0.0, -20.0, 0.0, 1.0, -20.0];
        paste_back(&mut canvas, &crop, &m, (30, 30, 60, 60), 0.0);

        assert_eq!(canvas.get_pixel(45, 45).0, [200, 200, 200]);
        // Inside the crop footprint but outside the clip.
        assert_eq!(canvas.get_pixel(25, 25).0, [10, 10, 10]);
        assert_eq!(canvas.get_pixel(65, 65).0, [10, 10, 10]);
    }

    #[test]
    fn test_paste_back_feathers_edges() {
        let mut canvas = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let crop = RgbImage::from_pixel(50, 50, Rgb([200, 200, 200]));
        let m = [1.0, 0.0, -20.0, 0.0, 1.0, -20.0];
        paste_back(&mut canvas, &crop, &m, (0, 0, 100, 100), 10.0);

        let edge = canvas.get_pixel(21, 45).0[0];
        let centre = canvas.get_pixel(45, 45).0[0];
        assert!(edge < centre, "edge={edge} centre={centre}");
        assert_eq!(centre, 200);
        assert_eq!(canvas.get_pixel(5, 5).0, [0, 0, 0]);
    }
}
