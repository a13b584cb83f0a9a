use crate::detect::FacialLandmarks;
use image::{Rgb, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("Failed to compute similarity transform")]
    DegenerateLandmarks,
    #[error("Singular transform matrix")]
    SingularTransform,
}

/// Output size for aligned faces, matching the embedding model input
pub const ALIGNED_SIZE: u32 = 112;

/// Canonical ArcFace landmark positions for a 112x112 crop
const CANONICAL_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Warp a face to the canonical landmark positions for embedding.
pub fn align(image: &RgbImage, landmarks: &FacialLandmarks) -> Result<RgbImage, AlignmentError> {
    let src = [
        landmarks.left_eye,
        landmarks.right_eye,
        landmarks.nose,
        landmarks.left_mouth,
        landmarks.right_mouth,
    ];

    let transform = similarity_transform(&src, &CANONICAL_LANDMARKS)
        .ok_or(AlignmentError::DegenerateLandmarks)?;

    warp_affine(image, &transform, ALIGNED_SIZE, ALIGNED_SIZE)
}

/// Least-squares similarity transform from source to destination points.
/// Returns [a, b, tx, ty] where x' = a*x - b*y + tx and y' = b*x + a*y + ty.
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<[f32; 4]> {
    let n = src.len() as f32;

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_u = 0.0;
    let mut sum_v = 0.0;
    let mut sum_xx_yy = 0.0;
    let mut sum_ux_vy = 0.0;
    let mut sum_vx_uy = 0.0;

    for (&(x, y), &(u, v)) in src.iter().zip(dst.iter()) {
        sum_x += x;
        sum_y += y;
        sum_u += u;
        sum_v += v;
        sum_xx_yy += x * x + y * y;
        sum_ux_vy += u * x + v * y;
        sum_vx_uy += v * x - u * y;
    }

    let denom = n * sum_xx_yy - sum_x * sum_x - sum_y * sum_y;
    if denom.abs() < 1e-6 {
        return None;
    }

    let a = (n * sum_ux_vy - sum_u * sum_x - sum_v * sum_y) / denom;
    let b = (n * sum_vx_uy + sum_u * sum_y - sum_v * sum_x) / denom;
    let tx = (sum_u - a * sum_x + b * sum_y) / n;
    let ty = (sum_v - b * sum_x - a * sum_y) / n;

    Some([a, b, tx, ty])
}

/// Backward-mapping affine warp with bilinear sampling.
fn warp_affine(
    image: &RgbImage,
    transform: &[f32; 4],
    out_width: u32,
    out_height: u32,
) -> Result<RgbImage, AlignmentError> {
    let [a, b, tx, ty] = *transform;

    let det = a * a + b * b;
    if det.abs() < 1e-6 {
        return Err(AlignmentError::SingularTransform);
    }
    let a_inv = a / det;
    let b_inv = -b / det;

    let mut output = RgbImage::new(out_width, out_height);

    for y_out in 0..out_height {
        for x_out in 0..out_width {
            let dx = x_out as f32 - tx;
            let dy = y_out as f32 - ty;
            let x_in = a_inv * dx - b_inv * dy;
            let y_in = b_inv * dx + a_inv * dy;

            output.put_pixel(x_out, y_out, sample_bilinear(image, x_in, y_in));
        }
    }

    Ok(output)
}

fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    if x0 < 0 || y0 < 0 || x1 >= image.width() as i32 || y1 >= image.height() as i32 {
        // Out of bounds maps to black
        return Rgb([0, 0, 0]);
    }

    let x_frac = x - x0 as f32;
    let y_frac = y - y0 as f32;

    let p00 = image.get_pixel(x0 as u32, y0 as u32);
    let p10 = image.get_pixel(x1 as u32, y0 as u32);
    let p01 = image.get_pixel(x0 as u32, y1 as u32);
    let p11 = image.get_pixel(x1 as u32, y1 as u32);

    let mut pixel = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - x_frac) + p10[c] as f32 * x_frac;
        let bottom = p01[c] as f32 * (1.0 - x_frac) + p11[c] as f32 * x_frac;
        let value = top * (1.0 - y_frac) + bottom * y_frac;
        pixel[c] = value.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(pixel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let transform =
            similarity_transform(&CANONICAL_LANDMARKS, &CANONICAL_LANDMARKS).unwrap();

        assert!((transform[0] - 1.0).abs() < 0.1);
        assert!(transform[1].abs() < 0.1);
        assert!(transform[2].abs() < 0.1);
        assert!(transform[3].abs() < 0.1);
    }

    #[test]
    fn test_translation_transform() {
        let mut src = CANONICAL_LANDMARKS;
        for point in &mut src {
            point.0 += 10.0;
            point.1 += 20.0;
        }

        let transform = similarity_transform(&src, &CANONICAL_LANDMARKS).unwrap();

        assert!((transform[0] - 1.0).abs() < 0.1);
        assert!(transform[1].abs() < 0.1);
        assert!((transform[2] + 10.0).abs() < 1.0);
        assert!((transform[3] + 20.0).abs() < 1.0);
    }

    #[test]
    fn test_align_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]));
        let landmarks = FacialLandmarks {
            left_eye: (280.0, 200.0),
            right_eye: (360.0, 200.0),
            nose: (320.0, 250.0),
            left_mouth: (290.0, 300.0),
            right_mouth: (350.0, 300.0),
        };

        let aligned = align(&image, &landmarks).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }
}
