//! Perspective rectification
//!
//! Solves the homography that sends the four marker centers onto the corners
//! of the template page and warps the photo into that canonical space.

use crate::error::ScanError;
use crate::template::Dimensions;
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::{Matrix3, SMatrix, SVector};

/// Smallest triangle, as a fraction of the quadrilateral area, any three
/// marker centers may span
const MIN_TRIANGLE_FRACTION: f64 = 0.01;
const MIN_DETERMINANT: f64 = 1e-6;

/// A sheet warped into canonical page coordinates
#[derive(Debug, Clone)]
pub struct Rectified {
    pub image: GrayImage,
    /// Photo to page mapping
    pub homography: Matrix3<f64>,
}

/// Warp `gray` so that the marker centers (TL, TR, BR, BL) land on the page
/// corners
pub fn rectify(
    gray: &GrayImage,
    centers: [(f32, f32); 4],
    page: Dimensions,
) -> Result<Rectified, ScanError> {
    let src = centers.map(|(x, y)| [x as f64, y as f64]);
    check_quadrilateral(&src)?;

    let (w, h) = ((page.width - 1) as f64, (page.height - 1) as f64);
    let dst = [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]];

    let homography = solve_homography(&src, &dst)?;
    let det = homography.determinant();
    if !det.is_finite() || det <= MIN_DETERMINANT {
        return Err(ScanError::PerspectiveDegenerate(format!(
            "homography determinant {:.3e} is not positive",
            det
        )));
    }

    let mut matrix = [0f32; 9];
    for row in 0..3 {
        for col in 0..3 {
            matrix[row * 3 + col] = homography[(row, col)] as f32;
        }
    }
    let projection = Projection::from_matrix(matrix).ok_or_else(|| {
        ScanError::PerspectiveDegenerate("homography is not invertible".to_string())
    })?;

    let mut image = GrayImage::new(page.width, page.height);
    warp_into(
        gray,
        &projection,
        Interpolation::Bilinear,
        Luma([255u8]),
        &mut image,
    );

    tracing::debug!(
        "Rectified {}x{} photo onto {}x{} page (det {:.4})",
        gray.width(),
        gray.height(),
        page.width,
        page.height,
        det
    );

    Ok(Rectified { image, homography })
}

/// Reject marker layouts that cannot come from a photographed sheet
fn check_quadrilateral(points: &[[f64; 2]; 4]) -> Result<(), ScanError> {
    let quad_area = shoelace_area(points);
    if !quad_area.is_finite() || quad_area < 1.0 {
        return Err(ScanError::PerspectiveDegenerate(format!(
            "marker quadrilateral has area {:.1}",
            quad_area
        )));
    }

    for skip in 0..4 {
        let mut triple = points
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .map(|(_, p)| *p);
        let (a, b, c) = match (triple.next(), triple.next(), triple.next()) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => continue,
        };
        let area = triangle_area(a, b, c);
        if area < MIN_TRIANGLE_FRACTION * quad_area {
            return Err(ScanError::PerspectiveDegenerate(format!(
                "three markers are nearly collinear (triangle area {:.1} of {:.1})",
                area, quad_area
            )));
        }
    }

    // Image y grows downward, so TL, TR, BR, BL turns right at every corner.
    for i in 0..4 {
        let p0 = points[i];
        let p1 = points[(i + 1) % 4];
        let p2 = points[(i + 2) % 4];
        let cross = (p1[0] - p0[0]) * (p2[1] - p1[1]) - (p1[1] - p0[1]) * (p2[0] - p1[0]);
        if cross <= 0.0 {
            return Err(ScanError::PerspectiveDegenerate(
                "markers do not form a convex, consistently ordered outline".to_string(),
            ));
        }
    }

    Ok(())
}

fn shoelace_area(points: &[[f64; 2]; 4]) -> f64 {
    let mut sum = 0.0;
    for i in 0..4 {
        let [x0, y0] = points[i];
        let [x1, y1] = points[(i + 1) % 4];
        sum += x0 * y1 - x1 * y0;
    }
    sum / 2.0
}

fn triangle_area(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    ((b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])).abs() / 2.0
}

/// Exact four-point homography with h33 = 1
///
/// Both point sets are scaled to unit size first to keep the 8x8 system well
/// conditioned at photo resolutions.
fn solve_homography(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Result<Matrix3<f64>, ScanError> {
    let src_scale = point_scale(src);
    let dst_scale = point_scale(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let (x, y) = (src[i][0] / src_scale, src[i][1] / src_scale);
        let (u, v) = (dst[i][0] / dst_scale, dst[i][1] / dst_scale);

        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;

        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }

    let h = a.lu().solve(&b).ok_or_else(|| {
        ScanError::PerspectiveDegenerate("marker positions give a singular system".to_string())
    })?;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(ScanError::PerspectiveDegenerate(
            "marker positions give a non-finite transform".to_string(),
        ));
    }

    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    let t_src = Matrix3::new(
        1.0 / src_scale,
        0.0,
        0.0,
        0.0,
        1.0 / src_scale,
        0.0,
        0.0,
        0.0,
        1.0,
    );
    let t_dst_inv = Matrix3::new(dst_scale, 0.0, 0.0, 0.0, dst_scale, 0.0, 0.0, 0.0, 1.0);
    let full = t_dst_inv * normalized * t_src;

    // Keep h33 = 1 so the determinant test is scale-independent of the solve.
    let h33 = full[(2, 2)];
    if h33.abs() < 1e-12 {
        return Err(ScanError::PerspectiveDegenerate(
            "homography maps the origin to infinity".to_string(),
        ));
    }
    Ok(full / h33)
}

fn point_scale(points: &[[f64; 2]; 4]) -> f64 {
    let largest = points
        .iter()
        .flat_map(|p| [p[0].abs(), p[1].abs()])
        .fold(0.0f64, f64::max);
    if largest > 0.0 {
        largest
    } else {
        1.0
    }
}
