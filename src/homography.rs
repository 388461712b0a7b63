// homography.rs — Planar projective geometry for board tracking.
//
// The PCB is flat, so the motion of every point on it between the reference
// frame and the current frame is one 3×3 homography H:
//
//   [u v w]^T = H · [x y 1]^T,    (x', y') = (u / w, v / w)
//
// This module provides:
//   perspective_transform()      exact H from 4 correspondences (8×8 solve)
//   find_homography_dlt()        least-squares H from ≥4 correspondences,
//                                Hartley-normalised DLT via the 9×9 normal
//                                matrix and its smallest eigenvector
//   estimate_homography_ransac() robust H with a fixed iteration budget
//   warp_perspective()           resample an image through H
//
// RANSAC uses a seeded xorshift generator and, with confidence 1.0, never
// stops early: identical matches always give an identical homography, and
// each call costs the same.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::image::{interpolate_bilinear, Image};

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Point2 { x, y }
    }

    /// Nearest integer pixel.
    pub fn round(&self) -> (i64, i64) {
        (self.x.round() as i64, self.y.round() as i64)
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<(f32, f32)> for Point2 {
    fn from((x, y): (f32, f32)) -> Self {
        Point2 { x, y }
    }
}

/// A 3×3 projective transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    pub fn identity() -> Self {
        Homography(Matrix3::identity())
    }

    /// Translation by (dx, dy).
    pub fn translation(dx: f64, dy: f64) -> Self {
        Homography(Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Map a point through H. A point sent to infinity comes back with
    /// non-finite coordinates.
    pub fn apply(&self, p: Point2) -> Point2 {
        let v = self.0 * Vector3::new(p.x as f64, p.y as f64, 1.0);
        Point2::new((v.x / v.z) as f32, (v.y / v.z) as f32)
    }

    pub fn inverse(&self) -> Option<Homography> {
        self.0.try_inverse().map(Homography)
    }

    /// Compose: `self.then(next)` maps p to `next(self(p))`.
    pub fn then(&self, next: &Homography) -> Homography {
        Homography(next.0 * self.0)
    }

    /// Scale so that h22 = 1 when possible.
    fn normalized(self) -> Homography {
        let h22 = self.0[(2, 2)];
        if h22.abs() > 1e-12 {
            Homography(self.0 / h22)
        } else {
            self
        }
    }

    fn is_usable(&self) -> bool {
        self.0.iter().all(|v| v.is_finite()) && self.0.determinant().abs() > 1e-12
    }
}

// ============================================================
// Four-point transform
// ============================================================

/// Exact homography taking `src[i]` to `dst[i]` for four point pairs.
///
/// Solves the 8×8 system obtained by fixing h22 = 1. Returns `None` for
/// degenerate input (three collinear points).
pub fn perspective_transform(src: &[Point2; 4], dst: &[Point2; 4]) -> Option<Homography> {
    if has_collinear_triple(src) || has_collinear_triple(dst) {
        return None;
    }
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let (x, y) = (src[i].x as f64, src[i].y as f64);
        let (u, v) = (dst[i].x as f64, dst[i].y as f64);
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -x * u;
        a[(r, 7)] = -y * u;
        b[r] = u;
        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -x * v;
        a[(r + 1, 7)] = -y * v;
        b[r + 1] = v;
    }
    let h = a.lu().solve(&b)?;
    let hom = Homography(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0));
    hom.is_usable().then_some(hom)
}

// ============================================================
// Normalised DLT
// ============================================================

/// Least-squares homography from `from[i] → to[i]`, at least 4 pairs.
pub fn find_homography_dlt(from: &[Point2], to: &[Point2]) -> Option<Homography> {
    assert_eq!(from.len(), to.len(), "point lists must have equal length");
    if from.len() < 4 {
        return None;
    }

    // Condition both point sets: centroid at the origin, mean distance √2.
    let t_from = hartley(from)?;
    let t_to = hartley(to)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (p, q) in from.iter().zip(to) {
        let (x, y) = apply3(&t_from, p);
        let (u, v) = apply3(&t_to, q);
        let rows = [
            [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
            [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
        ];
        for a in &rows {
            for i in 0..9 {
                for j in 0..9 {
                    ata[(i, j)] += a[i] * a[j];
                }
            }
        }
    }

    // The solution is the eigenvector of AᵀA with the smallest eigenvalue.
    let eig = ata.symmetric_eigen();
    let h = eig.eigenvectors.column(eig.eigenvalues.imin());
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let denorm = t_to.try_inverse()? * hn * t_from;
    let hom = Homography(denorm).normalized();
    hom.is_usable().then_some(hom)
}

fn hartley(points: &[Point2]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let my = points.iter().map(|p| p.y as f64).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x as f64 - mx).powi(2) + (p.y as f64 - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0))
}

fn apply3(t: &Matrix3<f64>, p: &Point2) -> (f64, f64) {
    let v = t * Vector3::new(p.x as f64, p.y as f64, 1.0);
    (v.x / v.z, v.y / v.z)
}

// ============================================================
// RANSAC
// ============================================================

/// RANSAC configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Iteration budget.
    pub max_iterations: usize,
    /// Inlier threshold: maximum reprojection error in pixels.
    pub threshold: f32,
    /// Confidence level. Below 1.0 the budget shrinks as the inlier ratio
    /// improves; at 1.0 every iteration runs.
    pub confidence: f64,
    /// Seed of the sampling generator.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        RansacConfig {
            max_iterations: 2000,
            threshold: 6.0,
            confidence: 1.0,
            seed: 42,
        }
    }
}

/// Result of robust homography estimation.
#[derive(Debug, Clone)]
pub struct HomographyResult {
    pub homography: Homography,
    /// Inlier mask, parallel to the input correspondences.
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// Iterations actually run.
    pub iterations: usize,
}

/// Estimate `from → to` with RANSAC, then refit on the inliers.
///
/// Returns `None` with fewer than 4 correspondences or when no sample
/// yields a model supported by at least 4 inliers.
pub fn estimate_homography_ransac(
    from: &[Point2],
    to: &[Point2],
    config: &RansacConfig,
) -> Option<HomographyResult> {
    assert_eq!(from.len(), to.len(), "point lists must have equal length");
    let n = from.len();
    if n < 4 {
        return None;
    }

    let mut rng = SimpleRng::new(config.seed);
    let mut best: Option<(Homography, Vec<bool>, usize)> = None;
    let mut budget = config.max_iterations;
    let mut iterations = 0;

    while iterations < budget {
        iterations += 1;

        let idx = sample_4(&mut rng, n);
        let src = idx.map(|i| from[i]);
        let dst = idx.map(|i| to[i]);
        let Some(h) = perspective_transform(&src, &dst) else {
            continue;
        };

        let (mask, count) = inlier_mask(&h, from, to, config.threshold);
        if best.as_ref().map_or(true, |(_, _, c)| count > *c) {
            if config.confidence < 1.0 {
                let w = count as f64 / n as f64;
                let p_fail = (1.0 - w.powi(4)).clamp(1e-15, 1.0 - 1e-15);
                let k = (1.0 - config.confidence).ln() / p_fail.ln();
                budget = (k.ceil().max(1.0) as usize).min(config.max_iterations);
            }
            best = Some((h, mask, count));
        }
    }

    let (h, mask, count) = best?;
    if count < 4 {
        return None;
    }

    let inlier_from: Vec<Point2> = select(from, &mask);
    let inlier_to: Vec<Point2> = select(to, &mask);
    if let Some(refined) = find_homography_dlt(&inlier_from, &inlier_to) {
        let (refined_mask, refined_count) = inlier_mask(&refined, from, to, config.threshold);
        if refined_count >= count {
            return Some(HomographyResult {
                homography: refined,
                inliers: refined_mask,
                num_inliers: refined_count,
                iterations,
            });
        }
    }
    Some(HomographyResult {
        homography: h,
        inliers: mask,
        num_inliers: count,
        iterations,
    })
}

/// Forward reprojection error `|H·p − q|`.
pub fn reprojection_error(h: &Homography, p: &Point2, q: &Point2) -> f32 {
    let m = h.apply(*p);
    let e = m.distance(q);
    if e.is_finite() {
        e
    } else {
        f32::MAX
    }
}

fn inlier_mask(h: &Homography, from: &[Point2], to: &[Point2], threshold: f32) -> (Vec<bool>, usize) {
    let mask: Vec<bool> = from
        .iter()
        .zip(to)
        .map(|(p, q)| reprojection_error(h, p, q) <= threshold)
        .collect();
    let count = mask.iter().filter(|&&m| m).count();
    (mask, count)
}

fn select(points: &[Point2], mask: &[bool]) -> Vec<Point2> {
    points
        .iter()
        .zip(mask)
        .filter(|(_, &keep)| keep)
        .map(|(p, _)| *p)
        .collect()
}

fn has_collinear_triple(p: &[Point2; 4]) -> bool {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    TRIPLES.iter().any(|&(a, b, c)| {
        let area = (p[b].x - p[a].x) * (p[c].y - p[a].y) - (p[b].y - p[a].y) * (p[c].x - p[a].x);
        area.abs() < 1e-3
    })
}

// ============================================================
// Warping
// ============================================================

/// Resample `src` into a `width × height` image through `h`, where `h`
/// maps source coordinates to destination coordinates.
///
/// Each destination pixel is pulled from `h⁻¹ · (x, y)` with bilinear
/// interpolation; pixels that map outside the source are 0. Samples within
/// `WARP_EDGE_TOLERANCE` of the source edge are pulled onto it, so a
/// quadrilateral touching the frame edge does not lose its rim to rounding.
pub fn warp_perspective(src: &Image<f32>, h: &Homography, width: usize, height: usize) -> Image<f32> {
    let Some(inv) = h.inverse() else {
        return Image::new(width, height);
    };
    let max_x = src.width().saturating_sub(1) as f32;
    let max_y = src.height().saturating_sub(1) as f32;
    let snap = |v: f32, max: f32| {
        if v < 0.0 && v > -WARP_EDGE_TOLERANCE {
            0.0
        } else if v > max && v < max + WARP_EDGE_TOLERANCE {
            max
        } else {
            v
        }
    };
    Image::from_fn(width, height, |x, y| {
        let s = inv.apply(Point2::new(x as f32, y as f32));
        interpolate_bilinear(src, snap(s.x, max_x), snap(s.y, max_y)).unwrap_or(0.0)
    })
}

const WARP_EDGE_TOLERANCE: f32 = 1e-3;

// ============================================================
// Simple PRNG (xorshift64)
// ============================================================

struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        SimpleRng { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    fn next_usize(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Four distinct indices from `[0, n)`.
fn sample_4(rng: &mut SimpleRng, n: usize) -> [usize; 4] {
    let mut sample = [0usize; 4];
    let mut count = 0;
    while count < 4 {
        let idx = rng.next_usize(n);
        if !sample[..count].contains(&idx) {
            sample[count] = idx;
            count += 1;
        }
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn known_h() -> Homography {
        Homography(Matrix3::new(
            1.02, 0.03, 5.0, //
            -0.02, 0.98, -3.0, //
            1e-4, -5e-5, 1.0,
        ))
    }

    fn grid_points() -> Vec<Point2> {
        let mut pts = Vec::new();
        for j in 0..6 {
            for i in 0..7 {
                pts.push(Point2::new(20.0 + 40.0 * i as f32, 15.0 + 35.0 * j as f32));
            }
        }
        pts
    }

    fn assert_h_close(a: &Homography, b: &Homography, eps: f64) {
        for (x, y) in a.0.iter().zip(b.0.iter()) {
            assert_relative_eq!(x, y, epsilon = eps);
        }
    }

    #[test]
    fn test_apply_translation() {
        let p = Homography::translation(3.0, -2.0).apply(Point2::new(1.0, 1.0));
        assert_eq!(p, Point2::new(4.0, -1.0));
    }

    #[test]
    fn test_then_composes() {
        let a = Homography::translation(1.0, 0.0);
        let b = Homography(Matrix3::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0));
        let p = a.then(&b).apply(Point2::new(1.0, 1.0));
        assert_eq!(p, Point2::new(4.0, 2.0));
    }

    #[test]
    fn test_perspective_transform_unit_square() {
        let src = [
            Point2::new(10.0, 10.0),
            Point2::new(90.0, 20.0),
            Point2::new(80.0, 95.0),
            Point2::new(5.0, 70.0),
        ];
        let dst = [
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(100.0, 100.0),
            Point2::new(0.0, 100.0),
        ];
        let h = perspective_transform(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let m = h.apply(*s);
            assert!(m.distance(d) < 1e-3, "{s:?} → {m:?}, expected {d:?}");
        }
    }

    #[test]
    fn test_perspective_transform_degenerate() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 2.0),
            Point2::new(3.0, 3.0),
        ];
        let dst = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        assert!(perspective_transform(&src, &dst).is_none());
    }

    #[test]
    fn test_dlt_noiseless() {
        let h = known_h();
        let from = grid_points();
        let to: Vec<Point2> = from.iter().map(|p| h.apply(*p)).collect();
        let est = find_homography_dlt(&from, &to).unwrap();
        assert_h_close(&est, &h, 1e-4);
    }

    #[test]
    fn test_dlt_too_few() {
        let p = [Point2::new(0.0, 0.0); 3];
        assert!(find_homography_dlt(&p, &p).is_none());
    }

    #[test]
    fn test_ransac_rejects_outliers() {
        let h = known_h();
        let from = grid_points();
        let mut to: Vec<Point2> = from.iter().map(|p| h.apply(*p)).collect();
        // Corrupt every fifth correspondence.
        for (i, q) in to.iter_mut().enumerate() {
            if i % 5 == 0 {
                q.x += 40.0 + i as f32;
                q.y -= 25.0;
            }
        }
        let res = estimate_homography_ransac(&from, &to, &RansacConfig::default()).unwrap();
        assert_eq!(res.num_inliers, from.len() - from.len().div_ceil(5));
        for (i, &inl) in res.inliers.iter().enumerate() {
            assert_eq!(inl, i % 5 != 0, "inlier flag wrong at {i}");
        }
        assert_h_close(&res.homography, &h, 1e-3);
    }

    #[test]
    fn test_ransac_runs_full_budget() {
        let h = known_h();
        let from = grid_points();
        let to: Vec<Point2> = from.iter().map(|p| h.apply(*p)).collect();
        let cfg = RansacConfig {
            max_iterations: 300,
            ..RansacConfig::default()
        };
        let res = estimate_homography_ransac(&from, &to, &cfg).unwrap();
        assert_eq!(res.iterations, 300);
    }

    #[test]
    fn test_ransac_deterministic() {
        let h = known_h();
        let from = grid_points();
        let mut to: Vec<Point2> = from.iter().map(|p| h.apply(*p)).collect();
        to[3].x += 0.7;
        to[11].y -= 1.1;
        let cfg = RansacConfig::default();
        let a = estimate_homography_ransac(&from, &to, &cfg).unwrap();
        let b = estimate_homography_ransac(&from, &to, &cfg).unwrap();
        assert_eq!(a.homography, b.homography);
    }

    #[test]
    fn test_ransac_too_few() {
        let p = [Point2::new(1.0, 2.0); 3];
        assert!(estimate_homography_ransac(&p, &p, &RansacConfig::default()).is_none());
    }

    #[test]
    fn test_warp_identity() {
        let src = Image::from_fn(8, 6, |x, y| (x + 10 * y) as f32);
        let out = warp_perspective(&src, &Homography::identity(), 8, 6);
        assert_eq!(out, src);
    }

    #[test]
    fn test_warp_translation_fills_zero_outside() {
        let src = Image::filled(5, 5, 7.0f32);
        let out = warp_perspective(&src, &Homography::translation(2.0, 0.0), 5, 5);
        assert_eq!(out.get(0, 2), 0.0);
        assert_eq!(out.get(1, 2), 0.0);
        assert_eq!(out.get(2, 2), 7.0);
        assert_eq!(out.get(4, 4), 7.0);
    }

    #[test]
    fn test_xorshift_sample_distinct() {
        let mut rng = SimpleRng::new(42);
        for _ in 0..100 {
            let s = sample_4(&mut rng, 6);
            for i in 0..4 {
                for j in i + 1..4 {
                    assert_ne!(s[i], s[j]);
                }
            }
        }
    }
}
