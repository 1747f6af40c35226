use std::ops::{Add, Mul, Sub};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::foundation::core::{BandSpecification, OutputBuffer};
use crate::foundation::error::BandResult;
use crate::unit::thread::BandRenderer;

/// Samples per pixel used when the run does not specify any.
pub const DEFAULT_SAMPLES_PER_PIXEL: u32 = 8;

/// Progressive reference renderer: a normal-shaded sphere in front of a sky gradient.
///
/// Each pass adds one jittered sample per pixel and emits the averaged band, so the unit reports
/// `progress = pass / samples_per_pixel`. Jitter comes from one RNG stream per image row keyed
/// by the run seed, which makes the composited image independent of how rows were banded.
#[derive(Clone, Copy, Debug, Default)]
pub struct GradientSphereRenderer;

impl GradientSphereRenderer {
    /// Create the renderer.
    pub fn new() -> Self {
        Self
    }
}

impl BandRenderer for GradientSphereRenderer {
    #[tracing::instrument(skip(self, emit), fields(rows = ?spec.rows()))]
    fn render(
        &self,
        spec: &BandSpecification,
        emit: &mut dyn FnMut(f64, OutputBuffer),
    ) -> BandResult<()> {
        spec.validate()?;
        if spec.is_empty() {
            emit(1.0, OutputBuffer::default());
            return Ok(());
        }

        let samples = spec
            .samples_per_pixel
            .unwrap_or(DEFAULT_SAMPLES_PER_PIXEL)
            .max(1);
        let seed = spec.random_seed.unwrap_or(0);
        let camera = Camera::new(spec.image_width, spec.image_height);

        let width = spec.draw_width as usize;
        let height = spec.draw_height as usize;
        let mut accum = vec![Vec3::ZERO; width * height];
        let mut rows: Vec<StdRng> = (0..spec.draw_height)
            .map(|r| StdRng::seed_from_u64(row_seed(seed, spec.draw_offset_y + r)))
            .collect();

        for pass in 1..=samples {
            for (r, rng) in rows.iter_mut().enumerate() {
                let y = f64::from(spec.draw_offset_y) + r as f64;
                let line = &mut accum[r * width..(r + 1) * width];
                for (c, px) in line.iter_mut().enumerate() {
                    let x = f64::from(spec.draw_offset_x) + c as f64;
                    let (jx, jy) = if samples == 1 {
                        (0.5, 0.5)
                    } else {
                        (rng.r#gen::<f64>(), rng.r#gen::<f64>())
                    };
                    *px = *px + camera.color(x + jx, y + jy);
                }
            }
            emit(
                f64::from(pass) / f64::from(samples),
                OutputBuffer::new(resolve(&accum, pass)),
            );
        }
        Ok(())
    }
}

fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn row_seed(seed: u64, row: u32) -> u64 {
    mix64(seed ^ mix64(u64::from(row).wrapping_add(0x9E37_79B9_7F4A_7C15)))
}

fn resolve(accum: &[Vec3], samples: u32) -> Vec<u8> {
    let scale = 1.0 / f64::from(samples);
    let mut out = Vec::with_capacity(accum.len() * 4);
    for c in accum {
        let c = *c * scale;
        out.extend_from_slice(&[to_u8(c.x), to_u8(c.y), to_u8(c.z), 255]);
    }
    out
}

fn to_u8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.999) as u8
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Vec3 {
    x: f64,
    y: f64,
    z: f64,
}

impl Vec3 {
    const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn dot(self, o: Self) -> f64 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    fn length_squared(self) -> f64 {
        self.dot(self)
    }

    fn unit(self) -> Self {
        self * (1.0 / self.length_squared().sqrt())
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, o: Self) -> Self {
        Self::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, o: Self) -> Self {
        Self::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

const SPHERE_CENTER: Vec3 = Vec3::new(0.0, 0.0, -1.0);
const SPHERE_RADIUS: f64 = 0.5;
const WHITE: Vec3 = Vec3::new(1.0, 1.0, 1.0);
const LIGHT_BLUE: Vec3 = Vec3::new(0.5, 0.7, 1.0);

/// Pinhole camera at the origin looking down -z with a viewport 2 units tall.
struct Camera {
    width: f64,
    height: f64,
    lower_left: Vec3,
    horizontal: Vec3,
    vertical: Vec3,
}

impl Camera {
    fn new(width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height.max(1)));
        let viewport_h = 2.0;
        let viewport_w = w / h * viewport_h;
        let horizontal = Vec3::new(viewport_w, 0.0, 0.0);
        let vertical = Vec3::new(0.0, viewport_h, 0.0);
        let lower_left = Vec3::ZERO - horizontal * 0.5 - vertical * 0.5 - Vec3::new(0.0, 0.0, 1.0);
        Self {
            width: w,
            height: h,
            lower_left,
            horizontal,
            vertical,
        }
    }

    /// Color seen through image coordinates `(px, py)`, with row 0 at the top.
    fn color(&self, px: f64, py: f64) -> Vec3 {
        let u = px / self.width;
        let v = 1.0 - py / self.height;
        let dir = self.lower_left + self.horizontal * u + self.vertical * v;

        if let Some(t) = hit_sphere(dir) {
            let n = (dir * t - SPHERE_CENTER).unit();
            return Vec3::new(n.x + 1.0, n.y + 1.0, n.z + 1.0) * 0.5;
        }

        let t = 0.5 * (dir.unit().y + 1.0);
        WHITE * (1.0 - t) + LIGHT_BLUE * t
    }
}

/// Nearest positive hit distance of a ray from the origin along `dir`.
fn hit_sphere(dir: Vec3) -> Option<f64> {
    let oc = Vec3::ZERO - SPHERE_CENTER;
    let a = dir.length_squared();
    let half_b = oc.dot(dir);
    let c = oc.length_squared() - SPHERE_RADIUS * SPHERE_RADIUS;
    let discriminant = half_b * half_b - a * c;
    if discriminant < 0.0 {
        return None;
    }
    let t = (-half_b - discriminant.sqrt()) / a;
    (t > 0.0).then_some(t)
}

#[cfg(test)]
#[path = "../../tests/unit/render/gradient.rs"]
mod tests;
