//! The fixed loss surface under the gradient-descent race.
//!
//! The surface is a shallow bowl with one deep global basin and two
//! shallower decoy basins, plus a low-amplitude periodic ripple. The
//! basin curvatures are tuned so that learning rates near the upper
//! clamp visibly overshoot and diverge, while rates near the lower
//! clamp visibly stall. Changing these constants changes what the
//! exercise teaches, so treat them as part of the contract.

/// Constant lift keeping most of the surface above zero.
pub const OFFSET: f64 = 3.0;

const BOWL_K: f64 = 0.012;
const NOISE_AMP: f64 = 0.08;
const NOISE_FREQ: f64 = 1.7;

struct Basin {
    cx: f64,
    cz: f64,
    depth: f64,
    width: f64,
}

/// The deepest basin; the intended finish region.
const GLOBAL_BASIN: Basin = Basin {
    cx: 0.0,
    cz: 2.0,
    depth: 2.5,
    width: 1.0,
};

const LOCAL_BASIN_1: Basin = Basin {
    cx: -2.5,
    cz: -1.5,
    depth: 1.2,
    width: 0.7,
};

const LOCAL_BASIN_2: Basin = Basin {
    cx: 2.5,
    cz: -2.0,
    depth: 0.9,
    width: 0.6,
};

impl Basin {
    fn height(&self, x: f64, z: f64) -> f64 {
        let dx = x - self.cx;
        let dz = z - self.cz;
        -self.depth * (-(dx * dx + dz * dz) / self.width).exp()
    }

    fn gradient(&self, x: f64, z: f64) -> (f64, f64) {
        let dx = x - self.cx;
        let dz = z - self.cz;
        let e = (-(dx * dx + dz * dz) / self.width).exp();
        let scale = 2.0 * self.depth / self.width;
        (scale * dx * e, scale * dz * e)
    }
}

/// Evaluates the surface height at (x, z).
pub fn loss(x: f64, z: f64) -> f64 {
    let bowl = BOWL_K * (x * x + z * z);
    let noise = NOISE_AMP * (NOISE_FREQ * x).sin() * (NOISE_FREQ * z).sin();
    bowl + GLOBAL_BASIN.height(x, z)
        + LOCAL_BASIN_1.height(x, z)
        + LOCAL_BASIN_2.height(x, z)
        + noise
        + OFFSET
}

/// Analytic gradient of [`loss`] at (x, z).
pub fn gradient(x: f64, z: f64) -> (f64, f64) {
    let (g1x, g1z) = GLOBAL_BASIN.gradient(x, z);
    let (g2x, g2z) = LOCAL_BASIN_1.gradient(x, z);
    let (g3x, g3z) = LOCAL_BASIN_2.gradient(x, z);

    let noise_x = NOISE_AMP * NOISE_FREQ * (NOISE_FREQ * x).cos() * (NOISE_FREQ * z).sin();
    let noise_z = NOISE_AMP * NOISE_FREQ * (NOISE_FREQ * x).sin() * (NOISE_FREQ * z).cos();

    let gx = 2.0 * BOWL_K * x + g1x + g2x + g3x + noise_x;
    let gz = 2.0 * BOWL_K * z + g1z + g2z + g3z + noise_z;
    (gx, gz)
}

/// Center of the global minimum region, used for placement checks.
pub fn global_minimum_center() -> (f64, f64) {
    (GLOBAL_BASIN.cx, GLOBAL_BASIN.cz)
}
