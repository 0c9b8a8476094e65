//! Rounding helpers shared by the derived summary fields.

/// Magnitudes below this are reported as exactly zero.
const NOISE_FLOOR: f64 = 1e-10;
/// Scale of the final residue-stripping round (ten decimals).
const TRUNCATE: f64 = 1e10;

/// Keep four significant digits.
///
/// Values whose magnitude is below `1e-10` collapse to `0.0`, and a final
/// rounding at ten decimals strips residue such as `6.470000000000001`.
pub fn precision4(n: f64) -> f64 {
    let abs = n.abs();
    if abs < NOISE_FLOOR {
        return 0.0;
    }
    let magnitude = 10f64.powf(abs.log10().floor() + 1.0);
    let rounded = (n / magnitude * 10_000.0).round() / 10_000.0 * magnitude;
    (rounded * TRUNCATE).round() / TRUNCATE
}

/// Round to three decimals (fee rates in sat/vB).
pub fn precision3_decimals(n: f64) -> f64 {
    (n * 1000.0).round() / 1000.0
}
