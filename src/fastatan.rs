use std::f32::consts::{FRAC_PI_2, PI};

const A1: f32 = -0.060317;
const A2: f32 = -0.198146;
const A3: f32 = 1.044261;
const A4: f32 = -0.002178;

/// Cubic fit of atan(z) on [0, 1], extended to [-1, 1] by odd symmetry
///
/// `A4` is not zero, so the result steps by `2 * A4` (about 0.0044 rad) as z
/// crosses zero. Either side stays within the fit error of atan.
#[inline]
fn atan_unit(z: f32) -> f32 {
    let a = z.abs();
    let p = (((A1 * a) + A2) * a + A3) * a + A4;
    if z < 0.0 {
        -p
    } else {
        p
    }
}

/// Fast four-quadrant arctangent
///
/// Approximates `y.atan2(x)` to within about 0.0022 rad using one division and
/// a cubic polynomial. Returns `0.0` for `(0, 0)`.
#[inline]
pub fn fast_atan2(y: f32, x: f32) -> f32 {
    if x == 0.0 {
        return if y > 0.0 {
            FRAC_PI_2
        } else if y < 0.0 {
            -FRAC_PI_2
        } else {
            0.0
        };
    }

    if x.abs() >= y.abs() {
        // Offset is +-PI (sign of y) in the left half-plane, zero otherwise
        let offset = if x.is_sign_negative() { PI.copysign(y) } else { 0.0 };
        offset + atan_unit(y / x)
    } else {
        // atan(y/x) = pi/2 - atan(x/y) for |y/x| > 1
        FRAC_PI_2.copysign(y) - atan_unit(x / y)
    }
}
