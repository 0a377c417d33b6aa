//! Motor-induced magnetic cross-talk compensation.
//!
//! Each motor's current leaves a DC bias on the compass that grows with its
//! PWM setting. The per-motor, per-axis fit `f(p) = a·√p + b·p^¼ + c` was
//! obtained from a one-time sweep of each motor against the stationary
//! compass; the coefficients are baked into the build.

/// Motors at or below this PWM are treated as idle and left uncompensated.
pub const MAG_PWM_THRESHOLD: u32 = 1800;

/// Fit coefficients, indexed `[motor][axis][a, b, c]`.
pub const MAG_CORR: [[[f32; 3]; 3]; 4] = [
    [
        [6.61611606211, -98.902117397, 364.170847984],
        [3.25212997028, -48.7697238694, 179.022788776],
        [-7.37160176497, 111.834418395, -412.447306945],
    ],
    [
        [5.50903764712, -82.0980156356, 301.453031647],
        [4.07467179477, -63.7918721595, 249.373180638],
        [3.24067398825, -50.4595212277, 190.858825857],
    ],
    [
        [-13.3460228282, 200.930820024, -739.962719004],
        [29.3057756656, -445.783984334, 1662.17393418],
        [19.629876404, -295.721326047, 1091.7205143],
    ],
    [
        [-14.6725557049, 217.001761933, -786.753669073],
        [-17.2872454836, 259.179108995, -952.302481154],
        [-21.5664086508, 323.717279288, -1190.54567997],
    ],
];

/// Field contribution of one motor on one axis at PWM `power`.
pub fn fit(power: u32, t: &[f32; 3]) -> f32 {
    let p = power as f32;
    t[0] * p.sqrt() + t[1] * p.powf(0.25) + t[2]
}

/// Subtract every spinning motor's field from the filtered compass
/// estimate. The threshold is strictly greater-than: a motor at exactly
/// 1800 is still idle.
pub fn compensate(power: &[u32; 4], mag_est: &mut [f32; 3]) {
    for (i, &p) in power.iter().enumerate() {
        if p > MAG_PWM_THRESHOLD {
            for (j, est) in mag_est.iter_mut().enumerate() {
                *est -= fit(p, &MAG_CORR[i][j]);
            }
        }
    }
}
