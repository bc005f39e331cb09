//! Thermal speed ↔ temperature conversion.
//!
//! Uses the most-probable-speed convention `vth = sqrt(2 k_B T / m)`, with
//! thermal speeds in km/s.

/// Boltzmann constant (J/K).
pub const BOLTZMANN: f64 = 1.380_649e-23;

/// Proton mass (kg).
pub const PROTON_MASS: f64 = 1.672_621_923_69e-27;

/// Temperature (K) to thermal speed (km/s) for a particle of mass `mass` (kg).
pub fn temp2vth(temp: f64, mass: f64) -> f64 {
    (2.0 * BOLTZMANN * temp / mass).sqrt() / 1e3
}

/// Thermal speed (km/s) to temperature (K) for a particle of mass `mass` (kg).
pub fn vth2temp(vth: f64, mass: f64) -> f64 {
    let v = vth * 1e3;
    mass * v * v / (2.0 * BOLTZMANN)
}
