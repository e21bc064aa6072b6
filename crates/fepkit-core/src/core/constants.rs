/// Boltzmann constant in kJ/(mol·K).
pub const BOLTZ: f64 = 0.008314462618;

/// Default simulation temperature in Kelvin.
pub const DEFAULT_TEMP: f64 = 300.0;

/// Default barostat pressure in bar.
pub const DEFAULT_PRESSURE: f64 = 1.0;

/// Coulomb prefactor 1/(4πε₀) in kJ·nm/(mol·e²).
pub const ONE_4PI_EPS0: f64 = 138.935456;

/// Converts a pressure-volume product from bar·nm³ to kJ/mol.
pub const BAR_NM3_TO_KJ_PER_MOL: f64 = 0.0602214076;

/// Thermal energy kT in kJ/mol.
#[inline]
pub fn kbt(temperature: f64) -> f64 {
    BOLTZ * temperature
}

/// Inverse thermal energy β = 1/kT in mol/kJ.
#[inline]
pub fn beta(temperature: f64) -> f64 {
    1.0 / kbt(temperature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kbt_at_room_temperature_is_about_2_494_kj_per_mol() {
        assert!((kbt(DEFAULT_TEMP) - 2.494).abs() < 1e-3);
    }

    #[test]
    fn beta_is_reciprocal_of_kbt() {
        let t = 310.0;
        assert!((beta(t) * kbt(t) - 1.0).abs() < 1e-15);
    }
}
