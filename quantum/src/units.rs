use std::fmt::{self, Display};

/// Energy unit with a fixed factor to hartree.
pub trait EnergyUnit: Copy {
    const TO_AU_MUL: f64;
    const SYMBOL: &'static str;

    fn to_au(&self, value: f64) -> f64 {
        value * Self::TO_AU_MUL
    }
}

macro_rules! energy_unit {
    ($(#[$meta:meta])* $name:ident, $factor:expr, $symbol:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub struct $name;

        impl EnergyUnit for $name {
            const TO_AU_MUL: f64 = $factor;
            const SYMBOL: &'static str = $symbol;
        }
    };
}

energy_unit!(
    /// Hartree
    Au, 1.0, "Eh"
);
energy_unit!(Kelvin, 3.1668105e-6, "K");
energy_unit!(CmInv, 4.5563352812e-6, "cm-1");
energy_unit!(GHz, 1.51982850071586e-7, "GHz");
energy_unit!(MHz, 1.51982850071586e-10, "MHz");

/// Energy value tagged with its unit.
/// # Examples
/// ```
/// use quantum::units::{Energy, Kelvin, CmInv};
/// let collision = Energy(1e-3, Kelvin);
/// let hartree = collision.to_au();
/// let wavenumbers = collision.to(CmInv);
/// assert!((wavenumbers.to_au() - hartree).abs() < 1e-20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Energy<U: EnergyUnit>(pub f64, pub U);

impl<U: EnergyUnit> Energy<U> {
    pub fn to_au(&self) -> f64 {
        self.1.to_au(self.0)
    }

    pub fn to<V: EnergyUnit>(&self, unit: V) -> Energy<V> {
        Energy(self.to_au() / V::TO_AU_MUL, unit)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl<U: EnergyUnit> Display for Energy<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match f.precision() {
            Some(precision) => write!(f, "{:.*e} {}", precision, self.0, U::SYMBOL),
            None => write!(f, "{:e} {}", self.0, U::SYMBOL),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Au, CmInv, Energy, GHz, Kelvin, MHz};

    #[test]
    fn test_conversions() {
        let kelvin = Energy(1.0, Kelvin);
        let cm_inv = kelvin.to(CmInv);

        assert!((cm_inv.to_au() - kelvin.to_au()).abs() < 1e-18);
        assert!(cm_inv.value() > 0.6950 && cm_inv.value() < 0.6951);

        let mhz = Energy(2.5, GHz).to(MHz);
        assert!((mhz.value() - 2500.).abs() < 1e-9);
        assert_eq!(Energy(0.125, Au).to_au(), 0.125);
    }

    #[test]
    fn test_display() {
        assert_eq!(Energy(0.001, Kelvin).to_string(), "1e-3 K");
        assert_eq!(format!("{:.2}", Energy(1234.5, CmInv)), "1.23e3 cm-1");
    }
}
