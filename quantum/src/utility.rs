//! Riccati-Bessel functions for the asymptotic matching.
//!
//! Equation numbers refer to Abramowitz and Stegun, "Handbook of Mathematical Functions".

/// Riccati-Bessel function of the first kind, `x j_n(x)` (eq. 10.3.2).
pub fn riccati_j(n: u32, x: f64) -> f64 {
    let (sin, cos) = x.sin_cos();
    upward(n, x, sin, sin / x - cos, Recurrence::Spherical)
}

/// Riccati-Bessel function of the third kind taken with the sign `-x y_n(x)` (eq. 10.3.2).
pub fn riccati_n(n: u32, x: f64) -> f64 {
    let (sin, cos) = x.sin_cos();
    upward(n, x, cos, cos / x + sin, Recurrence::Spherical)
}

/// `î_n(x_1) / î_n(x_2)` of the modified Riccati-Bessel function
/// `î_n(x) = sqrt(pi x / 2) I_{n+1/2}(x)` (eq. 10.2.2).
///
/// Both values are computed with `e^x` factored out, which keeps the ratio finite
/// far into the classically forbidden region.
pub fn ratio_riccati_i(n: u32, x_1: f64, x_2: f64) -> f64 {
    let scaled = |x: f64| {
        let decay = f64::exp(-2. * x);
        let i_0 = (1. - decay) / 2.;
        let i_1 = (1. + decay) / 2. - (1. - decay) / (2. * x);

        upward(n, x, i_0, i_1, Recurrence::Modified)
    };

    f64::exp(x_1 - x_2) * scaled(x_1) / scaled(x_2)
}

/// `k̂_n(x_1) / k̂_n(x_2)` of the modified Riccati-Bessel function
/// `k̂_n(x) = sqrt(2 x / pi) K_{n+1/2}(x)` (eq. 10.2.4), with `e^-x` factored out.
pub fn ratio_riccati_k(n: u32, x_1: f64, x_2: f64) -> f64 {
    // (-1)^(n+1) k̂_n e^x, the sign cancels in the ratio
    let scaled = |x: f64| upward(n, x, -1., 1. + 1. / x, Recurrence::Modified);

    f64::exp(x_2 - x_1) * scaled(x_1) / scaled(x_2)
}

#[derive(Clone, Copy)]
enum Recurrence {
    /// eq. 10.1.19
    Spherical,
    /// eq. 10.2.18
    Modified,
}

/// `f_n(x)` from `f_0` and `f_1` by `f_{k+1} = ±((2k + 1) / x f_k - f_{k-1})`.
fn upward(n: u32, x: f64, f_0: f64, f_1: f64, recurrence: Recurrence) -> f64 {
    let sign = match recurrence {
        Recurrence::Spherical => 1.,
        Recurrence::Modified => -1.,
    };

    let (mut previous, mut current) = (f_0, f_1);
    if n == 0 {
        return previous;
    }

    for k in 1..n {
        let next = sign * ((2 * k + 1) as f64 / x * current - previous);
        previous = current;
        current = next;
    }

    current
}

#[macro_export]
/// Asserts relative error |x - y| <= x * err
///
/// # Syntax
///
/// - `assert_approx_eq!(x, y, err)` for single element
/// - `assert_approx_eq!(x, y, err, message)` with a message on failure
/// - `assert_approx_eq!(mat => x, y, err)` for all elements in matrices
macro_rules! assert_approx_eq {
    ($x:expr, $y:expr, $err:expr $(, $message:expr)?) => {
        let (x, y): (f64, f64) = ($x, $y);
        if x != y && (x - y).abs() > x.abs() * $err {
            panic!(
                "assertion failed{}\nleft side: {:e}\nright side: {:e}",
                [$(format!(", {}", $message),)? String::new()].concat(),
                x,
                y
            )
        }
    };
    (mat => $x:expr, $y:expr, $err:expr) => {
        assert_eq!($x.nrows(), $y.nrows());
        assert_eq!($x.ncols(), $y.ncols());

        for i in 0..$x.nrows() {
            for j in 0..$x.ncols() {
                $crate::assert_approx_eq!($x[(i, j)], $y[(i, j)], $err, format!("at ({i}, {j})"));
            }
        }
    };
}

#[cfg(test)]
mod test {
    use crate::utility::{ratio_riccati_i, ratio_riccati_k, riccati_j, riccati_n};

    #[test]
    fn test_bessel() {
        assert_approx_eq!(riccati_j(5, 10.0), -0.555345, 1e-5);
        assert_approx_eq!(riccati_j(10, 10.0), 0.646052, 1e-5);

        assert_approx_eq!(riccati_n(5, 10.0), -0.938335, 1e-5);
        assert_approx_eq!(riccati_n(10, 10.0), 1.72454, 1e-5);

        assert_approx_eq!(ratio_riccati_i(5, 5.0, 10.0), 0.00157309, 1e-5);
        assert_approx_eq!(ratio_riccati_i(10, 5.0, 10.0), 0.00011066, 1e-5);

        assert_approx_eq!(ratio_riccati_k(5, 5.0, 10.0), 487.227, 1e-5);
        assert_approx_eq!(ratio_riccati_k(10, 5.0, 10.0), 5633.13, 1e-5);
    }

    #[test]
    fn test_s_wave_limits() {
        let x = 3.7;
        assert_approx_eq!(riccati_j(0, x), x.sin(), 1e-12);
        assert_approx_eq!(riccati_n(0, x), x.cos(), 1e-12);
        assert_approx_eq!(riccati_j(1, x), x.sin() / x - x.cos(), 1e-12, "p wave");

        assert_approx_eq!(ratio_riccati_k(0, 2.0, 1.0), f64::exp(-1.0), 1e-12);
        let expected_i = 2.0f64.sinh() / 1.0f64.sinh();
        assert_approx_eq!(ratio_riccati_i(0, 2.0, 1.0), expected_i, 1e-12);
    }
}
