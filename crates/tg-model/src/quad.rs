//! Gauss-Legendre quadrature rules.

/// Evaluate the Legendre polynomial `P_n` and its derivative at `x`.
fn legendre_pd(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p0 = 1.0;
    let mut p1 = x;
    for k in 2..=n {
        let kf = k as f64;
        let pk = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
        p0 = p1;
        p1 = pk;
    }
    let dp = if (x * x - 1.0).abs() < 1e-300 {
        // Endpoints: P_n'(±1) = ±n(n+1)/2 with sign x^{n+1}.
        0.5 * (n as f64) * (n as f64 + 1.0) * x.powi(n as i32 + 1)
    } else {
        (n as f64) * (x * p1 - p0) / (x * x - 1.0)
    };
    (p1, dp)
}

/// Nodes and weights of the `n`-point Gauss-Legendre rule on `[-1, 1]`.
///
/// Nodes are found by Newton iteration from the Chebyshev initial guess; the
/// rule integrates polynomials up to degree `2n - 1` exactly.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    let m = n.div_ceil(2);
    for i in 0..m {
        let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..64 {
            let (p, dp) = legendre_pd(n, x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre_pd(n, x);
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        nodes[i] = -x;
        nodes[n - 1 - i] = x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }
    (nodes, weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_weights_sum_to_interval_length() {
        for n in [2, 8, 32, 64] {
            let (_, w) = gauss_legendre(n);
            assert_relative_eq!(w.iter().sum::<f64>(), 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_integrates_polynomials_exactly() {
        // ∫_{-1}^{1} x^2 dx = 2/3 and ∫ x^6 dx = 2/7.
        let (x, w) = gauss_legendre(8);
        let s2: f64 = x.iter().zip(&w).map(|(x, w)| w * x * x).sum();
        let s6: f64 = x.iter().zip(&w).map(|(x, w)| w * x.powi(6)).sum();
        assert_relative_eq!(s2, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(s6, 2.0 / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_integrates_gaussian_accurately() {
        // ∫_{-1}^{1} exp(-x^2) dx = sqrt(pi) * erf(1) ≈ 1.493648265624854.
        let (x, w) = gauss_legendre(32);
        let s: f64 = x.iter().zip(&w).map(|(x, w)| w * (-x * x).exp()).sum();
        assert_relative_eq!(s, 1.493_648_265_624_854, epsilon = 1e-12);
    }
}
