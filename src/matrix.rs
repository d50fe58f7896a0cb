use anyhow::Result;
use nalgebra::DMatrix;
use ndarray::{Array2, Axis};

const PINV_EPS: f64 = 1e-10;

pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

pub fn pinv(a: &Array2<f64>) -> Result<Array2<f64>> {
    if a.is_empty() {
        return Ok(Array2::zeros((a.ncols(), a.nrows())));
    }
    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);
    let inv = to_dmatrix(a)
        .pseudo_inverse(PINV_EPS * scale)
        .map_err(|e| anyhow::anyhow!("pseudo-inverse failed: {e}"))?;
    Ok(from_dmatrix(&inv))
}

pub fn ols_fit(x: &Array2<f64>, y: &Array2<f64>) -> Result<Array2<f64>> {
    if x.nrows() != y.nrows() {
        return Err(anyhow::anyhow!(
            "X has {} rows but Y has {}",
            x.nrows(),
            y.nrows()
        ));
    }
    let xtx = x.t().dot(x);
    let xty = x.t().dot(y);
    Ok(pinv(&xtx)?.dot(&xty))
}

pub fn residualize(a: &Array2<f64>, basis: &Array2<f64>) -> Result<Array2<f64>> {
    if basis.ncols() == 0 {
        return Ok(a.clone());
    }
    let coef = pinv(basis)?.dot(a);
    Ok(a - &basis.dot(&coef))
}

pub fn has_constant_column(a: &Array2<f64>) -> bool {
    a.nrows() > 0
        && a.axis_iter(Axis(1)).any(|col| {
        let first = col[0];
        first != 0.0 && col.iter().all(|&v| (v - first).abs() <= 1e-12 * first.abs())
    })
}
