//! Broadcasting shape helper for shape inference.

use crate::{Error, Result};

/// Compute NumPy-style broadcast output shape from two input shapes.
///
/// - Shapes are aligned from the rightmost dimension
/// - Dimensions match if they are equal or one of them is 1
/// - Missing dimensions in shorter shapes are treated as 1
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let max_rank = a.len().max(b.len());
    let mut result = Vec::with_capacity(max_rank);

    for i in 0..max_rank {
        let da = if i < max_rank - a.len() {
            1
        } else {
            a[i - (max_rank - a.len())]
        };
        let db = if i < max_rank - b.len() {
            1
        } else {
            b[i - (max_rank - b.len())]
        };

        if da == db {
            result.push(da);
        } else if da == 1 {
            result.push(db);
        } else if db == 1 {
            result.push(da);
        } else {
            return Err(Error::Shape(format!(
                "cannot broadcast shapes {:?} and {:?} at dimension {i}",
                a, b
            )));
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_same_shape() {
        assert_eq!(
            broadcast_shape(&[2, 3, 4], &[2, 3, 4]).unwrap(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn test_broadcast_missing_dims() {
        assert_eq!(broadcast_shape(&[2, 3, 4], &[3, 4]).unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn test_broadcast_ones() {
        assert_eq!(
            broadcast_shape(&[2, 4], &[2, 1]).unwrap(),
            vec![2, 4]
        );
    }

    #[test]
    fn test_broadcast_incompatible() {
        assert!(broadcast_shape(&[2, 3], &[2, 4]).is_err());
    }
}
