//! Reshaping flat row-major arrays into nested lists.

use tracing::warn;

/// A nested list whose leaves are dataset elements.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    Scalar(T),
    List(Vec<Nested<T>>),
}

impl<T> Nested<T> {
    pub fn as_list(&self) -> Option<&[Nested<T>]> {
        match self {
            Nested::List(items) => Some(items),
            Nested::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&T> {
        match self {
            Nested::Scalar(v) => Some(v),
            Nested::List(_) => None,
        }
    }
}

/// Group `values` into nested lists following `shape`, last dimension innermost.
///
/// The outermost level holds however many groups the values fill; a final
/// group may be short. A shape whose product differs from `values.len()` is
/// reported with a warning, not rejected. `shape` is the dataset shape as
/// passed to reconstruction.
pub fn to_nested<T>(values: Vec<T>, shape: &[u64]) -> Nested<T> {
    let product = shape.iter().fold(1u64, |acc, &d| acc.saturating_mul(d));
    if product != values.len() as u64 {
        warn!(
            shape_product = product,
            len = values.len(),
            "shape product does not match length of flattened array"
        );
    }

    let mut level: Vec<Nested<T>> = values.into_iter().map(Nested::Scalar).collect();
    for &dim in shape.iter().skip(1).rev() {
        if dim == 0 {
            level = Vec::new();
            continue;
        }
        let mut items = level.into_iter().peekable();
        let width = usize::try_from(dim).unwrap_or(usize::MAX);
        let mut grouped = Vec::new();
        while items.peek().is_some() {
            grouped.push(Nested::List(items.by_ref().take(width).collect()));
        }
        level = grouped;
    }
    Nested::List(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list<T>(items: Vec<Nested<T>>) -> Nested<T> {
        Nested::List(items)
    }

    fn leaves<T>(items: Vec<T>) -> Nested<T> {
        Nested::List(items.into_iter().map(Nested::Scalar).collect())
    }

    #[test]
    fn three_dimensions() {
        let nested = to_nested((0..8).collect(), &[2, 2, 2]);
        assert_eq!(
            nested,
            list(vec![
                list(vec![leaves(vec![0, 1]), leaves(vec![2, 3])]),
                list(vec![leaves(vec![4, 5]), leaves(vec![6, 7])]),
            ])
        );
    }

    #[test]
    fn one_dimension_is_flat() {
        assert_eq!(to_nested(vec![1, 2, 3], &[3]), leaves(vec![1, 2, 3]));
        assert_eq!(to_nested(vec![1, 2], &[]), leaves(vec![1, 2]));
    }

    #[test]
    fn mismatch_still_reshapes() {
        let nested = to_nested((0..5).collect(), &[2, 2]);
        assert_eq!(
            nested,
            list(vec![leaves(vec![0, 1]), leaves(vec![2, 3]), leaves(vec![4])])
        );
    }

    #[test]
    fn zero_sized_inner_dimension() {
        let nested: Nested<u8> = to_nested(Vec::new(), &[3, 0]);
        assert_eq!(nested.as_list().map(<[_]>::len), Some(0));
    }

    #[test]
    fn accessors() {
        let nested = to_nested(vec![7], &[1]);
        let first = &nested.as_list().unwrap()[0];
        assert_eq!(first.as_scalar(), Some(&7));
        assert!(nested.as_scalar().is_none());
    }
}
