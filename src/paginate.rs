// src/paginate.rs

use crate::error::{Error, Result};

/// Lazy skip/take over a stream of already filtered reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    offset: usize,
    limit: Option<usize>,
}

impl Page {
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    /// Validates caller values. Fractions are truncated toward zero; the
    /// limit must still be at least one afterwards.
    pub fn from_options(offset: Option<f64>, limit: Option<f64>) -> Result<Self> {
        let offset = match offset {
            None => 0,
            Some(v) if v.is_finite() && v >= 0.0 => v.trunc() as usize,
            Some(v) => return Err(Error::config(format!("offset must be a non-negative integer, got {v}"))),
        };
        let limit = match limit {
            None => None,
            Some(v) if v.is_finite() && v.trunc() >= 1.0 => Some(v.trunc() as usize),
            Some(v) => return Err(Error::config(format!("limit must be a positive integer, got {v}"))),
        };
        Ok(Self { offset, limit })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Skips then takes. Items past the limit are never pulled from `iter`.
    /// Errors count as items so that a failure inside the skipped prefix
    /// still surfaces.
    pub fn apply<'a, T: 'a>(
        &self,
        iter: impl Iterator<Item = Result<T>> + 'a,
    ) -> Box<dyn Iterator<Item = Result<T>> + 'a> {
        let mut skipped = 0;
        let offset = self.offset;
        let rest = iter.filter(move |item| {
            if item.is_err() || skipped >= offset {
                return true;
            }
            skipped += 1;
            false
        });
        match self.limit {
            Some(n) => Box::new(rest.take(n)),
            None => Box::new(rest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_items(n: usize) -> impl Iterator<Item = Result<usize>> {
        (0..n).map(Ok)
    }

    #[test]
    fn test_from_options() {
        assert_eq!(Page::from_options(None, None).unwrap(), Page::default());
        assert_eq!(Page::from_options(Some(2.9), Some(3.2)).unwrap(), Page::new(2, Some(3)));
        assert!(Page::from_options(None, Some(0.0)).unwrap_err().is_configuration());
        assert!(Page::from_options(Some(-0.5), None).is_err());
        assert!(Page::from_options(None, Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_pages_cover_stream() {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page: Vec<usize> = Page::new(offset, Some(3))
                .apply(ok_items(10))
                .collect::<Result<_>>()
                .unwrap();
            let short = page.len() < 3;
            all.extend(page);
            if short {
                break;
            }
            offset += 3;
        }
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_take_is_lazy() {
        let mut pulled = 0;
        let counted = (0..100).map(|i| {
            pulled += 1;
            Ok::<_, Error>(i)
        });
        let got: Vec<_> = Page::new(1, Some(2)).apply(counted).collect::<Result<_>>().unwrap();
        assert_eq!(got, vec![1, 2]);
        assert_eq!(pulled, 3);
    }

    #[test]
    fn test_error_in_skipped_prefix_surfaces() {
        let items = vec![Ok(0), Err(Error::data("bad")), Ok(2)];
        let res: Result<Vec<i32>> = Page::new(2, None).apply(items.into_iter()).collect();
        assert!(res.is_err());
    }
}
