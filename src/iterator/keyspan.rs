//! Fragmentation of overlapping spans.
//!
//! Range deletions and range keys may overlap arbitrarily. Readers want
//! them as a sequence of non-overlapping fragments, each carrying every
//! span that covers it.

use bytes::Bytes;

/// A non-overlapping piece `[start, end)` and the items of every span that
/// covers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment<T> {
    pub start: Bytes,
    pub end: Bytes,
    pub items: Vec<T>,
}

/// Splits `spans` at every start and end key. Fragments come out in key
/// order; items keep the order of `spans`. Empty spans are ignored.
pub fn fragment<T: Clone>(spans: &[(Bytes, Bytes, T)]) -> Vec<Fragment<T>> {
    let mut bounds: Vec<&Bytes> = spans
        .iter()
        .filter(|(start, end, _)| start < end)
        .flat_map(|(start, end, _)| [start, end])
        .collect();
    bounds.sort();
    bounds.dedup();

    bounds
        .windows(2)
        .filter_map(|w| {
            let (start, end) = (w[0], w[1]);
            let items: Vec<T> = spans
                .iter()
                .filter(|(s, e, _)| s <= start && end <= e)
                .map(|(_, _, item)| item.clone())
                .collect();
            if items.is_empty() {
                None
            } else {
                Some(Fragment {
                    start: start.clone(),
                    end: end.clone(),
                    items,
                })
            }
        })
        .collect()
}

/// Clips fragments to `[lower, upper)`, dropping those entirely outside.
pub fn truncate<T>(
    fragments: Vec<Fragment<T>>,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
) -> Vec<Fragment<T>> {
    fragments
        .into_iter()
        .filter_map(|mut f| {
            if let Some(lower) = lower
                && f.start.as_ref() < lower
            {
                f.start = Bytes::copy_from_slice(lower);
            }
            if let Some(upper) = upper
                && f.end.as_ref() > upper
            {
                f.end = Bytes::copy_from_slice(upper);
            }
            (f.start < f.end).then_some(f)
        })
        .collect()
}

/// Removes `[start, end)` from a span, returning what remains on either
/// side.
pub fn subtract(
    span_start: &Bytes,
    span_end: &Bytes,
    start: &[u8],
    end: &[u8],
) -> Vec<(Bytes, Bytes)> {
    if end <= span_start.as_ref() || span_end.as_ref() <= start {
        return vec![(span_start.clone(), span_end.clone())];
    }
    let mut pieces = Vec::new();
    if span_start.as_ref() < start {
        pieces.push((span_start.clone(), Bytes::copy_from_slice(start)));
    }
    if end < span_end.as_ref() {
        pieces.push((Bytes::copy_from_slice(end), span_end.clone()));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: &'static str, end: &'static str, seq: u64) -> (Bytes, Bytes, u64) {
        (Bytes::from(start), Bytes::from(end), seq)
    }

    #[test]
    fn test_fragment_overlapping_spans() {
        let fragments = fragment(&[span("a", "d", 5), span("b", "f", 3)]);
        let summary: Vec<(&[u8], &[u8], Vec<u64>)> = fragments
            .iter()
            .map(|f| (f.start.as_ref(), f.end.as_ref(), f.items.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (&b"a"[..], &b"b"[..], vec![5]),
                (&b"b"[..], &b"d"[..], vec![5, 3]),
                (&b"d"[..], &b"f"[..], vec![3]),
            ]
        );
    }

    #[test]
    fn test_fragment_skips_gaps() {
        let fragments = fragment(&[span("a", "b", 1), span("c", "d", 2)]);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].start, Bytes::from("c"));
    }

    #[test]
    fn test_truncate() {
        let fragments = fragment(&[span("a", "m", 1), span("x", "z", 2)]);
        let truncated = truncate(fragments, Some(b"c"), Some(b"y"));
        assert_eq!(truncated.len(), 2);
        assert_eq!(truncated[0].start, Bytes::from("c"));
        assert_eq!(truncated[1].end, Bytes::from("y"));

        let fragments = fragment(&[span("a", "c", 1)]);
        assert!(truncate(fragments, Some(b"c"), None).is_empty());
    }

    #[test]
    fn test_subtract() {
        let (a, z) = (Bytes::from("a"), Bytes::from("z"));
        assert_eq!(
            subtract(&a, &z, b"c", b"e"),
            vec![
                (Bytes::from("a"), Bytes::from("c")),
                (Bytes::from("e"), Bytes::from("z")),
            ]
        );
        assert!(subtract(&a, &z, b"a", b"z").is_empty());
        assert_eq!(
            subtract(&a, &Bytes::from("c"), b"c", b"e"),
            vec![(Bytes::from("a"), Bytes::from("c"))]
        );
    }
}
