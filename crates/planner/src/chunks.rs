/// One planned pk range. Half-open except the final range of a table,
/// which includes the table's max pk so every row lands in exactly one
/// chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub pk_start: i64,
    pub pk_end: i64,
    pub upper_inclusive: bool,
}

/// Split `[min_pk, max_pk]` into `ceil(row_count / chunk_size)` ranges of
/// approximately equal pk width. Deterministic: the same inputs always
/// produce the same boundaries.
pub fn chunk_bounds(min_pk: i64, max_pk: i64, row_count: u64, chunk_size: u64) -> Vec<ChunkBounds> {
    if row_count == 0 || min_pk > max_pk {
        return Vec::new();
    }

    let parts = row_count.div_ceil(chunk_size.max(1)).max(1);
    let span = max_pk as i128 - min_pk as i128;

    // Boundary i sits at min + span*i/parts; integer division keeps the
    // widths within one of each other.
    let mut boundaries = Vec::with_capacity(parts as usize + 1);
    for i in 0..=parts {
        let offset = span * i as i128 / parts as i128;
        boundaries.push((min_pk as i128 + offset) as i64);
    }
    boundaries.dedup();

    let last = boundaries.len() - 1;
    let mut ranges = Vec::with_capacity(last);
    for i in 0..last {
        let is_last = i == last - 1;
        ranges.push(ChunkBounds {
            pk_start: boundaries[i],
            pk_end: if is_last { max_pk } else { boundaries[i + 1] },
            upper_inclusive: is_last,
        });
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quarter_million_rows_into_three_ranges() {
        let bounds = chunk_bounds(1, 250_000, 250_000, 100_000);
        assert_eq!(
            bounds,
            vec![
                ChunkBounds {
                    pk_start: 1,
                    pk_end: 83_334,
                    upper_inclusive: false
                },
                ChunkBounds {
                    pk_start: 83_334,
                    pk_end: 166_667,
                    upper_inclusive: false
                },
                ChunkBounds {
                    pk_start: 166_667,
                    pk_end: 250_000,
                    upper_inclusive: true
                },
            ]
        );
    }

    #[test]
    fn single_chunk_when_rows_fit() {
        let bounds = chunk_bounds(10, 500, 400, 100_000);
        assert_eq!(
            bounds,
            vec![ChunkBounds {
                pk_start: 10,
                pk_end: 500,
                upper_inclusive: true
            }]
        );
    }

    #[test]
    fn ranges_tile_the_key_space_without_overlap() {
        let bounds = chunk_bounds(-500, 100_000, 1_000_000, 75_000);
        assert_eq!(bounds.len(), 14);
        assert_eq!(bounds[0].pk_start, -500);
        let final_range = bounds.last().unwrap();
        assert_eq!(final_range.pk_end, 100_000);
        assert!(final_range.upper_inclusive);
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].pk_end, pair[1].pk_start, "gap between ranges");
            assert!(!pair[0].upper_inclusive);
        }
    }

    #[test]
    fn sparse_key_space_collapses_duplicate_boundaries() {
        // More requested parts than distinct keys: no degenerate empty
        // ranges come back.
        let bounds = chunk_bounds(1, 3, 10, 2);
        assert!(!bounds.is_empty());
        for range in &bounds {
            assert!(range.pk_start < range.pk_end || range.upper_inclusive);
        }
        assert_eq!(bounds.last().unwrap().pk_end, 3);
    }

    #[test]
    fn empty_table_yields_no_chunks() {
        assert!(chunk_bounds(1, 100, 0, 1000).is_empty());
    }

    #[test]
    fn planning_is_deterministic() {
        let a = chunk_bounds(7, 9_999_999, 4_567_890, 100_000);
        let b = chunk_bounds(7, 9_999_999, 4_567_890, 100_000);
        assert_eq!(a, b);
    }
}
