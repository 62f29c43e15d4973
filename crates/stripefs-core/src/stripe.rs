//! Stripe placement.
//!
//! A logical `(offset, length)` range is cut into whole `stripe_size` pieces
//! starting at `offset` itself. Piece `i` lives on node
//! `(i + offset / stripe_size) % node_count` at `offset + i * stripe_size`.
//! Reads and writes use the same plan, so a write is always found again by a
//! read at the same offset.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StripeError {
    #[error("stripe size must be non-zero")]
    ZeroStripeSize,

    #[error("node list is empty")]
    NoNodes,

    #[error("range {offset}+{length} overflows a 32-bit file offset")]
    OffsetOverflow { offset: u32, length: u64 },
}

/// One piece of a planned operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stripe {
    /// Position within the logical operation.
    pub index: usize,
    /// Index into the configured node list.
    pub node: usize,
    /// Absolute offset of this stripe within the file.
    pub offset: u32,
    pub length: u32,
}

impl Stripe {
    /// Byte range of this stripe within the caller's buffer.
    pub fn buffer_range(&self, base_offset: u32) -> std::ops::Range<usize> {
        let start = (self.offset - base_offset) as usize;
        start..start + self.length as usize
    }
}

/// Placement parameters shared by the coordinator and its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeLayout {
    stripe_size: u32,
    node_count: usize,
}

impl StripeLayout {
    pub fn new(stripe_size: u32, node_count: usize) -> Result<Self, StripeError> {
        if stripe_size == 0 {
            return Err(StripeError::ZeroStripeSize);
        }
        if node_count == 0 {
            return Err(StripeError::NoNodes);
        }
        Ok(Self {
            stripe_size,
            node_count,
        })
    }

    pub fn stripe_size(&self) -> u32 {
        self.stripe_size
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Node holding stripe `index` of an operation starting at `offset`.
    pub fn node_for(&self, offset: u32, index: usize) -> usize {
        let ring_start = (offset / self.stripe_size) as usize;
        (index + ring_start) % self.node_count
    }

    /// Plan `(offset, length)`. A zero length plans zero stripes.
    pub fn plan(&self, offset: u32, length: u32) -> Result<Vec<Stripe>, StripeError> {
        let end = offset as u64 + length as u64;
        if end > u32::MAX as u64 + 1 {
            return Err(StripeError::OffsetOverflow {
                offset,
                length: length as u64,
            });
        }

        let count = length.div_ceil(self.stripe_size) as usize;
        let mut stripes = Vec::with_capacity(count);
        for index in 0..count {
            let consumed = index as u64 * self.stripe_size as u64;
            let stripe_offset = offset as u64 + consumed;
            // The last stripe may end exactly at 2^32; its start still fits.
            let stripe_offset = u32::try_from(stripe_offset).map_err(|_| {
                StripeError::OffsetOverflow {
                    offset,
                    length: length as u64,
                }
            })?;
            let remaining = length as u64 - consumed;
            stripes.push(Stripe {
                index,
                node: self.node_for(offset, index),
                offset: stripe_offset,
                length: remaining.min(self.stripe_size as u64) as u32,
            });
        }
        Ok(stripes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(plan: &[Stripe]) -> Vec<usize> {
        plan.iter().map(|s| s.node).collect()
    }

    fn lengths(plan: &[Stripe]) -> Vec<u32> {
        plan.iter().map(|s| s.length).collect()
    }

    #[test]
    fn rejects_degenerate_layouts() {
        assert_eq!(StripeLayout::new(0, 3), Err(StripeError::ZeroStripeSize));
        assert_eq!(StripeLayout::new(4096, 0), Err(StripeError::NoNodes));
    }

    #[test]
    fn ten_thousand_bytes_over_three_nodes() {
        let layout = StripeLayout::new(4096, 3).unwrap();
        let plan = layout.plan(0, 10_000).unwrap();
        assert_eq!(nodes(&plan), vec![0, 1, 2]);
        assert_eq!(lengths(&plan), vec![4096, 4096, 1808]);
        assert_eq!(
            plan.iter().map(|s| s.offset).collect::<Vec<_>>(),
            vec![0, 4096, 8192]
        );
    }

    #[test]
    fn single_byte_and_exact_stripe() {
        let layout = StripeLayout::new(4096, 3).unwrap();
        let one = layout.plan(0, 1).unwrap();
        assert_eq!(nodes(&one), vec![0]);
        assert_eq!(lengths(&one), vec![1]);

        let exact = layout.plan(0, 4096).unwrap();
        assert_eq!(nodes(&exact), vec![0]);
        assert_eq!(lengths(&exact), vec![4096]);
    }

    #[test]
    fn ring_index_starts_at_offset_stripe() {
        let layout = StripeLayout::new(4096, 3).unwrap();
        // Stripe-aligned start on the third ring slot wraps back to node 0.
        let plan = layout.plan(2 * 4096, 4 * 4096).unwrap();
        assert_eq!(nodes(&plan), vec![2, 0, 1, 2]);
        for (i, s) in plan.iter().enumerate() {
            assert_eq!(s.node, (i + 2) % 3);
        }
    }

    #[test]
    fn mid_stripe_offset_keeps_whole_stripes() {
        let layout = StripeLayout::new(4096, 3).unwrap();
        let plan = layout.plan(5000, 9000).unwrap();
        // 5000 / 4096 == 1, so the ring starts at node 1.
        assert_eq!(nodes(&plan), vec![1, 2, 0]);
        assert_eq!(lengths(&plan), vec![4096, 4096, 808]);
        assert_eq!(
            plan.iter().map(|s| s.offset).collect::<Vec<_>>(),
            vec![5000, 9096, 13192]
        );
        assert_eq!(plan[1].buffer_range(5000), 4096..8192);
    }

    #[test]
    fn zero_length_plans_nothing() {
        let layout = StripeLayout::new(4096, 3).unwrap();
        assert!(layout.plan(12_345, 0).unwrap().is_empty());
    }

    #[test]
    fn plan_is_deterministic() {
        let layout = StripeLayout::new(512, 5).unwrap();
        assert_eq!(layout.plan(777, 9_999), layout.plan(777, 9_999));
    }

    #[test]
    fn overflowing_range_is_rejected() {
        let layout = StripeLayout::new(4096, 3).unwrap();
        assert!(layout.plan(u32::MAX - 10, 100).is_err());
        assert!(layout.plan(u32::MAX - 4095, 4096).is_ok());
    }
}
