use super::bitfield::Bitfield;

/// Rarest-first piece selection over swarm availability counts.
///
/// The picker only answers "which piece next": it tracks how many connected
/// peers advertise each piece and selects, among pieces we lack and the
/// peer has, the one with the smallest availability. It does not know about
/// in-progress or pipelined pieces; callers layer those constraints.
///
/// Ties break toward the smallest index, so selection is deterministic.
#[derive(Debug)]
pub struct PiecePicker {
    availability: Vec<u32>,
}

impl PiecePicker {
    pub fn new(piece_count: usize) -> Self {
        Self {
            availability: vec![0; piece_count],
        }
    }

    pub fn piece_count(&self) -> usize {
        self.availability.len()
    }

    /// How many peers advertise piece `index`.
    pub fn availability(&self, index: u32) -> u32 {
        self.availability
            .get(index as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Counts a newly-arrived peer's pieces.
    pub fn add_peer_bitfield(&mut self, bitfield: &Bitfield) {
        for i in 0..self.availability.len() {
            if bitfield.has(i) {
                self.availability[i] += 1;
            }
        }
    }

    /// Discounts a departed peer's pieces. Saturating; availability never
    /// goes negative.
    pub fn remove_peer_bitfield(&mut self, bitfield: &Bitfield) {
        for i in 0..self.availability.len() {
            if bitfield.has(i) {
                self.availability[i] = self.availability[i].saturating_sub(1);
            }
        }
    }

    /// Counts a single `have` announcement.
    pub fn add_have(&mut self, index: u32) {
        if let Some(count) = self.availability.get_mut(index as usize) {
            *count += 1;
        }
    }

    /// Picks the rarest piece that `peer_has` advertises and `my_have`
    /// lacks, smallest index on ties.
    pub fn pick(&self, my_have: &Bitfield, peer_has: &Bitfield) -> Option<u32> {
        let mut best: Option<(u32, u32)> = None;

        for (i, &avail) in self.availability.iter().enumerate() {
            if my_have.has(i) || !peer_has.has(i) {
                continue;
            }
            match best {
                Some((_, best_avail)) if best_avail <= avail => {}
                _ => best = Some((i as u32, avail)),
            }
        }

        best.map(|(index, _)| index)
    }

    /// Returns up to `n` eligible pieces, rarest first; equal availability
    /// preserves index order.
    pub fn pick_multiple(&self, my_have: &Bitfield, peer_has: &Bitfield, n: usize) -> Vec<u32> {
        let mut candidates: Vec<u32> = (0..self.availability.len() as u32)
            .filter(|&i| !my_have.has(i as usize) && peer_has.has(i as usize))
            .collect();

        candidates.sort_by_key(|&i| self.availability[i as usize]);
        candidates.truncate(n);
        candidates
    }
}
