/// Confirmed/tentative transcript stabilizer
///
/// Each recognition pass yields the full text of the current buffer; because
/// the buffer slides and overlaps, successive passes agree on a prefix and
/// diverge at the tail. This snaps that agreement to sentence boundaries and
/// never lets the emitted confirmed prefix regress. Adapted from the
/// commit-point `SegmentationEngine` (`other_examples/.../simul.rs`) — stable
/// prefix computation and CJK boundary detection, reshaped from a one-shot
/// commit stream into a confirmed/tentative differ.
const SENTENCE_TERMINATORS: [char; 3] = ['。', '！', '？'];

#[derive(Debug, Default, Clone)]
pub struct TextDiffer {
    confirmed: String,
    tentative: String,
}

impl TextDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirmed(&self) -> &str {
        &self.confirmed
    }

    pub fn tentative(&self) -> &str {
        &self.tentative
    }

    /// Feed the latest full transcript from a recognition pass; updates
    /// `confirmed`/`tentative` in place per spec §4.3 steps 1-6.
    pub fn update(&mut self, t_new: &str) {
        let t_prev = format!("{}{}", self.confirmed, self.tentative);

        let new_chars: Vec<char> = t_new.chars().collect();
        let prev_chars: Vec<char> = t_prev.chars().collect();
        let agreement_len = agreement_len(&new_chars, &prev_chars);
        let lcp_prefix: String = new_chars[..agreement_len].iter().collect();

        let snapped_len = nearest_sentence_boundary_at_or_before(&lcp_prefix);
        let candidate_confirmed: String = new_chars[..snapped_len].iter().collect();

        let prev_confirmed_chars = self.confirmed.chars().count();
        if snapped_len < prev_confirmed_chars {
            // Monotonicity guard: never regress confirmed; fold the would-be
            // shrinkage back into tentative instead.
            let tail: String = new_chars[prev_confirmed_chars.min(new_chars.len())..]
                .iter()
                .collect();
            self.tentative = tail;
            return;
        }

        self.confirmed = candidate_confirmed;
        let tentative_chars = &new_chars[snapped_len..];
        self.tentative = tentative_chars.iter().collect();
    }

    /// End-of-stream finalization: promote all remaining tentative text to
    /// confirmed. Returns the final `(confirmed, tentative="")` pair.
    pub fn finalize(&mut self) -> (String, String) {
        self.confirmed.push_str(&self.tentative);
        self.tentative.clear();
        (self.confirmed.clone(), self.tentative.clone())
    }

    pub fn reset(&mut self) {
        self.confirmed.clear();
        self.tentative.clear();
    }
}

/// Length of `new` that is consistent with `prev` as a pure continuation:
/// the index of the first actual character mismatch within the overlap, or
/// (when `prev` runs out with no mismatch, the ordinary case as the buffer
/// grows) the full length of `new` — `prev` simply hadn't gotten that far
/// yet, which is not evidence of a revision.
fn agreement_len(new: &[char], prev: &[char]) -> usize {
    let overlap = new.len().min(prev.len());
    for i in 0..overlap {
        if new[i] != prev[i] {
            return i;
        }
    }
    new.len()
}

/// Largest `k <= prefix.chars().count()` such that `prefix[..k]` ends exactly
/// at a sentence terminator, or `0` if no terminator appears in `prefix`.
fn nearest_sentence_boundary_at_or_before(prefix: &str) -> usize {
    let chars: Vec<char> = prefix.chars().collect();
    for (idx, ch) in chars.iter().enumerate().rev() {
        if SENTENCE_TERMINATORS.contains(ch) {
            return idx + 1;
        }
    }
    0
}
