/// Absolute scales of the two afferent pathways into CA1.
///
/// Only two configurations ever occur: the direct (ECin) pathway alone, or the
/// recurrent (CA3) pathway alone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GainPair {
    pub direct: f32,
    pub recurrent: f32,
}

impl GainPair {
    /// CA1 driven by the encoded cue.
    pub const DIRECT: Self = Self {
        direct: 1.0,
        recurrent: 0.0,
    };
    /// CA1 driven by CA3 recall.
    pub const RECALL: Self = Self {
        direct: 0.0,
        recurrent: 1.0,
    };
}

/// Gains in force while the steps of `quarter` (0-based) execute during
/// training; `None` when evaluating, in which case gains are left alone.
pub fn gain_for_quarter(quarter: usize, train: bool) -> Option<GainPair> {
    if !train {
        return None;
    }
    match quarter {
        1 | 2 => Some(GainPair::RECALL),
        _ => Some(GainPair::DIRECT),
    }
}

/// Gain switch performed at the end of `quarter`, if any.
///
/// The first quarter hands CA1 over to CA3; the third hands it back to ECin
/// for the plus phase.
pub fn gain_at_quarter_end(quarter: usize, train: bool) -> Option<GainPair> {
    if !train {
        return None;
    }
    match quarter {
        0 | 2 => gain_for_quarter(quarter + 1, train),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timebase::QUARTERS;

    #[test]
    fn schedule_matches_quarter_table() {
        let expected = [
            GainPair::DIRECT,
            GainPair::RECALL,
            GainPair::RECALL,
            GainPair::DIRECT,
        ];
        for (q, want) in expected.iter().enumerate() {
            assert_eq!(gain_for_quarter(q, true), Some(*want));
            assert_eq!(gain_for_quarter(q, true), gain_for_quarter(q, true));
        }
    }

    #[test]
    fn switches_only_after_first_and_third() {
        let switches: Vec<_> = (0..QUARTERS)
            .map(|q| gain_at_quarter_end(q, true))
            .collect();
        assert_eq!(
            switches,
            vec![Some(GainPair::RECALL), None, Some(GainPair::DIRECT), None]
        );
    }

    #[test]
    fn evaluation_leaves_gains_alone() {
        for q in 0..QUARTERS {
            assert_eq!(gain_for_quarter(q, false), None);
            assert_eq!(gain_at_quarter_end(q, false), None);
        }
    }

    #[test]
    fn pathways_never_share_a_gain() {
        for q in 0..QUARTERS {
            let g = gain_for_quarter(q, true).unwrap();
            assert_ne!(g.direct, g.recurrent);
            assert_eq!(g.direct + g.recurrent, 1.0);
        }
    }
}
