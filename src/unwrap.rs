//! Block-boundary phase repair.
//!
//! Both passes treat the previous block's last output as a virtual sample
//! before index 0. A glitch limit of zero disables them.

/// Undo short wrap glitches of more than 180 degrees.
///
/// A jump at `i` is paired with the next opposite-signed jump at `j` no more
/// than `glitch_limit` samples later, and `[i, j)` is shifted by 360 degrees
/// against the jump. An unpaired forward wrap (phase crossing +180) whose
/// search runs into the end of the block is unwrapped through the end.
pub fn unwrap_glitches(block: &mut [f32], last: f32, glitch_limit: usize) {
    let n = block.len();
    if glitch_limit == 0 || n == 0 {
        return;
    }

    let mut i = 0;
    while i < n {
        let prev = if i == 0 { last } else { block[i - 1] };
        let diff = block[i] - prev;
        if diff.abs() <= 180.0 {
            i += 1;
            continue;
        }

        let search_end = (i + glitch_limit).min(n - 1);
        let mut end = None;
        let mut j = i + 1;
        while j <= search_end {
            let diff2 = block[j] - block[j - 1];
            if diff2.abs() > 180.0 && (diff2 > 0.0) != (diff > 0.0) {
                end = Some(j);
                break;
            }
            j += 1;
        }

        if end.is_none() && diff < 0.0 && j == n {
            end = Some(n);
        }

        match end {
            Some(end) => {
                let shift = if diff > 0.0 { -360.0 } else { 360.0 };
                block[i..end].iter_mut().for_each(|x| *x += shift);
                i = end;
            }
            None => i += 1,
        }
    }
}

/// Smooth a small downward step at the start of a block.
///
/// If the first sample sits less than 180 degrees below `last`, find the
/// first sample within `glitch_limit` that rises above `last` again and
/// interpolate linearly up to it.
pub fn smooth_block_start(block: &mut [f32], last: f32, glitch_limit: usize) {
    let n = block.len();
    if glitch_limit == 0 || n == 0 {
        return;
    }

    let diff = block[0] - last;
    if !(diff < 0.0 && diff > -180.0) {
        return;
    }

    let max_len = glitch_limit.min(n - 1);
    let mut end = None;
    for i in 1..=max_len {
        if block[i] > last {
            end = Some(i);
            break;
        }
        // Wrapped before crossing.
        if block[i] - block[i - 1] > 180.0 && block[i] + 360.0 > last {
            block[i] += 360.0;
            end = Some(i);
            break;
        }
    }

    if let Some(e) = end {
        let slope = (block[e] - last) / (e + 1) as f32;
        for (i, x) in block[..e].iter_mut().enumerate() {
            *x = last + (i + 1) as f32 * slope;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Unwrapping
    // ========================================================================

    #[test]
    fn test_forward_wrap_at_block_edge() {
        let mut block = [-170.0];
        unwrap_glitches(&mut block, 170.0, 1);
        assert_eq!(block, [190.0]);
    }

    #[test]
    fn test_forward_wrap_continues_through_block() {
        let mut block = [-170.0, -160.0, -150.0];
        unwrap_glitches(&mut block, 170.0, 200);
        assert_eq!(block, [190.0, 200.0, 210.0]);
    }

    #[test]
    fn test_paired_glitch_is_removed() {
        let mut block = [120.0, 150.0, -175.0, 170.0, 175.0];
        unwrap_glitches(&mut block, 90.0, 10);
        assert_eq!(block, [120.0, 150.0, 185.0, 170.0, 175.0]);
    }

    #[test]
    fn test_glitch_longer_than_limit_kept() {
        let raw = [120.0, 150.0, -175.0, -170.0, 170.0, 175.0];

        let mut block = raw;
        unwrap_glitches(&mut block, 90.0, 1);
        assert_eq!(block, raw);

        let mut block = raw;
        unwrap_glitches(&mut block, 90.0, 5);
        assert_eq!(block, [120.0, 150.0, 185.0, 190.0, 170.0, 175.0]);
    }

    #[test]
    fn test_backward_jump_at_edge_kept() {
        let mut block = [160.0, 170.0];
        unwrap_glitches(&mut block, -170.0, 50);
        assert_eq!(block, [160.0, 170.0]);
    }

    #[test]
    fn test_unwrap_idempotent_on_smooth_ramp() {
        let ramp: Vec<f32> = (0..36).map(|i| -175.0 + 10.0 * i as f32).collect();
        let mut block = ramp.clone();
        unwrap_glitches(&mut block, -180.0, 200);
        assert_eq!(block, ramp);

        let mut once = [-170.0, -160.0];
        unwrap_glitches(&mut once, 170.0, 200);
        let mut twice = once;
        unwrap_glitches(&mut twice, 170.0, 200);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unwrap_disabled() {
        let mut block = [-170.0, 100.0, -100.0];
        let raw = block;
        unwrap_glitches(&mut block, 170.0, 0);
        assert_eq!(block, raw);
        unwrap_glitches(&mut [0.0f32; 0], 170.0, 10);
    }

    // ========================================================================
    // Start-of-block smoothing
    // ========================================================================

    #[test]
    fn test_smooth_interpolates_to_crossing() {
        let mut block = [90.0, 95.0, 105.0, 110.0];
        smooth_block_start(&mut block, 100.0, 10);
        let slope = 5.0 / 3.0;
        assert!((block[0] - (100.0 + slope)).abs() < 1e-4);
        assert!((block[1] - (100.0 + 2.0 * slope)).abs() < 1e-4);
        assert_eq!(block[2], 105.0);
        assert_eq!(block[3], 110.0);
    }

    #[test]
    fn test_smooth_handles_wrap_before_crossing() {
        let mut block = [170.0, -100.0, 100.0];
        smooth_block_start(&mut block, 179.0, 10);
        assert_eq!(block[2], 460.0);
        let slope = (460.0 - 179.0) / 3.0;
        assert!((block[0] - (179.0 + slope)).abs() < 1e-3);
        assert!((block[1] - (179.0 + 2.0 * slope)).abs() < 1e-3);
    }

    #[test]
    fn test_smooth_wrap_down_is_not_a_crossing() {
        let mut block = [170.0, 172.0, -179.0];
        smooth_block_start(&mut block, 175.0, 10);
        assert_eq!(block, [170.0, 172.0, -179.0]);
    }

    #[test]
    fn test_smooth_no_crossing_within_limit() {
        let mut block = [90.0, 91.0, 92.0, 150.0];
        let raw = block;
        smooth_block_start(&mut block, 100.0, 2);
        assert_eq!(block, raw);
    }

    #[test]
    fn test_smooth_ignores_upward_or_large_steps() {
        let mut block = [110.0, 120.0];
        smooth_block_start(&mut block, 100.0, 10);
        assert_eq!(block, [110.0, 120.0]);

        let mut block = [-90.0, 100.0];
        smooth_block_start(&mut block, 100.0, 10);
        assert_eq!(block, [-90.0, 100.0]);
    }

    #[test]
    fn test_smooth_disabled() {
        let mut block = [90.0, 95.0, 105.0];
        smooth_block_start(&mut block, 100.0, 0);
        assert_eq!(block, [90.0, 95.0, 105.0]);
    }
}
