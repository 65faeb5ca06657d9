/// Delay before reconnect attempt `attempt` (1-indexed): base doubled per
/// attempt, capped, with multiplicative jitter in `[1-j, 1+j]` (§4.9, §8
/// scenario 5). `rand_unit` is a caller-supplied `[0,1)` sample so the curve
/// stays testable without threading a real RNG through.
pub fn reconnect_delay_ms(attempt: u32, base_ms: u64, cap_ms: u64, jitter: f64, rand_unit: f64) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let unjittered = base_ms.saturating_mul(1u64 << exponent.min(32)).min(cap_ms);
    let factor = 1.0 - jitter + 2.0 * jitter * rand_unit.clamp(0.0, 1.0);
    ((unjittered as f64) * factor).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_capped() {
        assert_eq!(reconnect_delay_ms(1, 1000, 30_000, 0.0, 0.5), 1000);
        assert_eq!(reconnect_delay_ms(2, 1000, 30_000, 0.0, 0.5), 2000);
        assert_eq!(reconnect_delay_ms(6, 1000, 30_000, 0.0, 0.5), 30_000);
    }

    #[test]
    fn jitter_bound_at_attempt_ten() {
        let low = reconnect_delay_ms(10, 1000, 30_000, 0.2, 0.0);
        let high = reconnect_delay_ms(10, 1000, 30_000, 0.2, 1.0);
        assert!(low >= 800, "low={low}");
        assert!(high <= 36_000, "high={high}");
    }
}
