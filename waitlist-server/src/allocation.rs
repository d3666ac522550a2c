/// Projected airdrop amount for an allocation row. Tracks projected, not
/// settled, token amounts.
///
/// Invariant: `floor((base + referral + action) * multiplier)`.
pub fn projected_airdrop(
    base_amount: u64,
    referral_amount: u64,
    action_amount: u64,
    bonus_multiplier: f64,
) -> u64 {
    let subtotal = (base_amount + referral_amount + action_amount) as f64;
    (subtotal * bonus_multiplier).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_with_multiplier() {
        assert_eq!(projected_airdrop(50_000, 0, 0, 1.5), 75_000);
    }

    #[test]
    fn test_no_bonus() {
        assert_eq!(projected_airdrop(10_000, 500, 250, 1.0), 10_750);
    }

    #[test]
    fn test_floor_rounding() {
        // 101 * 1.1 = 111.10000000000001 in f64; the floor keeps 111.
        assert_eq!(projected_airdrop(101, 0, 0, 1.1), 111);
        assert_eq!(projected_airdrop(25, 0, 0, 1.25), 31);
    }

    #[test]
    fn test_zero_everything() {
        assert_eq!(projected_airdrop(0, 0, 0, 1.5), 0);
    }
}
