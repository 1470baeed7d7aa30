// Points: flat base for a correct answer plus a linear speed bonus.

/// Points for any correct answer, regardless of speed.
pub const BASE_SCORE: u32 = 1000;

/// Extra points for an instant correct answer; decays linearly to zero at
/// the time limit.
pub const MAX_SPEED_BONUS: u32 = 500;

/// Map response latency and correctness to points.
///
/// Incorrect answers score zero. Negative response times (clock skew) are
/// clamped to zero so the bonus can never exceed `MAX_SPEED_BONUS`; answers
/// at or past the limit floor to `BASE_SCORE`.
pub fn calculate_score(response_time_ms: i64, is_correct: bool, time_limit_secs: u32) -> u32 {
    if !is_correct {
        return 0;
    }

    let limit_ms = f64::from(time_limit_secs) * 1000.0;
    if limit_ms <= 0.0 {
        return BASE_SCORE;
    }

    let response_ms = response_time_ms.max(0) as f64;
    let bonus =
        (f64::from(MAX_SPEED_BONUS) - (response_ms / limit_ms) * f64::from(MAX_SPEED_BONUS)).max(0.0);
    (f64::from(BASE_SCORE) + bonus).round() as u32
}

#[cfg(test)]
mod tests {
    use super::{calculate_score, BASE_SCORE, MAX_SPEED_BONUS};

    #[test]
    fn instant_correct_answer_gets_full_bonus() {
        assert_eq!(calculate_score(0, true, 30), 1500);
    }

    #[test]
    fn answer_at_the_limit_floors_to_base() {
        assert_eq!(calculate_score(30_000, true, 30), 1000);
    }

    #[test]
    fn answer_past_the_limit_still_floors_to_base() {
        assert_eq!(calculate_score(90_000, true, 30), BASE_SCORE);
    }

    #[test]
    fn incorrect_answers_score_zero() {
        for response in [0, 1000, 30_000, -500] {
            assert_eq!(calculate_score(response, false, 30), 0);
        }
    }

    #[test]
    fn negative_response_time_is_clamped_not_amplified() {
        // Clock skew must not mint a bonus above the maximum.
        assert_eq!(calculate_score(-10_000, true, 30), BASE_SCORE + MAX_SPEED_BONUS);
    }

    #[test]
    fn bonus_decays_linearly() {
        let halfway = calculate_score(15_000, true, 30);
        assert_eq!(halfway, 1250);
        assert!(calculate_score(1_000, true, 30) > calculate_score(20_000, true, 30));
    }

    #[test]
    fn zero_time_limit_degrades_to_base() {
        assert_eq!(calculate_score(0, true, 0), BASE_SCORE);
    }
}
