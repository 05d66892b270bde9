use crate::account::Account;

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub msg: String,
}

fn violation(msg: String) -> Result<(), InvariantViolation> {
    Err(InvariantViolation { msg })
}

/// Checks every record-level invariant a commit must preserve.
pub fn assert_account_invariants(account: &Account) -> Result<(), InvariantViolation> {
    if account.id.is_empty() {
        return violation("empty account id".to_string());
    }
    if account.energy > account.max_energy {
        return violation(format!(
            "energy {} exceeds max_energy {}",
            account.energy, account.max_energy
        ));
    }
    if !account.regen_rate.is_finite() || account.regen_rate < 0.0 {
        return violation(format!("regen_rate {} is not a non-negative number", account.regen_rate));
    }
    if account.boost_multiplier < 1 {
        return violation("boost_multiplier below 1".to_string());
    }
    if account.referral.awarded && account.referral.referrer_id.is_none() {
        return violation("referral awarded without a referrer".to_string());
    }
    if account.referral.referrer_id.as_deref() == Some(account.id.as_str()) {
        return violation("account refers itself".to_string());
    }
    Ok(())
}

/// The referral flag may only ever move from false to true.
pub fn assert_referral_monotonic(before: &Account, after: &Account) -> Result<(), InvariantViolation> {
    if before.referral.awarded && !after.referral.awarded {
        return violation("referral.awarded reverted to false".to_string());
    }
    if before.referral.awarded && before.referral.referrer_id != after.referral.referrer_id {
        return violation("awarded referrer changed".to_string());
    }
    Ok(())
}

/// Within one day counters only grow; across a day boundary they restart.
pub fn assert_daily_monotonic(before: &Account, after: &Account) -> Result<(), InvariantViolation> {
    if before.daily.last_reset_date == after.daily.last_reset_date
        && (after.daily.taping_used_today < before.daily.taping_used_today
            || after.daily.full_tank_used_today < before.daily.full_tank_used_today)
    {
        return violation("daily counter decreased within a day".to_string());
    }
    if after.daily.last_reset_date < before.daily.last_reset_date {
        return violation("daily reset date moved backwards".to_string());
    }
    Ok(())
}

/// Points only go down through a paid upgrade, never below zero.
pub fn assert_points_conserved(before: &Account, after: &Account, spent: u64, earned: u64) -> Result<(), InvariantViolation> {
    let expected = before.points.checked_sub(spent).map(|p| p.saturating_add(earned));
    if expected != Some(after.points) {
        return violation(format!(
            "points {} -> {} does not match spent {} earned {}",
            before.points, after.points, spent, earned
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn account() -> Account {
        Account::new("u", 0, 500, 1.2)
    }

    #[test]
    fn test_default_account_is_valid() {
        assert!(assert_account_invariants(&account()).is_ok());
    }

    #[test]
    fn test_energy_over_cap() {
        let mut acct = account();
        acct.energy = 501;
        assert!(assert_account_invariants(&acct).is_err());
    }

    #[test]
    fn test_self_referral_rejected() {
        let mut acct = account();
        acct.referral.referrer_id = Some("u".into());
        assert!(assert_account_invariants(&acct).is_err());
    }

    #[test]
    fn test_awarded_flag_is_one_way() {
        let mut before = account();
        before.referral.awarded = true;
        before.referral.referrer_id = Some("r".into());
        let mut after = before.clone();
        after.referral.awarded = false;
        assert!(assert_referral_monotonic(&before, &after).is_err());
        assert!(assert_referral_monotonic(&before, &before).is_ok());
    }

    #[test]
    fn test_daily_monotonic() {
        let mut before = account();
        before.daily.taping_used_today = 2;
        let mut after = before.clone();
        after.daily.taping_used_today = 1;
        assert!(assert_daily_monotonic(&before, &after).is_err());
        after.daily.last_reset_date = before.daily.last_reset_date.succ_opt().unwrap();
        assert!(assert_daily_monotonic(&before, &after).is_ok());
        after.daily.last_reset_date = NaiveDate::MIN;
        assert!(assert_daily_monotonic(&before, &after).is_err());
    }

    #[test]
    fn test_points_conserved() {
        let mut before = account();
        before.points = 600;
        let mut after = before.clone();
        after.points = 0;
        assert!(assert_points_conserved(&before, &after, 600, 0).is_ok());
        assert!(assert_points_conserved(&before, &after, 700, 100).is_err());
    }
}
