//! Decides whether a user may read a chapter's pages. Pure - no storage
//! access, no side effects; callers re-evaluate on every request because a
//! membership can expire between two checks.

use std::collections::HashSet;

use serde::Serialize;

use crate::{manga::Chapter, user::UserAccount};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    LoginRequired,
    MembershipRequired,
    PurchaseRequired { coin_price: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Granted,
    Denied(DenyReason),
}

impl Access {
    pub fn is_granted(&self) -> bool {
        matches!(self, Access::Granted)
    }
}

/// First matching rule wins: anonymous callers are always denied, free
/// chapters are open to any authenticated user, then active membership, then
/// an explicit coin purchase. A chapter with a zero or absent coin price that
/// is not flagged free stays membership-gated - a price of zero does not mean
/// free to read.
pub fn evaluate(
    user: Option<&UserAccount>,
    purchased: &HashSet<i64>,
    chapter: &Chapter,
    now_ms: i64,
) -> Access {
    let Some(user) = user else {
        return Access::Denied(DenyReason::LoginRequired);
    };
    if chapter.is_free {
        return Access::Granted;
    }
    if user.membership_active(now_ms) {
        return Access::Granted;
    }
    if purchased.contains(&chapter.id) {
        return Access::Granted;
    }
    match chapter.coin_price {
        Some(price) if price > 0 => Access::Denied(DenyReason::PurchaseRequired { coin_price: price }),
        _ => Access::Denied(DenyReason::MembershipRequired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::AccountType;

    const NOW: i64 = 1_700_000_000_000;
    const DAY: i64 = 24 * 60 * 60 * 1000;

    fn chapter(id: i64, is_free: bool, coin_price: Option<i64>) -> Chapter {
        Chapter {
            id,
            manga_id: 1,
            chapter_number: 1.0,
            title: None,
            is_free,
            coin_price,
            pages_en: vec!["pages/1/en/001.jpg".to_string()],
            pages_mm: vec![],
            version: 1,
        }
    }

    fn free_account() -> UserAccount {
        UserAccount {
            id: 7,
            name: None,
            email: "reader@example.com".to_string(),
            roles: None,
            account_type: AccountType::Free,
            membership_start: None,
            membership_end: None,
            coins: 0,
            version: 1,
        }
    }

    fn member(end: Option<i64>) -> UserAccount {
        UserAccount {
            account_type: AccountType::Membership,
            membership_start: Some(NOW - 30 * DAY),
            membership_end: end,
            ..free_account()
        }
    }

    #[test]
    fn anonymous_is_always_denied() {
        let ch = chapter(1, true, None);
        assert_eq!(
            evaluate(None, &HashSet::new(), &ch, NOW),
            Access::Denied(DenyReason::LoginRequired)
        );
    }

    #[test]
    fn free_chapter_open_to_any_account() {
        let ch = chapter(1, true, Some(50));
        let user = free_account();
        assert!(evaluate(Some(&user), &HashSet::new(), &ch, NOW).is_granted());
    }

    #[test]
    fn permanent_membership_reads_everything() {
        let ch = chapter(1, false, Some(50));
        let user = member(None);
        assert!(evaluate(Some(&user), &HashSet::new(), &ch, NOW).is_granted());
    }

    #[test]
    fn membership_expiry_is_wall_clock() {
        let ch = chapter(1, false, None);
        let user = member(Some(NOW + 1));
        assert!(evaluate(Some(&user), &HashSet::new(), &ch, NOW).is_granted());
        // same user one step later
        assert_eq!(
            evaluate(Some(&user), &HashSet::new(), &ch, NOW + 1),
            Access::Denied(DenyReason::MembershipRequired)
        );
    }

    #[test]
    fn purchase_overrides_membership_state() {
        let ch = chapter(42, false, Some(30));
        let expired = member(Some(NOW - DAY));
        let owned = HashSet::from([42]);
        assert!(evaluate(Some(&expired), &owned, &ch, NOW).is_granted());
        let never_member = free_account();
        assert!(evaluate(Some(&never_member), &owned, &ch, NOW).is_granted());
    }

    #[test]
    fn priced_chapter_denies_with_price() {
        let ch = chapter(42, false, Some(30));
        let user = free_account();
        assert_eq!(
            evaluate(Some(&user), &HashSet::new(), &ch, NOW),
            Access::Denied(DenyReason::PurchaseRequired { coin_price: 30 })
        );
    }

    #[test]
    fn zero_price_stays_membership_gated() {
        let user = free_account();
        for price in [None, Some(0)] {
            let ch = chapter(1, false, price);
            assert_eq!(
                evaluate(Some(&user), &HashSet::new(), &ch, NOW),
                Access::Denied(DenyReason::MembershipRequired)
            );
        }
    }
}
