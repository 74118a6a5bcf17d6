//! Role selection

use bson::Document;
use tracing::debug;

use flowerbase_common::error::Result;

use crate::filter::get_valid_rule;
use crate::model::{Filter, Role};

/// Whether a role's `apply_when` matches the user and document
pub fn check_apply_when(apply_when: &Document, user: &Document, document: &Document) -> Result<bool> {
    let candidate = [Filter {
        apply_when: apply_when.clone(),
        ..Filter::default()
    }];
    Ok(!get_valid_rule(&candidate, user, Some(document))?.is_empty())
}

/// First role, in declaration order, that applies to the document
pub fn get_winning_role<'a>(
    document: &Document,
    user: &Document,
    roles: &'a [Role],
) -> Result<Option<&'a Role>> {
    for role in roles {
        if check_apply_when(&role.apply_when, user, document)? {
            debug!(role = %role.name, "Winning role selected");
            return Ok(Some(role));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_empty_roles() {
        assert!(get_winning_role(&doc! {}, &doc! {}, &[]).unwrap().is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let roles = vec![
            Role::new("owner").with_apply_when(doc! { "owner_id": "%%user.id" }),
            Role::new("admin").with_apply_when(doc! { "%%user.role": "admin" }),
            Role::new("default"),
        ];
        let user = doc! { "id": "u1", "role": "admin" };

        let own = doc! { "owner_id": "u1" };
        let other = doc! { "owner_id": "u2" };
        assert_eq!(get_winning_role(&own, &user, &roles).unwrap().unwrap().name, "owner");
        assert_eq!(get_winning_role(&other, &user, &roles).unwrap().unwrap().name, "admin");

        let guest = doc! { "id": "u3", "role": "guest" };
        assert_eq!(get_winning_role(&other, &guest, &roles).unwrap().unwrap().name, "default");
    }

    #[test]
    fn test_no_role_applies() {
        let roles = vec![Role::new("admin").with_apply_when(doc! { "%%user.role": "admin" })];
        let user = doc! { "role": "guest" };
        assert!(get_winning_role(&doc! {}, &user, &roles).unwrap().is_none());
    }

    #[test]
    fn test_check_apply_when() {
        let user = doc! { "id": "u1" };
        assert!(check_apply_when(&doc! {}, &user, &doc! {}).unwrap());
        assert!(check_apply_when(&doc! { "a": { "$gt": 1 } }, &user, &doc! { "a": 2 }).unwrap());
        assert!(!check_apply_when(&doc! { "a": { "$gt": 1 } }, &user, &doc! { "a": 0 }).unwrap());
    }
}
