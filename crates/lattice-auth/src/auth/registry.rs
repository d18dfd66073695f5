//! Builds the runtime user tables from configuration.
//!
//! The tables are keyed mappings from username to [`User`] and from nkey to
//! [`NkeyUser`]. Entries are deep copies of the configuration; declared
//! account names are swapped for registry pointers, and entries left without
//! an account are bound to the global account. The finished maps are shared
//! immutably and replaced atomically on reconfiguration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::account::{Account, AccountRegistry};
use crate::auth::password::is_bcrypt;
use crate::auth::user::{NkeyUser, User};
use crate::config::{NkeyConfig, UserConfig};

/// Shared snapshot of the username table.
pub type UserMap = Arc<HashMap<String, Arc<User>>>;

/// Shared snapshot of the nkey table.
pub type NkeyMap = Arc<HashMap<String, Arc<NkeyUser>>>;

/// Build the nkey and user tables from their configuration slices.
///
/// Entries are cloned so the tables never reference the options object.
/// On duplicate keys the last entry wins. Returns `None` for a table whose
/// configuration slice is empty, mirroring the distinction between "no
/// table" and "empty table".
pub(crate) fn build_nkeys_and_users(
    nkey_opts: &[NkeyConfig],
    user_opts: &[UserConfig],
    accounts: &AccountRegistry,
    global_account: &Arc<Account>,
) -> (Option<NkeyMap>, Option<UserMap>) {
    let mut nkeys: Option<HashMap<String, NkeyUser>> = None;
    let mut users: Option<HashMap<String, User>> = None;

    if !nkey_opts.is_empty() {
        let map = nkeys.get_or_insert_with(|| HashMap::with_capacity(nkey_opts.len()));
        for cfg in nkey_opts {
            let mut entry = NkeyUser::from_config(cfg);
            if let Some(name) = &cfg.account {
                entry.account = Some(resolve_declared_account(accounts, name));
            }
            map.insert(entry.nkey.clone(), entry);
        }
    }
    if !user_opts.is_empty() {
        let map = users.get_or_insert_with(|| HashMap::with_capacity(user_opts.len()));
        for cfg in user_opts {
            let mut entry = User::from_config(cfg);
            if let Some(name) = &cfg.account {
                entry.account = Some(resolve_declared_account(accounts, name));
            }
            map.insert(entry.username.clone(), entry);
        }
    }

    assign_global_account_to_orphan_users(nkeys.as_mut(), users.as_mut(), global_account);

    (
        nkeys.map(|m| Arc::new(m.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())),
        users.map(|m| Arc::new(m.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())),
    )
}

/// Swap a declared account name for its registered account; a name not in
/// the registry keeps the declared identity as a fresh unregistered account.
fn resolve_declared_account(accounts: &AccountRegistry, name: &str) -> Arc<Account> {
    accounts
        .load(name)
        .unwrap_or_else(|| Arc::new(Account::new(name)))
}

/// Bind every table entry that still lacks an account to the global account.
fn assign_global_account_to_orphan_users(
    nkeys: Option<&mut HashMap<String, NkeyUser>>,
    users: Option<&mut HashMap<String, User>>,
    global_account: &Arc<Account>,
) {
    if let Some(users) = users {
        for u in users.values_mut() {
            if u.account.is_none() {
                u.account = Some(Arc::clone(global_account));
            }
        }
    }
    if let Some(nkeys) = nkeys {
        for u in nkeys.values_mut() {
            if u.account.is_none() {
                u.account = Some(Arc::clone(global_account));
            }
        }
    }
}

/// Whether the configured secrets include a plaintext (non-bcrypt) password.
///
/// Users with an empty password are skipped when certificate-mapped
/// authentication is on, since those entries authenticate via TLS.
pub(crate) fn has_plaintext_passwords(
    static_password: &str,
    users: Option<&UserMap>,
    tls_map: bool,
) -> bool {
    if !static_password.is_empty() && !is_bcrypt(static_password) {
        return true;
    }
    if let Some(users) = users {
        for u in users.values() {
            if u.password.is_empty() && tls_map {
                continue;
            }
            if !is_bcrypt(&u.password) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::permissions::{Permissions, ResponsePermission};

    fn user(name: &str, password: &str, account: Option<&str>) -> UserConfig {
        UserConfig {
            username: name.to_string(),
            password: password.to_string(),
            permissions: None,
            account: account.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_config_builds_no_tables() {
        let accounts = AccountRegistry::new();
        let global = Arc::new(Account::new("$G"));
        let (nkeys, users) = build_nkeys_and_users(&[], &[], &accounts, &global);
        assert!(nkeys.is_none());
        assert!(users.is_none());
    }

    #[test]
    fn test_orphans_bound_to_global_account() {
        let accounts = AccountRegistry::new();
        let global = Arc::new(Account::new("$G"));
        let (_, users) =
            build_nkeys_and_users(&[], &[user("alice", "pw", None)], &accounts, &global);
        let users = users.unwrap();
        let alice = users.get("alice").unwrap();
        assert!(Arc::ptr_eq(alice.account.as_ref().unwrap(), &global));
    }

    #[test]
    fn test_declared_account_resolved_from_registry() {
        let accounts = AccountRegistry::new();
        let acme = Arc::new(Account::new("ACME"));
        accounts.store(Arc::clone(&acme));
        let global = Arc::new(Account::new("$G"));

        let (_, users) = build_nkeys_and_users(
            &[],
            &[user("alice", "pw", Some("ACME")), user("bob", "pw", Some("UNKNOWN"))],
            &accounts,
            &global,
        );
        let users = users.unwrap();
        assert!(Arc::ptr_eq(
            users.get("alice").unwrap().account.as_ref().unwrap(),
            &acme
        ));
        // Unregistered names keep the declared identity.
        assert_eq!(
            users.get("bob").unwrap().account.as_ref().unwrap().name,
            "UNKNOWN"
        );
    }

    #[test]
    fn test_duplicate_usernames_last_wins() {
        let accounts = AccountRegistry::new();
        let global = Arc::new(Account::new("$G"));
        let (_, users) = build_nkeys_and_users(
            &[],
            &[user("alice", "first", None), user("alice", "second", None)],
            &accounts,
            &global,
        );
        assert_eq!(users.unwrap().get("alice").unwrap().password, "second");
    }

    #[test]
    fn test_nkey_table_keyed_by_public_key() {
        let accounts = AccountRegistry::new();
        let global = Arc::new(Account::new("$G"));
        let cfg = NkeyConfig {
            nkey: "UABC".to_string(),
            ..NkeyConfig::default()
        };
        let (nkeys, _) = build_nkeys_and_users(&[cfg], &[], &accounts, &global);
        let nkeys = nkeys.unwrap();
        let entry = nkeys.get("UABC").unwrap();
        assert!(Arc::ptr_eq(entry.account.as_ref().unwrap(), &global));
    }

    #[test]
    fn test_response_permissions_validated_on_build() {
        let accounts = AccountRegistry::new();
        let global = Arc::new(Account::new("$G"));
        let mut cfg = user("alice", "pw", None);
        cfg.permissions = Some(Permissions {
            publish: None,
            subscribe: None,
            response: Some(ResponsePermission::default()),
        });
        let (_, users) = build_nkeys_and_users(&[], &[cfg], &accounts, &global);
        let users = users.unwrap();
        let perms = users.get("alice").unwrap().permissions.as_ref().unwrap();
        assert!(perms.publish.is_some());
        assert!(perms.response.as_ref().unwrap().max_msgs > 0);
    }

    #[test]
    fn test_plaintext_password_detection() {
        let accounts = AccountRegistry::new();
        let global = Arc::new(Account::new("$G"));
        let (_, users) =
            build_nkeys_and_users(&[], &[user("alice", "plain", None)], &accounts, &global);
        assert!(has_plaintext_passwords("", users.as_ref(), false));

        let hash = bcrypt::hash("pw", 4).unwrap();
        let (_, users) =
            build_nkeys_and_users(&[], &[user("alice", &hash, None)], &accounts, &global);
        assert!(!has_plaintext_passwords("", users.as_ref(), false));
    }

    #[test]
    fn test_empty_password_skipped_under_tls_map() {
        let accounts = AccountRegistry::new();
        let global = Arc::new(Account::new("$G"));
        let (_, users) =
            build_nkeys_and_users(&[], &[user("host.example", "", None)], &accounts, &global);
        assert!(!has_plaintext_passwords("", users.as_ref(), true));
        assert!(has_plaintext_passwords("", users.as_ref(), false));
    }
}
